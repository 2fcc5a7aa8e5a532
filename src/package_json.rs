use std::path::{Path, PathBuf};

use glob_match::glob_match;
use indexmap::IndexMap;
use serde::Deserialize;
use thiserror::Error;

/// Parsed `package.json` data. Only the fields the resolver consults are
/// typed; everything else is retained so configurable main fields
/// (`jsnext:main`, `sass`, ...) can be looked up by name.
#[derive(Deserialize, Debug, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct PackageJson {
  #[serde(skip)]
  pub path: PathBuf,
  pub name: Option<String>,
  pub main: Option<String>,
  pub module: Option<String>,
  pub browser: BrowserField,
  pub exports: ExportsField,
  pub side_effects: SideEffects,
  #[serde(flatten)]
  rest: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize, Debug, Default, PartialEq)]
#[serde(untagged)]
pub enum BrowserField {
  #[default]
  None,
  Str(String),
  Map(IndexMap<String, BrowserEntry>),
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum BrowserEntry {
  Str(String),
  /// `false` externalizes the matched file for the browser build.
  Bool(bool),
}

#[derive(Deserialize, Debug, Default, PartialEq)]
#[serde(untagged)]
pub enum ExportsField {
  /// Absent field, or an explicit `null` target.
  #[default]
  None,
  Str(String),
  Array(Vec<ExportsField>),
  Map(IndexMap<ExportsKey, ExportsField>),
}

#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum ExportsKey {
  /// The `"."` entry.
  Main,
  /// A `"./subpath"` entry, stored without the `./` prefix.
  Pattern(String),
  /// A condition name such as `"import"` or `"browser"`.
  Condition(String),
}

impl From<&str> for ExportsKey {
  fn from(key: &str) -> Self {
    if key == "." {
      ExportsKey::Main
    } else if let Some(subpath) = key.strip_prefix("./") {
      ExportsKey::Pattern(subpath.to_string())
    } else {
      ExportsKey::Condition(key.to_string())
    }
  }
}

impl<'de> Deserialize<'de> for ExportsKey {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: serde::Deserializer<'de>,
  {
    let s: String = Deserialize::deserialize(deserializer)?;
    Ok(ExportsKey::from(s.as_str()))
  }
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(untagged)]
pub enum SideEffects {
  #[default]
  None,
  Boolean(bool),
  Str(String),
  Array(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PackageJsonError {
  #[error("Invalid \"exports\" target {0:?}")]
  InvalidPackageTarget(String),
}

/// Conditions active for an `exports` lookup. `default` always matches;
/// `import`/`require` are mutually exclusive on the `require` flag.
#[derive(Debug, Clone, Copy)]
pub struct ExportConditions<'a> {
  pub browser: bool,
  pub require: bool,
  pub conditions: &'a [String],
}

impl ExportConditions<'_> {
  fn matches(&self, key: &str) -> bool {
    key == "default"
      || (key == "browser" && self.browser)
      || (key == "require" && self.require)
      || (key == "import" && !self.require)
      || self.conditions.iter().any(|c| c == key)
  }
}

impl PackageJson {
  pub fn parse(path: PathBuf, data: &str) -> serde_json::Result<PackageJson> {
    let mut parsed: PackageJson = serde_json::from_str(data)?;
    parsed.path = path;
    Ok(parsed)
  }

  pub fn has_exports(&self) -> bool {
    self.exports != ExportsField::None
  }

  /// Look up a legacy entry field by name.
  pub fn main_field(&self, field: &str) -> Option<&str> {
    match field {
      "main" => self.main.as_deref(),
      "module" => self.module.as_deref(),
      "browser" => match &self.browser {
        BrowserField::Str(s) => Some(s),
        _ => None,
      },
      _ => self.rest.get(field).and_then(|v| v.as_str()),
    }
  }

  /// Resolve `subpath` ("" for the root entry, otherwise without a leading
  /// `./`) through the `exports` field. `Ok(None)` means exports does not
  /// expose the subpath.
  pub fn resolve_exports(
    &self,
    subpath: &str,
    conditions: &ExportConditions,
  ) -> Result<Option<String>, PackageJsonError> {
    if subpath.is_empty() {
      let mut main_export = &ExportsField::None;
      match &self.exports {
        ExportsField::None | ExportsField::Str(_) | ExportsField::Array(_) => {
          main_export = &self.exports;
        }
        ExportsField::Map(map) => {
          if let Some(v) = map.get(&ExportsKey::Main) {
            main_export = v;
          } else if !map.keys().any(|k| matches!(k, ExportsKey::Pattern(_))) {
            // a conditions-only map applies to the root entry
            main_export = &self.exports;
          }
        }
      }

      if *main_export != ExportsField::None {
        return self.resolve_target(main_export, "", conditions);
      }
    } else if let ExportsField::Map(map) = &self.exports {
      return self.resolve_subpath_in(subpath, map, conditions);
    }

    Ok(None)
  }

  fn resolve_target(
    &self,
    target: &ExportsField,
    pattern_match: &str,
    conditions: &ExportConditions,
  ) -> Result<Option<String>, PackageJsonError> {
    match target {
      ExportsField::Str(target) => {
        if !target.starts_with("./") {
          return Err(PackageJsonError::InvalidPackageTarget(target.clone()));
        }
        Ok(Some(if pattern_match.is_empty() {
          target.clone()
        } else {
          target.replace('*', pattern_match)
        }))
      }
      ExportsField::Map(map) => {
        // conditions resolve in object insertion order
        for (key, value) in map {
          if let ExportsKey::Condition(key) = key {
            if conditions.matches(key) {
              match self.resolve_target(value, pattern_match, conditions)? {
                None => continue,
                res => return Ok(res),
              }
            }
          }
        }
        Ok(None)
      }
      ExportsField::Array(targets) => {
        for item in targets {
          match self.resolve_target(item, pattern_match, conditions) {
            Err(_) | Ok(None) => continue,
            res => return res,
          }
        }
        Ok(None)
      }
      ExportsField::None => Ok(None),
    }
  }

  fn resolve_subpath_in(
    &self,
    match_key: &str,
    map: &IndexMap<ExportsKey, ExportsField>,
    conditions: &ExportConditions,
  ) -> Result<Option<String>, PackageJsonError> {
    if !match_key.contains('*') {
      if let Some(target) = map.get(&ExportsKey::Pattern(match_key.to_string())) {
        return self.resolve_target(target, "", conditions);
      }
    }

    // among matching wildcard patterns the most specific one wins; the
    // first key wins exact specificity ties
    let mut winner: Option<(&str, &str)> = None;
    for key in map.keys() {
      if let ExportsKey::Pattern(pattern) = key {
        if let Some(captured) = wildcard_match(pattern, match_key) {
          if winner.map_or(true, |(best, _)| specificity(pattern) > specificity(best)) {
            winner = Some((pattern, captured));
          }
        }
      }
    }

    if let Some((pattern, captured)) = winner {
      return self.resolve_target(
        &map[&ExportsKey::Pattern(pattern.to_string())],
        captured,
        conditions,
      );
    }

    Ok(None)
  }

  pub fn has_side_effects(&self, path: &Path) -> bool {
    let path = self
      .path
      .parent()
      .and_then(|dir| path.strip_prefix(dir).ok())
      .and_then(|path| path.to_str());

    let path = match path {
      Some(p) => p,
      None => return true,
    };

    fn side_effects_glob_matches(glob: &str, path: &str) -> bool {
      let glob = glob.strip_prefix("./").unwrap_or(glob);

      // A glob without '/' matches at any depth, like webpack.
      if glob.contains('/') {
        glob_match(glob, path)
      } else {
        glob_match(&format!("**/{glob}"), path)
      }
    }

    match &self.side_effects {
      SideEffects::None => true,
      SideEffects::Boolean(b) => *b,
      SideEffects::Str(glob) => side_effects_glob_matches(glob, path),
      SideEffects::Array(globs) => globs.iter().any(|glob| side_effects_glob_matches(glob, path)),
    }
  }
}

/// Match `subpath` against a pattern containing a single `*`, returning the
/// text the `*` captured. The length guard keeps the prefix and suffix from
/// overlapping on short subpaths.
fn wildcard_match<'a>(pattern: &str, subpath: &'a str) -> Option<&'a str> {
  let (prefix, suffix) = pattern.split_once('*')?;
  if !subpath.starts_with(prefix) {
    return None;
  }
  if suffix.is_empty() {
    Some(&subpath[prefix.len()..])
  } else if subpath.len() >= pattern.len() && subpath.ends_with(suffix) {
    Some(&subpath[prefix.len()..subpath.len() - suffix.len()])
  } else {
    None
  }
}

/// Pattern specificity: a longer literal prefix outranks everything, then
/// the longer pattern overall.
fn specificity(pattern: &str) -> (usize, usize) {
  let prefix_len = pattern.find('*').map_or(pattern.len(), |star| star + 1);
  (prefix_len, pattern.len())
}
