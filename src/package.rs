use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, trace};

use crate::error::ResolverError;
use crate::package_json::{
  BrowserEntry, BrowserField, ExportConditions, ExportsField, PackageJson,
};
use crate::path::{clean_url, extname, normalize_posix, resolve_path, split_file_and_postfix, to_slash};
use crate::{ResolveOptions, Resolver, ResolvedId, BROWSER_EXTERNAL_ID};

static TYPEOF_EXPORTS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"typeof exports\s*==").unwrap());
static TYPEOF_MODULE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"typeof module\s*==").unwrap());
static MODULE_EXPORTS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"module\.exports\s*=").unwrap());

const DEFAULT_ENTRIES: &[&str] = &["index.js", "index.json", "index.node"];

/// A loaded package: its directory, parsed manifest, and the per-package
/// memo of resolved subpaths, partitioned by `target_web`.
#[derive(Debug)]
pub struct PackageData {
  pub dir: PathBuf,
  pub data: PackageJson,
  web_resolved_imports: DashMap<String, String>,
  node_resolved_imports: DashMap<String, String>,
}

impl PackageData {
  pub fn new(data: PackageJson) -> Self {
    let dir = data.path.parent().map(Path::to_path_buf).unwrap_or_default();
    PackageData {
      dir,
      data,
      web_resolved_imports: DashMap::new(),
      node_resolved_imports: DashMap::new(),
    }
  }

  pub fn get_resolved_cache(&self, key: &str, target_web: bool) -> Option<String> {
    let memo = if target_web {
      &self.web_resolved_imports
    } else {
      &self.node_resolved_imports
    };
    memo.get(key).map(|v| v.clone())
  }

  pub fn set_resolved_cache(&self, key: &str, value: String, target_web: bool) {
    let memo = if target_web {
      &self.web_resolved_imports
    } else {
      &self.node_resolved_imports
    };
    memo.insert(key.to_string(), value);
  }

  pub fn has_side_effects(&self, id: &str) -> bool {
    self.data.has_side_effects(Path::new(clean_url(id)))
  }
}

/// Match `path` against a `browser` object map with `.js` and `/index.js`
/// suffix tolerance on the keys. Insertion order decides ties.
pub(crate) fn map_with_browser_field<'a>(
  relative_path_in_pkg_dir: &str,
  map: &'a IndexMap<String, BrowserEntry>,
) -> Option<&'a BrowserEntry> {
  let normalized = normalize_posix(relative_path_in_pkg_dir);
  for (key, value) in map {
    let normalized_key = normalize_posix(key);
    if normalized == normalized_key
      || equal_without_suffix(&normalized, &normalized_key, ".js")
      || equal_without_suffix(&normalized, &normalized_key, "/index.js")
    {
      return Some(value);
    }
  }
  None
}

fn equal_without_suffix(path: &str, key: &str, suffix: &str) -> bool {
  key.ends_with(suffix) && key[..key.len() - suffix.len()] == *path
}

/// Conditions merged into every `exports` lookup: `production`/`development`,
/// `module` unless requiring, then the configured extras.
pub(crate) fn extra_conditions(opts: &ResolveOptions) -> Vec<String> {
  let mut conditions = vec![if opts.is_production {
    "production".to_string()
  } else {
    "development".to_string()
  }];
  if !opts.is_require {
    conditions.push("module".to_string());
  }
  conditions.extend(opts.conditions.iter().cloned());
  conditions
}

impl Resolver {
  /// Select the root entry file of a package: `exports`, then the `browser`
  /// field (with the UMD sniff), then legacy main fields, then defaults.
  pub(crate) fn resolve_package_entry(
    &self,
    id: &str,
    pkg: &Arc<PackageData>,
    target_web: bool,
    opts: &ResolveOptions,
  ) -> Result<String, ResolverError> {
    if let Some(cached) = pkg.get_resolved_cache(".", target_web) {
      return Ok(cached);
    }

    let extra = extra_conditions(opts);
    let conditions = ExportConditions {
      browser: target_web,
      require: opts.is_require,
      conditions: &extra,
    };

    let mut entry_point: Option<String> = None;

    if pkg.data.has_exports() {
      match pkg.data.resolve_exports("", &conditions) {
        Ok(Some(target)) => entry_point = Some(target),
        Ok(None) => {
          return Err(ResolverError::PackageEntryNotFound {
            package: id.to_string(),
            details: Some(format!("Missing \".\" export in \"{id}\" package")),
          })
        }
        Err(e) => {
          return Err(ResolverError::PackageEntryNotFound {
            package: id.to_string(),
            details: Some(e.to_string()),
          })
        }
      }
    }

    // even when exports resolved, an .mjs entry leaves the other fields in
    // play because .mjs files can technically import .cjs files
    if target_web && entry_point.as_deref().map_or(true, |e| e.ends_with(".mjs")) {
      let browser_entry = match &pkg.data.browser {
        BrowserField::Str(s) => Some(s.clone()),
        BrowserField::Map(map) => map.get(".").and_then(|e| match e {
          BrowserEntry::Str(s) => Some(s.clone()),
          BrowserEntry::Bool(_) => None,
        }),
        BrowserField::None => None,
      };
      if let Some(browser_entry) = browser_entry {
        match &pkg.data.module {
          Some(module) if !opts.is_require && *module != browser_entry => {
            // Some packages point `module` at browser ESM while `browser`
            // carries a UMD/IIFE build. Sniff the browser entry and prefer
            // `module` when the browser build is not ESM.
            let module = module.clone();
            let browser_path = to_slash(&resolve_path(&pkg.dir, &browser_entry));
            if let Some(resolved_browser) = self.try_fs_resolve(&browser_path, opts, true, target_web)? {
              if let Ok(content) = self.cache.fs.read_to_string(Path::new(clean_url(&resolved_browser))) {
                if (TYPEOF_EXPORTS_RE.is_match(&content) && TYPEOF_MODULE_RE.is_match(&content))
                  || MODULE_EXPORTS_RE.is_match(&content)
                {
                  // likely UMD or CJS
                  entry_point = Some(module);
                } else {
                  entry_point = Some(browser_entry);
                }
              }
            }
          }
          _ => entry_point = Some(browser_entry),
        }
      }
    }

    if entry_point.as_deref().map_or(true, |e| e.ends_with(".mjs")) {
      for field in &opts.main_fields {
        if field == "browser" {
          continue;
        }
        if let Some(value) = pkg.data.main_field(field).filter(|v| !v.is_empty()) {
          entry_point = Some(value.to_string());
          break;
        }
      }
    }

    if entry_point.is_none() {
      entry_point = pkg.data.main.clone();
    }

    let entry_points: Vec<String> = match entry_point {
      Some(entry) if !entry.is_empty() => vec![entry],
      _ => DEFAULT_ENTRIES.iter().map(|e| e.to_string()).collect(),
    };

    for mut entry in entry_points {
      let mut scoped: Option<ResolveOptions> = None;
      if opts.main_fields.first().map(String::as_str) == Some("sass")
        && !opts.extensions.iter().any(|ext| ext == extname(&entry))
      {
        // a non-style entry in a sass-first lookup must not pick up a
        // stray script; probe the directory without its manifest instead
        entry.clear();
        let mut relaxed = opts.clone();
        relaxed.skip_package_json = true;
        scoped = Some(relaxed);
      }
      let opts = scoped.as_ref().unwrap_or(opts);

      if target_web {
        if let BrowserField::Map(map) = &pkg.data.browser {
          if let Some(BrowserEntry::Str(mapped)) = map_with_browser_field(&entry, map) {
            entry = mapped.clone();
          }
        }
      }

      let entry_path = to_slash(&resolve_path(&pkg.dir, &entry));
      if let Some(resolved) = self.try_fs_resolve(&entry_path, opts, true, target_web)? {
        debug!("package entry for {id}: {resolved}");
        pkg.set_resolved_cache(".", resolved.clone(), target_web);
        return Ok(resolved);
      }
    }

    Err(ResolverError::PackageEntryNotFound {
      package: id.to_string(),
      details: None,
    })
  }

  /// Resolve a `./subpath` within a package through `exports` or the
  /// `browser` map, then probe the filesystem.
  pub(crate) fn resolve_deep_import(
    &self,
    id: &str,
    pkg: &Arc<PackageData>,
    target_web: bool,
    opts: &ResolveOptions,
  ) -> Result<Option<String>, ResolverError> {
    if let Some(cached) = pkg.get_resolved_cache(id, target_web) {
      return Ok(Some(cached));
    }

    let (file, postfix) = split_file_and_postfix(id);
    let mut relative_id = file.to_string();

    if pkg.data.has_exports() {
      // a map is the only exports shape that can expose subpaths
      let exported = match &pkg.data.exports {
        ExportsField::Map(_) => {
          let extra = extra_conditions(opts);
          let conditions = ExportConditions {
            browser: target_web,
            require: opts.is_require,
            conditions: &extra,
          };
          pkg.data.resolve_exports(&file[2..], &conditions).ok().flatten()
        }
        _ => None,
      };
      match exported {
        Some(target) => relative_id = target,
        None => {
          return Err(ResolverError::PackagePathNotExported {
            subpath: file.to_string(),
            package_json_path: pkg.dir.join("package.json"),
          })
        }
      }
    } else if target_web {
      if let BrowserField::Map(map) = &pkg.data.browser {
        match map_with_browser_field(file, map) {
          Some(BrowserEntry::Str(mapped)) => relative_id = mapped.clone(),
          Some(BrowserEntry::Bool(false)) => {
            pkg.set_resolved_cache(id, BROWSER_EXTERNAL_ID.to_string(), target_web);
            return Ok(Some(BROWSER_EXTERNAL_ID.to_string()));
          }
          _ => {}
        }
      }
    }

    let fs_path = format!("{}{postfix}", to_slash(&resolve_path(&pkg.dir, &relative_id)));
    if let Some(resolved) = self.try_fs_resolve(&fs_path, opts, !pkg.data.has_exports(), target_web)? {
      trace!("deep import {id}: {resolved}");
      pkg.set_resolved_cache(id, resolved.clone(), target_web);
      return Ok(Some(resolved));
    }

    Ok(None)
  }

  /// Consult the importer package's `browser` map, either for a file path
  /// inside the package or for a bare id.
  pub(crate) fn try_resolve_browser_mapping(
    &self,
    id: &str,
    importer: Option<&str>,
    opts: &ResolveOptions,
    is_file_path: bool,
    target_web: bool,
  ) -> Result<Option<ResolvedId>, ResolverError> {
    let pkg = match importer.and_then(|i| self.cache.pkg_for_id(i)) {
      Some(pkg) => pkg,
      None => return Ok(None),
    };
    let map = match &pkg.data.browser {
      BrowserField::Map(map) => map,
      _ => return Ok(None),
    };

    let map_id = if is_file_path {
      match Path::new(clean_url(id)).strip_prefix(&pkg.dir) {
        Ok(rel) => format!("./{}", to_slash(rel)),
        Err(_) => return Ok(None),
      }
    } else {
      id.to_string()
    };

    match map_with_browser_field(&map_id, map) {
      Some(BrowserEntry::Str(mapped)) => {
        let fs_path = to_slash(&resolve_path(&pkg.dir, mapped));
        if let Some(resolved) = self.try_fs_resolve(&fs_path, opts, true, target_web)? {
          debug!("browser mapped {id} -> {resolved}");
          let side_effects = pkg.has_side_effects(&resolved);
          self.cache.set_pkg_for_id(&resolved, pkg.clone());
          return Ok(Some(ResolvedId {
            id: resolved,
            external: false,
            module_side_effects: Some(side_effects),
          }));
        }
        Ok(None)
      }
      Some(BrowserEntry::Bool(false)) => Ok(Some(ResolvedId::plain(BROWSER_EXTERNAL_ID))),
      _ => Ok(None),
    }
  }
}
