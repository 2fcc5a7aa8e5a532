use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, trace};

use crate::error::ResolverError;
use crate::package::PackageData;
use crate::path::{clean_url, extname, inject_query, resolve_path, to_slash};
use crate::specifier::parse_package_specifier;
use crate::{default_extensions, default_main_fields, ResolveOptions, Resolver, ResolvedId};

/// File types the optimizer can pre-bundle.
static OPTIMIZABLE_ENTRY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.(?:[cm]?[jt]s)$").unwrap());

/// Queries marking requests other plugins transform into something that is
/// no longer plain JS.
static SPECIAL_QUERY_RE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"[?&](?:worker|sharedworker|raw|url)\b").unwrap());

/// Enumerate the candidate package ids of a bare specifier, longest last.
/// The first segment may carry a period (package names sadly allow them) and
/// a leading `@scope` joins the following segment; a package root never lies
/// below a segment carrying a filename extension.
pub(crate) fn possible_pkg_ids(nested_path: &str) -> Vec<&str> {
  let mut ids = Vec::new();
  let mut prev_slash: Option<usize> = None;
  loop {
    let start = prev_slash.map_or(0, |i| i + 1);
    if start > nested_path.len() {
      break;
    }
    let slash = nested_path[start..]
      .find('/')
      .map_or(nested_path.len(), |i| start + i);
    let part = &nested_path[start..slash];
    prev_slash = Some(slash);
    if part.is_empty() {
      break;
    }

    if ids.is_empty() {
      if part.starts_with('@') {
        continue;
      }
    } else if !extname(part).is_empty() {
      break;
    }

    ids.push(&nested_path[..slash]);

    if !extname(part).is_empty() {
      break;
    }
  }
  ids
}

impl Resolver {
  /// Resolve a bare import: locate the package, delegate to the entry-point
  /// or deep-import resolver, then apply externalization and optimizer
  /// post-processing.
  pub(crate) fn try_node_resolve(
    &self,
    id: &str,
    importer: Option<&str>,
    opts: &ResolveOptions,
    target_web: bool,
    ssr: bool,
    externalize: Option<bool>,
  ) -> Result<Option<ResolvedId>, ResolverError> {
    // split the id by the last '>' for nested selected packages,
    // e.g. 'foo > bar > baz'
    let (nested_root, nested_path) = match id.rfind('>') {
      Some(i) => (id[..i].trim_end_matches('>').trim(), id[i + 1..].trim()),
      None => ("", id),
    };

    let pkg_ids = possible_pkg_ids(nested_path);

    let mut basedir = if !opts.dedupe.is_empty()
      && pkg_ids.iter().any(|p| opts.dedupe.iter().any(|d| d == p))
    {
      opts.root.clone()
    } else if let Some(importer) = importer.filter(|i| {
      let clean = clean_url(i);
      Path::new(i).is_absolute()
        && (self.cache.fs.is_file(Path::new(clean)) || self.cache.fs.is_dir(Path::new(clean)))
    }) {
      Path::new(importer)
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| opts.root.clone())
    } else {
      opts.root.clone()
    };

    // step through a 'foo > bar' chain, rebasing the lookup each time
    if !nested_root.is_empty() {
      basedir = self.nested_resolve_from(nested_root, &basedir, opts);
    }

    let mut pkg: Option<Arc<PackageData>> = None;
    let mut pkg_id = "";
    for candidate in pkg_ids.iter().rev() {
      if let Some(found) = self.cache.resolve_package_data(candidate, &basedir, opts.preserve_symlinks)? {
        pkg = Some(found);
        pkg_id = candidate;
        break;
      }
    }
    let pkg = match pkg {
      Some(pkg) => pkg,
      None => return Ok(None),
    };

    let deep = pkg_id != nested_path;
    let deep_id = if deep {
      format!(".{}", &nested_path[pkg_id.len()..])
    } else {
      String::new()
    };

    let run = |opts: &ResolveOptions| -> Result<Option<String>, ResolverError> {
      if deep {
        self.resolve_deep_import(&deep_id, &pkg, target_web, opts)
      } else {
        self.resolve_package_entry(nested_path, &pkg, target_web, opts).map(Some)
      }
    };

    let mut resolved = match run(opts) {
      Ok(resolved) => resolved,
      Err(err) => {
        if !opts.try_esm_only {
          return Err(err);
        }
        None
      }
    };
    if resolved.is_none() && opts.try_esm_only {
      let mut relaxed = opts.clone();
      relaxed.is_require = false;
      relaxed.main_fields = default_main_fields();
      relaxed.extensions = default_extensions();
      resolved = run(&relaxed)?;
    }
    let resolved = match resolved {
      Some(resolved) => resolved,
      None => return Ok(None),
    };

    self.cache.set_pkg_for_id(&resolved, pkg.clone());

    let module_side_effects = opts.is_build.then(|| pkg.has_side_effects(&resolved));

    if externalize == Some(true) {
      let resolved_ext = extname(clean_url(&resolved)).to_string();
      if matches!(resolved_ext.as_str(), "" | ".js" | ".mjs" | ".cjs") {
        let mut patched = id.to_string();
        if deep && !pkg.data.has_exports() && extname(clean_url(id)) != resolved_ext {
          patched.push_str(&resolved_ext);
        }
        debug!("externalized {id} as {patched}");
        return Ok(Some(ResolvedId {
          id: patched,
          external: true,
          module_side_effects,
        }));
      }
      // non-js files stay internal even for externalized packages
    }

    let optimizer = self.deps_optimizer(ssr);

    if opts.is_build && optimizer.is_none() {
      return Ok(Some(ResolvedId {
        id: resolved,
        external: false,
        module_side_effects,
      }));
    }

    let optimizer = match optimizer {
      // linked packages, resolving before the server listens, and the
      // scan phase all skip the optimizer entirely
      Some(optimizer) if resolved.contains("node_modules") && !opts.scan => optimizer,
      _ => {
        return Ok(Some(ResolvedId {
          id: resolved,
          external: false,
          module_side_effects,
        }))
      }
    };

    let is_js_type = OPTIMIZABLE_ENTRY_RE.is_match(clean_url(&resolved));
    let skip_optimization = !is_js_type
      || importer.map_or(false, |i| i.contains("node_modules"))
      || optimizer.is_excluded(pkg_id)
      || optimizer.is_excluded(nested_path)
      || SPECIAL_QUERY_RE.is_match(&resolved)
      || (!opts.is_build && ssr);

    let mut resolved = resolved;
    if skip_optimization {
      // excluded from optimization: inject a version query so the browser
      // can cache the file without re-validation, but only for known js
      // types, otherwise externalized files from pre-bundled deps would be
      // duplicated
      if !opts.is_build && is_js_type {
        if let Some(metadata) = optimizer.metadata(ssr) {
          if !metadata.browser_hash.is_empty() {
            resolved = inject_query(&resolved, &format!("v={}", metadata.browser_hash));
          }
        }
      }
    } else {
      // a missing import: queue an optimizer re-run and serve the
      // pre-bundled id it assigns
      let info = optimizer.register_missing_import(id, &resolved, ssr);
      resolved = optimizer.optimized_dep_id(&info);
      trace!("optimizer took over {id}: {resolved}");
    }

    Ok(Some(ResolvedId {
      id: resolved,
      external: false,
      module_side_effects,
    }))
  }

  /// Node-style resolution of `id` from `basedir`, without externalization
  /// or optimizer post-processing. Hosts use this for import analysis; the
  /// optimizer's nested-dependency check depends on it too.
  pub fn resolve_from(
    &self,
    id: &str,
    basedir: &Path,
    opts: &ResolveOptions,
  ) -> Result<Option<String>, ResolverError> {
    if Path::new(id).is_absolute() {
      return self.try_fs_resolve(id, opts, true, true);
    }
    if id.starts_with('.') {
      let fs_path = to_slash(&resolve_path(basedir, id));
      return self.try_fs_resolve(&fs_path, opts, true, true);
    }

    let (pkg_id, subpath) = match parse_package_specifier(id) {
      Some(split) => split,
      None => return Ok(None),
    };
    let pkg = match self.cache.resolve_package_data(pkg_id, basedir, opts.preserve_symlinks)? {
      Some(pkg) => pkg,
      None => return Ok(None),
    };
    if subpath.is_empty() {
      self.resolve_package_entry(pkg_id, &pkg, false, opts).map(Some)
    } else {
      self.resolve_deep_import(&format!("./{subpath}"), &pkg, false, opts)
    }
  }

  /// Walk a `foo > bar` chain token by token, rebasing `basedir` on each
  /// resolved package. Best-effort: a failing step keeps the last base.
  fn nested_resolve_from(&self, nested_root: &str, basedir: &Path, opts: &ResolveOptions) -> PathBuf {
    let mut basedir = basedir.to_path_buf();
    for pkg in nested_root.split('>').map(str::trim) {
      if pkg.is_empty() {
        continue;
      }
      match self.resolve_from(pkg, &basedir, opts) {
        Ok(Some(resolved)) => basedir = PathBuf::from(clean_url(&resolved)),
        _ => break,
      }
    }
    basedir
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fs::InMemoryFileSystem;

  #[test]
  fn pkg_id_enumeration() {
    assert_eq!(possible_pkg_ids("@scope/a/b/c.js"), vec!["@scope/a", "@scope/a/b"]);
    assert_eq!(possible_pkg_ids("a/b/c.js"), vec!["a", "a/b"]);
    assert_eq!(possible_pkg_ids("a.b/c"), vec!["a.b"]);
    assert_eq!(possible_pkg_ids("foo"), vec!["foo"]);
    assert_eq!(possible_pkg_ids("@scope/pkg"), vec!["@scope/pkg"]);
    assert_eq!(possible_pkg_ids("@scope"), Vec::<&str>::new());
  }

  fn fixture() -> InMemoryFileSystem {
    let mut fs = InMemoryFileSystem::default();
    fs.write_file("/p/src/app.js", "");
    fs.write_file("/p/node_modules/foo/package.json", r#"{ "main": "index.js" }"#);
    fs.write_file("/p/node_modules/foo/index.js", "");
    fs.write_file("/p/node_modules/foo/lib/util.js", "");
    fs
  }

  fn resolver(fs: InMemoryFileSystem) -> Resolver {
    Resolver::new(
      ResolveOptions {
        root: "/p".into(),
        ..ResolveOptions::default()
      },
      Arc::new(fs),
    )
  }

  #[test]
  fn resolves_entry_and_deep_imports() {
    let resolver = resolver(fixture());
    let opts = resolver.options.clone();

    let res = resolver
      .try_node_resolve("foo", Some("/p/src/app.js"), &opts, true, false, None)
      .unwrap()
      .unwrap();
    assert_eq!(res.id, "/p/node_modules/foo/index.js");

    let res = resolver
      .try_node_resolve("foo/lib/util", Some("/p/src/app.js"), &opts, true, false, None)
      .unwrap()
      .unwrap();
    assert_eq!(res.id, "/p/node_modules/foo/lib/util.js");
  }

  #[test]
  fn missing_package_falls_through() {
    let resolver = resolver(fixture());
    let opts = resolver.options.clone();
    assert_eq!(
      resolver
        .try_node_resolve("bar", Some("/p/src/app.js"), &opts, true, false, None)
        .unwrap(),
      None
    );
  }

  #[test]
  fn nearest_node_modules_wins_unless_deduped() {
    let mut fs = fixture();
    fs.write_file(
      "/p/node_modules/x/node_modules/foo/package.json",
      r#"{ "main": "index.js" }"#,
    );
    fs.write_file("/p/node_modules/x/node_modules/foo/index.js", "");
    fs.write_file("/p/node_modules/x/inner.js", "");
    let resolver = resolver(fs);
    let opts = resolver.options.clone();

    let res = resolver
      .try_node_resolve("foo", Some("/p/node_modules/x/inner.js"), &opts, true, false, None)
      .unwrap()
      .unwrap();
    assert_eq!(res.id, "/p/node_modules/x/node_modules/foo/index.js");

    let mut deduped = opts.clone();
    deduped.dedupe = vec!["foo".into()];
    let res = resolver
      .try_node_resolve("foo", Some("/p/node_modules/x/inner.js"), &deduped, true, false, None)
      .unwrap()
      .unwrap();
    assert_eq!(res.id, "/p/node_modules/foo/index.js");
  }

  #[test]
  fn nested_selection_rebases_the_lookup() {
    let mut fs = fixture();
    fs.write_file(
      "/p/node_modules/foo/node_modules/bar/package.json",
      r#"{ "main": "bar.js" }"#,
    );
    fs.write_file("/p/node_modules/foo/node_modules/bar/bar.js", "");
    // a root-level decoy
    fs.write_file("/p/node_modules/bar/package.json", r#"{ "main": "other.js" }"#);
    fs.write_file("/p/node_modules/bar/other.js", "");
    let resolver = resolver(fs);
    let opts = resolver.options.clone();

    let res = resolver
      .try_node_resolve("foo > bar", Some("/p/src/app.js"), &opts, true, false, None)
      .unwrap()
      .unwrap();
    assert_eq!(res.id, "/p/node_modules/foo/node_modules/bar/bar.js");
  }

  #[test]
  fn externalized_deep_import_keeps_the_specifier() {
    let resolver = resolver(fixture());
    let mut opts = resolver.options.clone();
    opts.is_build = true;

    let res = resolver
      .try_node_resolve("foo/lib/util", Some("/p/src/app.js"), &opts, false, true, Some(true))
      .unwrap()
      .unwrap();
    assert!(res.external);
    // the resolved extension is appended since the manifest has no exports
    assert_eq!(res.id, "foo/lib/util.js");
    assert_eq!(res.module_side_effects, Some(true));
  }

  #[test]
  fn externalize_skips_non_js_files() {
    let mut fs = fixture();
    fs.write_file("/p/node_modules/foo/styles.css", "");
    let resolver = resolver(fs);
    let mut opts = resolver.options.clone();
    opts.is_build = true;

    let res = resolver
      .try_node_resolve("foo/styles.css", Some("/p/src/app.js"), &opts, false, true, Some(true))
      .unwrap()
      .unwrap();
    assert!(!res.external);
    assert_eq!(res.id, "/p/node_modules/foo/styles.css");
  }

  #[test]
  fn build_mode_reports_side_effects() {
    let mut fs = fixture();
    fs.write_file(
      "/p/node_modules/pure/package.json",
      r#"{ "main": "index.js", "sideEffects": false }"#,
    );
    fs.write_file("/p/node_modules/pure/index.js", "");
    let resolver = resolver(fs);
    let mut opts = resolver.options.clone();
    opts.is_build = true;

    let res = resolver
      .try_node_resolve("pure", Some("/p/src/app.js"), &opts, true, false, None)
      .unwrap()
      .unwrap();
    assert_eq!(res.module_side_effects, Some(false));

    let res = resolver
      .try_node_resolve("foo", Some("/p/src/app.js"), &opts, true, false, None)
      .unwrap()
      .unwrap();
    assert_eq!(res.module_side_effects, Some(true));
  }

  #[test]
  fn resolve_from_handles_bare_and_relative() {
    let resolver = resolver(fixture());
    let opts = resolver.options.clone();

    assert_eq!(
      resolver.resolve_from("foo", Path::new("/p/src"), &opts).unwrap(),
      Some("/p/node_modules/foo/index.js".into())
    );
    assert_eq!(
      resolver.resolve_from("./app", Path::new("/p/src"), &opts).unwrap(),
      Some("/p/src/app.js".into())
    );
  }
}
