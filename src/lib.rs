//! Module specifier resolver for a JavaScript/TypeScript build and
//! dev-server pipeline.
//!
//! Given an import specifier and the importer that contains it, the resolver
//! determines the concrete on-disk file satisfying it, declares it external,
//! or rewrites it to a pre-bundled optimized artifact. It is exposed as a
//! plugin with a [`Resolver::resolve_id`] hook and a [`Resolver::load`] hook
//! producing the runtime stub for browser-externalized ids.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, trace, warn};

mod builtins;
mod cache;
mod error;
mod fs;
mod node_resolve;
mod optimizer;
mod package;
mod package_json;
mod path;
mod probe;
mod specifier;

pub use crate::builtins::is_builtin;
pub use crate::cache::Cache;
pub use crate::error::ResolverError;
pub use crate::fs::{FileSystem, FileSystemRealPathCache, FileSystemRef, InMemoryFileSystem, OsFileSystem};
pub use crate::optimizer::{DepOptimizationMetadata, DepsOptimizer, OptimizedDepInfo};
pub use crate::package::PackageData;
pub use crate::package_json::{
  BrowserEntry, BrowserField, ExportConditions, ExportsField, ExportsKey, PackageJson,
  PackageJsonError, SideEffects,
};
pub use crate::path::FS_PREFIX;
pub use crate::specifier::SpecifierKind;

use crate::path::{fs_path_from_id, inject_query, is_ts_request, resolve_path, to_slash};

/// Sentinel id Node built-ins are redirected to in client code. The dev
/// variant carries the original id as a `:<id>` suffix so the stub can name
/// the module.
pub const BROWSER_EXTERNAL_ID: &str = "__vite-browser-external";

pub const DEFAULT_MAIN_FIELDS: &[&str] = &["module", "jsnext:main", "jsnext"];

pub const DEFAULT_EXTENSIONS: &[&str] = &[".mjs", ".js", ".mts", ".ts", ".jsx", ".tsx", ".json"];

pub(crate) fn default_main_fields() -> Vec<String> {
  DEFAULT_MAIN_FIELDS.iter().map(|s| s.to_string()).collect()
}

pub(crate) fn default_extensions() -> Vec<String> {
  DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect()
}

/// Version query injected on optimized and linked-dep urls.
static DEP_VERSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[?&]v=[\w.-]+\b").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SsrTarget {
  #[default]
  Node,
  /// Webworker targets keep browser semantics while server-rendering.
  Webworker,
}

/// Resolver configuration. Per-call concerns (`ssr`, `scan`, host hints)
/// arrive through [`ResolveContext`] instead.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
  /// Absolute project root, the default base directory.
  pub root: PathBuf,
  /// Legacy entry fields consulted after `exports` and `browser`.
  pub main_fields: Vec<String>,
  /// Extra export conditions merged with the built-ins.
  pub conditions: Vec<String>,
  /// Extensions tried when probing an extensionless path.
  pub extensions: Vec<String>,
  /// Package ids always resolved against `root`, even from nested
  /// `node_modules`.
  pub dedupe: Vec<String>,
  pub preserve_symlinks: bool,
  /// Serving source for the dev client; enables root-absolute urls and
  /// optimized-dep resolution.
  pub as_src: bool,
  /// Treat `\w`-leading specifiers as relative requests.
  pub prefer_relative: bool,
  pub try_index: bool,
  pub try_prefix: Option<String>,
  pub skip_package_json: bool,
  pub is_require: bool,
  pub is_from_ts_importer: bool,
  /// Retry entry resolution with default fields when an esm-only lookup
  /// fails.
  pub try_esm_only: bool,
  /// Inside the pre-bundling scan phase.
  pub scan: bool,
  pub is_build: bool,
  pub is_production: bool,
  pub ssr_target: SsrTarget,
  /// `ssr.noExternal: true` turns built-in imports into errors.
  pub ssr_no_external: bool,
}

impl Default for ResolveOptions {
  fn default() -> Self {
    ResolveOptions {
      root: PathBuf::from("/"),
      main_fields: default_main_fields(),
      conditions: Vec::new(),
      extensions: default_extensions(),
      dedupe: Vec::new(),
      preserve_symlinks: false,
      as_src: true,
      prefer_relative: false,
      try_index: true,
      try_prefix: None,
      skip_package_json: false,
      is_require: false,
      is_from_ts_importer: false,
      try_esm_only: false,
      scan: false,
      is_build: false,
      is_production: false,
      ssr_target: SsrTarget::Node,
      ssr_no_external: false,
    }
  }
}

/// Per-call context the plugin host passes alongside `(id, importer)`.
#[derive(Debug, Clone, Default)]
pub struct ResolveContext {
  pub ssr: bool,
  pub scan: bool,
  /// The host's `custom["node-resolve"].isRequire` hint.
  pub is_require: Option<bool>,
  /// Module language metadata, the fallback when the importer path has no
  /// telling extension.
  pub importer_lang: Option<String>,
}

/// The structured record handed back to the plugin host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedId {
  pub id: String,
  pub external: bool,
  pub module_side_effects: Option<bool>,
}

impl ResolvedId {
  pub fn plain(id: impl Into<String>) -> Self {
    ResolvedId {
      id: id.into(),
      external: false,
      module_side_effects: None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveResult {
  Resolved(ResolvedId),
  /// The specifier was recognized and deliberately left alone (data urls).
  Ignored,
  /// Not handled here; the next plugin in the host may try.
  Unresolved,
}

impl ResolveResult {
  fn plain(id: impl Into<String>) -> Self {
    ResolveResult::Resolved(ResolvedId::plain(id))
  }

  /// The resolved id, when one was produced.
  pub fn id(&self) -> Option<&str> {
    match self {
      ResolveResult::Resolved(resolved) => Some(&resolved.id),
      _ => None,
    }
  }
}

pub type ExternalizePredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// One resolver instance owns all shared caches (including the id→package
/// map), so tests and parallel servers get independent state.
pub struct Resolver {
  pub(crate) options: ResolveOptions,
  pub(crate) cache: Cache,
  deps_optimizer: Option<Arc<dyn DepsOptimizer>>,
  ssr_deps_optimizer: Option<Arc<dyn DepsOptimizer>>,
  should_externalize: Option<ExternalizePredicate>,
}

impl Resolver {
  pub fn new(options: ResolveOptions, fs: FileSystemRef) -> Self {
    Resolver {
      options,
      cache: Cache::new(fs),
      deps_optimizer: None,
      ssr_deps_optimizer: None,
      should_externalize: None,
    }
  }

  pub fn with_deps_optimizer(mut self, optimizer: Arc<dyn DepsOptimizer>) -> Self {
    self.deps_optimizer = Some(optimizer);
    self
  }

  pub fn with_ssr_deps_optimizer(mut self, optimizer: Arc<dyn DepsOptimizer>) -> Self {
    self.ssr_deps_optimizer = Some(optimizer);
    self
  }

  /// Install the ssr-externals predicate consulted for bare imports.
  pub fn with_externalize_predicate(mut self, predicate: ExternalizePredicate) -> Self {
    self.should_externalize = Some(predicate);
    self
  }

  pub fn options(&self) -> &ResolveOptions {
    &self.options
  }

  pub(crate) fn deps_optimizer(&self, ssr: bool) -> Option<&Arc<dyn DepsOptimizer>> {
    if ssr {
      self.ssr_deps_optimizer.as_ref()
    } else {
      self.deps_optimizer.as_ref()
    }
  }

  /// The `resolveId` plugin hook.
  pub fn resolve_id(
    &self,
    id: &str,
    importer: Option<&str>,
    ctx: &ResolveContext,
  ) -> Result<ResolveResult, ResolverError> {
    let ssr = ctx.ssr;
    let target_web = !ssr || self.options.ssr_target == SsrTarget::Webworker;
    let kind = SpecifierKind::classify(id);

    match kind {
      SpecifierKind::BrowserExternal => return Ok(ResolveResult::plain(id)),
      // fast path for commonjs proxy modules
      SpecifierKind::CommonJsProxy => return Ok(ResolveResult::Unresolved),
      _ => {}
    }

    let mut opts = self.options.clone();
    if ctx.scan {
      opts.scan = true;
    }
    opts.is_require = ctx.is_require.unwrap_or(opts.is_require);
    opts.is_from_ts_importer = is_ts_importer(importer, ctx);

    // pre-bundled dep urls may wear an /@fs/ prefix; they take precedence
    // over the plain escape hatch
    if opts.as_src {
      if let Some(optimizer) = self.deps_optimizer(ssr) {
        if optimizer.is_optimized_dep_url(id) {
          let resolved = if id.starts_with(FS_PREFIX) {
            fs_path_from_id(id)
          } else {
            to_slash(&resolve_path(&opts.root, &id[1..]))
          };
          trace!("optimized url {id} -> {resolved}");
          return Ok(ResolveResult::plain(resolved));
        }
      }
    }

    match kind {
      SpecifierKind::FsEscape => {
        if opts.as_src {
          let fs_path = fs_path_from_id(id);
          let res = self.try_fs_resolve(&fs_path, &opts, true, target_web)?;
          debug!("/@fs/ {id} -> {:?}", res.as_deref().unwrap_or(&fs_path));
          // an explicit fs path always yields a concrete path, even if the
          // file is missing; downstream produces the 404
          return Ok(ResolveResult::plain(res.unwrap_or(fs_path)));
        }
        if let Some(res) = self.try_fs_resolve(id, &opts, true, target_web)? {
          return Ok(ResolveResult::plain(res));
        }
      }
      SpecifierKind::RootUrl => {
        if opts.as_src {
          let fs_path = to_slash(&resolve_path(&opts.root, &id[1..]));
          if let Some(res) = self.try_fs_resolve(&fs_path, &opts, true, target_web)? {
            debug!("url {id} -> {res}");
            return Ok(ResolveResult::plain(res));
          }
        }
        // a root url is also a plain absolute path
        if let Some(res) = self.try_fs_resolve(id, &opts, true, target_web)? {
          return Ok(ResolveResult::plain(res));
        }
      }
      SpecifierKind::Relative => {
        if let Some(res) = self.resolve_relative(id, importer, &opts, target_web, ssr)? {
          return Ok(ResolveResult::Resolved(res));
        }
      }
      SpecifierKind::Absolute => {
        if let Some(res) = self.try_fs_resolve(id, &opts, true, target_web)? {
          return Ok(ResolveResult::plain(res));
        }
      }
      SpecifierKind::ExternalUrl => {
        return Ok(ResolveResult::Resolved(ResolvedId {
          id: id.to_string(),
          external: true,
          module_side_effects: None,
        }))
      }
      SpecifierKind::DataUrl => return Ok(ResolveResult::Ignored),
      SpecifierKind::Bare => {
        // html imports and preferRelative treat `\w`-leading ids as
        // relative requests first
        let prefer_relative = opts.prefer_relative || importer.map_or(false, |i| i.ends_with(".html"));
        let first = id.as_bytes()[0];
        if prefer_relative && (first.is_ascii_alphanumeric() || first == b'_') {
          if let Some(res) = self.resolve_relative(id, importer, &opts, target_web, ssr)? {
            return Ok(ResolveResult::Resolved(res));
          }
        }

        let external = self.should_externalize.as_ref().map(|f| f(id));

        if opts.as_src && !opts.scan {
          if let Some(optimizer) = self.deps_optimizer(ssr) {
            if let Some(res) = self.try_optimized_resolve(optimizer, ssr, id, importer, &opts)? {
              return Ok(ResolveResult::plain(res));
            }
          }
        }

        if target_web {
          if let Some(res) = self.try_resolve_browser_mapping(id, importer, &opts, false, target_web)? {
            return Ok(ResolveResult::Resolved(res));
          }
        }

        if let Some(res) = self.try_node_resolve(id, importer, &opts, target_web, ssr, external)? {
          return Ok(ResolveResult::Resolved(res));
        }

        if is_builtin(id) {
          if ssr {
            if opts.ssr_no_external {
              return Err(ResolverError::NodeBuiltinNotBundled {
                id: id.to_string(),
                importer: importer.map(|i| relative_to_cwd(&self.cache, i)),
              });
            }
            return Ok(ResolveResult::Resolved(ResolvedId {
              id: id.to_string(),
              external: true,
              module_side_effects: None,
            }));
          }
          if !opts.as_src {
            debug!("externalized node built-in {id} to empty module");
          } else if opts.is_production {
            warn!("module {id} has been externalized for browser compatibility");
          }
          return Ok(ResolveResult::plain(if opts.is_production {
            BROWSER_EXTERNAL_ID.to_string()
          } else {
            format!("{BROWSER_EXTERNAL_ID}:{id}")
          }));
        }
      }
      SpecifierKind::BrowserExternal | SpecifierKind::CommonJsProxy => unreachable!(),
      SpecifierKind::Unresolvable => {}
    }

    trace!("unresolved: {id}");
    Ok(ResolveResult::Unresolved)
  }

  /// Orchestrator step for relative requests (and `\w`-leading requests
  /// served relative).
  fn resolve_relative(
    &self,
    id: &str,
    importer: Option<&str>,
    opts: &ResolveOptions,
    target_web: bool,
    ssr: bool,
  ) -> Result<Option<ResolvedId>, ResolverError> {
    let basedir = match importer {
      Some(importer) => match Path::new(importer).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => self.cwd(),
      },
      None => self.cwd(),
    };
    let fs_path = to_slash(&resolve_path(&basedir, id));

    // optimized files may not exist on disk yet; serve the versioned url
    if let Some(optimizer) = self.deps_optimizer(ssr) {
      if optimizer.is_optimized_dep_file(&fs_path) {
        if !DEP_VERSION_RE.is_match(&fs_path) {
          if let Some(metadata) = optimizer.metadata(ssr) {
            let versioned = inject_query(&fs_path, &format!("v={}", metadata.browser_hash));
            trace!("optimized dep file {id} -> {versioned}");
            return Ok(Some(ResolvedId::plain(versioned)));
          }
        }
        return Ok(Some(ResolvedId::plain(fs_path)));
      }
    }

    // direct imports from node_modules normalize to bare imports so the
    // version hashing logic is shared and modules are not duplicated
    let basedir_slash = to_slash(&basedir);
    if let Some(path_from_basedir) = fs_path.strip_prefix(basedir_slash.as_str()) {
      if let Some(bare_import) = path_from_basedir.strip_prefix("/node_modules/") {
        if let Some(resolved) = self.try_node_resolve(bare_import, importer, opts, target_web, ssr, None)? {
          if resolved.id.starts_with(&fs_path) {
            return Ok(Some(resolved));
          }
        }
      }
    }

    if target_web {
      if let Some(res) = self.try_resolve_browser_mapping(&fs_path, importer, opts, true, target_web)? {
        return Ok(Some(res));
      }
    }

    if let Some(res) = self.try_fs_resolve(&fs_path, opts, true, target_web)? {
      trace!("relative {id} -> {res}");
      // propagate the importer package's side-effect metadata
      if let Some(pkg) = importer.and_then(|i| self.cache.pkg_for_id(i)) {
        let side_effects = pkg.has_side_effects(&res);
        self.cache.set_pkg_for_id(&res, pkg);
        return Ok(Some(ResolvedId {
          id: res,
          external: false,
          module_side_effects: Some(side_effects),
        }));
      }
      return Ok(Some(ResolvedId::plain(res)));
    }

    Ok(None)
  }

  /// The `load` plugin hook: the runtime stub for browser-externalized ids.
  /// Production gets an empty export; development a proxy that throws with
  /// the original module name.
  pub fn load(&self, id: &str) -> Option<String> {
    if !id.starts_with(BROWSER_EXTERNAL_ID) {
      return None;
    }
    if self.options.is_production {
      return Some("export default {}".to_string());
    }
    let original = id.get(BROWSER_EXTERNAL_ID.len() + 1..).unwrap_or("");
    Some(format!(
      r#"export default new Proxy({{}}, {{
  get(_, key) {{
    throw new Error(`Module "{original}" has been externalized for browser compatibility. Cannot access "{original}.${{key}}" in client code.`)
  }}
}})"#
    ))
  }

  fn cwd(&self) -> PathBuf {
    self.cache.fs.cwd().unwrap_or_else(|_| self.options.root.clone())
  }
}

fn is_ts_importer(importer: Option<&str>, ctx: &ResolveContext) -> bool {
  if let Some(importer) = importer {
    if is_ts_request(importer) {
      return true;
    }
  }
  matches!(ctx.importer_lang.as_deref(), Some("ts" | "mts" | "cts" | "tsx"))
}

fn relative_to_cwd(cache: &Cache, importer: &str) -> String {
  let cwd = cache.fs.cwd().unwrap_or_else(|_| PathBuf::from("/"));
  Path::new(importer)
    .strip_prefix(&cwd)
    .map(to_slash)
    .unwrap_or_else(|_| importer.to_string())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::optimizer::test_util::{dep, StubOptimizer};

  /// A small dev-server project tree the scenarios share.
  fn project() -> InMemoryFileSystem {
    let mut fs = InMemoryFileSystem::default();
    fs.write_file("/p/index.html", "");
    fs.write_file("/p/main.js", "");
    fs.write_file("/p/src/app.ts", "");
    fs.write_file("/p/src/app.js", "");
    fs.write_file("/p/src/util.ts", "");
    fs.write_file("/p/src/other.js", "");

    fs.write_file(
      "/p/node_modules/foo/package.json",
      r#"{ "main": "foo.cjs", "module": "foo.mjs", "browser": "foo.browser.js" }"#,
    );
    fs.write_file("/p/node_modules/foo/foo.cjs", "module.exports = x");
    fs.write_file("/p/node_modules/foo/foo.mjs", "export default x");
    fs.write_file("/p/node_modules/foo/foo.browser.js", "module.exports = x");

    fs.write_file(
      "/p/node_modules/bar/package.json",
      r#"{ "exports": { "./sub": "./lib/sub.js" } }"#,
    );
    fs.write_file("/p/node_modules/bar/lib/sub.js", "");

    fs.write_file("/p/node_modules/react/package.json", r#"{ "main": "index.js" }"#);
    fs.write_file("/p/node_modules/react/index.js", "");
    fs.write_file(
      "/p/node_modules/x/node_modules/react/package.json",
      r#"{ "main": "index.js" }"#,
    );
    fs.write_file("/p/node_modules/x/node_modules/react/index.js", "");

    fs.write_file(
      "/p/node_modules/quiet/package.json",
      r#"{ "main": "index.js", "sideEffects": false, "browser": { "./server.js": "./client.js", "module-a": "./shim.js", "fs": false } }"#,
    );
    fs.write_file("/p/node_modules/quiet/index.js", "");
    fs.write_file("/p/node_modules/quiet/inner.js", "");
    fs.write_file("/p/node_modules/quiet/server.js", "");
    fs.write_file("/p/node_modules/quiet/client.js", "");
    fs.write_file("/p/node_modules/quiet/shim.js", "");

    fs
  }

  fn resolver() -> Resolver {
    resolver_with_options(ResolveOptions {
      root: "/p".into(),
      ..ResolveOptions::default()
    })
  }

  fn resolver_with_options(options: ResolveOptions) -> Resolver {
    Resolver::new(options, Arc::new(project()))
  }

  fn id_of(result: ResolveResult) -> String {
    match result {
      ResolveResult::Resolved(resolved) => resolved.id,
      other => panic!("expected a resolution, got {other:?}"),
    }
  }

  #[test]
  fn extensionless_ts_fallback() {
    let resolver = resolver();
    let res = resolver
      .resolve_id("./util.js", Some("/p/src/app.ts"), &ResolveContext::default())
      .unwrap();
    assert_eq!(id_of(res), "/p/src/util.ts");

    // a plain js importer does not get the fallback
    let res = resolver
      .resolve_id("./util.js", Some("/p/src/app.js"), &ResolveContext::default())
      .unwrap();
    assert_eq!(res, ResolveResult::Unresolved);

    // host metadata stands in for the extension
    let ctx = ResolveContext {
      importer_lang: Some("ts".into()),
      ..ResolveContext::default()
    };
    let res = resolver.resolve_id("./util.js", Some("/p/src/app.js"), &ctx).unwrap();
    assert_eq!(id_of(res), "/p/src/util.ts");
  }

  #[test]
  fn browser_umd_heuristic_prefers_module() {
    let resolver = resolver();
    let res = resolver
      .resolve_id("foo", Some("/p/src/app.js"), &ResolveContext::default())
      .unwrap();
    assert_eq!(id_of(res), "/p/node_modules/foo/foo.mjs");
  }

  #[test]
  fn deep_import_via_exports() {
    let resolver = resolver();
    let res = resolver
      .resolve_id("bar/sub", Some("/p/src/app.js"), &ResolveContext::default())
      .unwrap();
    assert_eq!(id_of(res), "/p/node_modules/bar/lib/sub.js");

    let err = resolver
      .resolve_id("bar/other", Some("/p/src/app.js"), &ResolveContext::default())
      .unwrap_err();
    assert_eq!(
      err.to_string(),
      "Package subpath './other' is not defined by \"exports\" in /p/node_modules/bar/package.json."
    );
  }

  #[test]
  fn dedupe_forces_the_root_copy() {
    let resolver = resolver_with_options(ResolveOptions {
      root: "/p".into(),
      dedupe: vec!["react".into()],
      ..ResolveOptions::default()
    });
    let res = resolver
      .resolve_id(
        "react",
        Some("/p/node_modules/x/node_modules/react/index.js"),
        &ResolveContext::default(),
      )
      .unwrap();
    assert_eq!(id_of(res), "/p/node_modules/react/index.js");
  }

  #[test]
  fn optimized_dep_file_gets_version_query() {
    let optimizer: Arc<dyn DepsOptimizer> = Arc::new(StubOptimizer {
      metadata: Some(DepOptimizationMetadata {
        browser_hash: "abc".into(),
        dep_info_list: Vec::new(),
      }),
      optimized_files: vec!["/p/node_modules/.vite/deps/".into()],
      ..StubOptimizer::default()
    });
    let resolver = resolver().with_deps_optimizer(optimizer);

    let res = resolver
      .resolve_id(
        "./foo.js",
        Some("/p/node_modules/.vite/deps/entry.js"),
        &ResolveContext::default(),
      )
      .unwrap();
    assert_eq!(id_of(res), "/p/node_modules/.vite/deps/foo.js?v=abc");

    // an already-versioned url is returned as-is
    let res = resolver
      .resolve_id(
        "./foo.js?v=abc",
        Some("/p/node_modules/.vite/deps/entry.js"),
        &ResolveContext::default(),
      )
      .unwrap();
    assert_eq!(id_of(res), "/p/node_modules/.vite/deps/foo.js?v=abc");
  }

  #[test]
  fn ssr_builtin_externalizes_or_errors() {
    let resolver = resolver();
    let ctx = ResolveContext {
      ssr: true,
      ..ResolveContext::default()
    };
    let res = resolver.resolve_id("fs", None, &ctx).unwrap();
    assert_eq!(
      res,
      ResolveResult::Resolved(ResolvedId {
        id: "fs".into(),
        external: true,
        module_side_effects: None,
      })
    );

    let resolver = resolver_with_options(ResolveOptions {
      root: "/p".into(),
      ssr_no_external: true,
      ..ResolveOptions::default()
    });
    let err = resolver.resolve_id("fs", Some("/p/src/app.js"), &ctx).unwrap_err();
    assert!(matches!(err, ResolverError::NodeBuiltinNotBundled { .. }));
    assert!(err.to_string().starts_with("Cannot bundle Node.js built-in \"fs\""));
  }

  #[test]
  fn client_builtin_redirects_to_the_stub() {
    let resolver = resolver();
    let res = resolver.resolve_id("fs", Some("/p/src/app.js"), &ResolveContext::default()).unwrap();
    assert_eq!(id_of(res), "__vite-browser-external:fs");

    let resolver = resolver_with_options(ResolveOptions {
      root: "/p".into(),
      is_production: true,
      ..ResolveOptions::default()
    });
    let res = resolver.resolve_id("fs", Some("/p/src/app.js"), &ResolveContext::default()).unwrap();
    assert_eq!(id_of(res), "__vite-browser-external");
  }

  #[test]
  fn browser_external_ids_pass_through() {
    let resolver = resolver();
    let res = resolver
      .resolve_id("__vite-browser-external:fs", None, &ResolveContext::default())
      .unwrap();
    assert_eq!(id_of(res), "__vite-browser-external:fs");
  }

  #[test]
  fn commonjs_artifacts_are_deferred() {
    let resolver = resolver();
    assert_eq!(
      resolver
        .resolve_id("/p/main.js?commonjs-proxy", None, &ResolveContext::default())
        .unwrap(),
      ResolveResult::Unresolved
    );
    assert_eq!(
      resolver.resolve_id("commonjsHelpers.js", None, &ResolveContext::default()).unwrap(),
      ResolveResult::Unresolved
    );
  }

  #[test]
  fn fs_escape_always_yields_a_path() {
    let resolver = resolver();
    let res = resolver.resolve_id("/@fs//p/main.js", None, &ResolveContext::default()).unwrap();
    assert_eq!(id_of(res), "/p/main.js");

    // missing files still resolve so downstream can 404
    let res = resolver.resolve_id("/@fs//p/gone.js", None, &ResolveContext::default()).unwrap();
    assert_eq!(id_of(res), "/p/gone.js");
  }

  #[test]
  fn root_relative_urls_resolve_against_root() {
    let resolver = resolver();
    let res = resolver.resolve_id("/src/app.ts", None, &ResolveContext::default()).unwrap();
    assert_eq!(id_of(res), "/p/src/app.ts");
  }

  #[test]
  fn external_urls_and_data_urls() {
    let resolver = resolver();
    let res = resolver
      .resolve_id("https://cdn.example.com/x.js", None, &ResolveContext::default())
      .unwrap();
    assert_eq!(
      res,
      ResolveResult::Resolved(ResolvedId {
        id: "https://cdn.example.com/x.js".into(),
        external: true,
        module_side_effects: None,
      })
    );

    assert_eq!(
      resolver
        .resolve_id("data:text/javascript,void 0", None, &ResolveContext::default())
        .unwrap(),
      ResolveResult::Ignored
    );
  }

  #[test]
  fn html_importer_prefers_relative() {
    let resolver = resolver();
    let res = resolver
      .resolve_id("main.js", Some("/p/index.html"), &ResolveContext::default())
      .unwrap();
    assert_eq!(id_of(res), "/p/main.js");
  }

  #[test]
  fn direct_node_modules_imports_normalize_to_bare() {
    let resolver = resolver();
    let res = resolver
      .resolve_id("./node_modules/react/index.js", Some("/p/main.js"), &ResolveContext::default())
      .unwrap();
    assert_eq!(id_of(res), "/p/node_modules/react/index.js");
  }

  #[test]
  fn relative_imports_inherit_importer_side_effects() {
    let resolver = resolver();
    let entry = id_of(
      resolver
        .resolve_id("quiet", Some("/p/src/app.js"), &ResolveContext::default())
        .unwrap(),
    );
    assert_eq!(entry, "/p/node_modules/quiet/index.js");

    let res = resolver.resolve_id("./inner.js", Some(&entry), &ResolveContext::default()).unwrap();
    assert_eq!(
      res,
      ResolveResult::Resolved(ResolvedId {
        id: "/p/node_modules/quiet/inner.js".into(),
        external: false,
        module_side_effects: Some(false),
      })
    );
  }

  #[test]
  fn importer_browser_map_applies_to_files_and_bare_ids() {
    let resolver = resolver();
    let entry = id_of(
      resolver
        .resolve_id("quiet", Some("/p/src/app.js"), &ResolveContext::default())
        .unwrap(),
    );

    // file-path mode
    let res = resolver.resolve_id("./server.js", Some(&entry), &ResolveContext::default()).unwrap();
    assert_eq!(id_of(res), "/p/node_modules/quiet/client.js");

    // id mode
    let res = resolver.resolve_id("module-a", Some(&entry), &ResolveContext::default()).unwrap();
    assert_eq!(id_of(res), "/p/node_modules/quiet/shim.js");

    // `false` externalizes for the browser
    let res = resolver.resolve_id("fs", Some(&entry), &ResolveContext::default()).unwrap();
    assert_eq!(id_of(res), "__vite-browser-external");
  }

  #[test]
  fn optimized_url_precedes_fs_escape() {
    let optimizer: Arc<dyn DepsOptimizer> = Arc::new(StubOptimizer {
      metadata: Some(DepOptimizationMetadata {
        browser_hash: "abc".into(),
        dep_info_list: Vec::new(),
      }),
      ..StubOptimizer::default()
    });
    let resolver = resolver().with_deps_optimizer(optimizer);

    let res = resolver
      .resolve_id("/node_modules/.vite/deps/foo.js?v=abc", None, &ResolveContext::default())
      .unwrap();
    assert_eq!(id_of(res), "/p/node_modules/.vite/deps/foo.js?v=abc");
  }

  #[test]
  fn bare_import_is_handed_to_the_optimizer() {
    let optimizer = Arc::new(StubOptimizer {
      metadata: Some(DepOptimizationMetadata {
        browser_hash: "abc".into(),
        dep_info_list: Vec::new(),
      }),
      ..StubOptimizer::default()
    });
    let resolver = resolver().with_deps_optimizer(optimizer.clone());

    let res = resolver
      .resolve_id("react", Some("/p/src/app.js"), &ResolveContext::default())
      .unwrap();
    assert_eq!(id_of(res), "/p/node_modules/.vite/deps/react.js?v=abc");
    assert_eq!(
      optimizer.registered.lock().unwrap().as_slice(),
      &[("react".to_string(), "/p/node_modules/react/index.js".to_string())]
    );
  }

  #[test]
  fn excluded_deps_get_a_version_query_instead() {
    let optimizer: Arc<dyn DepsOptimizer> = Arc::new(StubOptimizer {
      metadata: Some(DepOptimizationMetadata {
        browser_hash: "abc".into(),
        dep_info_list: Vec::new(),
      }),
      excluded: vec!["react".into()],
      ..StubOptimizer::default()
    });
    let resolver = resolver().with_deps_optimizer(optimizer);

    let res = resolver
      .resolve_id("react", Some("/p/src/app.js"), &ResolveContext::default())
      .unwrap();
    assert_eq!(id_of(res), "/p/node_modules/react/index.js?v=abc");
  }

  #[test]
  fn scan_phase_skips_the_optimizer() {
    let optimizer = Arc::new(StubOptimizer {
      metadata: Some(DepOptimizationMetadata {
        browser_hash: "abc".into(),
        dep_info_list: vec![dep("react", Some("/p/node_modules/react/index.js"))],
      }),
      ..StubOptimizer::default()
    });
    let resolver = resolver().with_deps_optimizer(optimizer.clone());

    let ctx = ResolveContext {
      scan: true,
      ..ResolveContext::default()
    };
    let res = resolver.resolve_id("react", Some("/p/src/app.js"), &ctx).unwrap();
    assert_eq!(id_of(res), "/p/node_modules/react/index.js");
    assert!(optimizer.registered.lock().unwrap().is_empty());
  }

  #[test]
  fn already_optimized_bare_imports_short_circuit() {
    let optimizer: Arc<dyn DepsOptimizer> = Arc::new(StubOptimizer {
      metadata: Some(DepOptimizationMetadata {
        browser_hash: "abc".into(),
        dep_info_list: vec![dep("react", Some("/p/node_modules/react/index.js"))],
      }),
      ..StubOptimizer::default()
    });
    let resolver = resolver().with_deps_optimizer(optimizer);

    let res = resolver
      .resolve_id("react", Some("/p/src/app.js"), &ResolveContext::default())
      .unwrap();
    assert_eq!(id_of(res), "/p/node_modules/.vite/deps/react.js?v=abc");
  }

  #[test]
  fn externalized_bare_imports_keep_their_specifier() {
    let resolver = resolver_with_options(ResolveOptions {
      root: "/p".into(),
      is_build: true,
      ..ResolveOptions::default()
    })
    .with_externalize_predicate(Arc::new(|id| id == "react"));

    let ctx = ResolveContext {
      ssr: true,
      ..ResolveContext::default()
    };
    let res = resolver.resolve_id("react", Some("/p/src/app.js"), &ctx).unwrap();
    assert_eq!(
      res,
      ResolveResult::Resolved(ResolvedId {
        id: "react".into(),
        external: true,
        module_side_effects: Some(true),
      })
    );
  }

  #[test]
  fn ssr_webworker_keeps_browser_semantics() {
    let resolver = resolver_with_options(ResolveOptions {
      root: "/p".into(),
      ssr_target: SsrTarget::Webworker,
      ..ResolveOptions::default()
    });
    let ctx = ResolveContext {
      ssr: true,
      ..ResolveContext::default()
    };
    // browser field still applies under the webworker target
    let res = resolver.resolve_id("foo", Some("/p/src/app.js"), &ctx).unwrap();
    assert_eq!(id_of(res), "/p/node_modules/foo/foo.mjs");
  }

  #[test]
  fn load_produces_the_externalization_stub() {
    let resolver = resolver();
    let source = resolver.load("__vite-browser-external:fs").unwrap();
    assert!(source.contains(
      "Module \"fs\" has been externalized for browser compatibility. Cannot access \"fs.${key}\" in client code."
    ));

    let resolver = resolver_with_options(ResolveOptions {
      root: "/p".into(),
      is_production: true,
      ..ResolveOptions::default()
    });
    assert_eq!(resolver.load("__vite-browser-external").unwrap(), "export default {}");
    assert_eq!(resolver.load("/p/main.js"), None);
  }

  #[test]
  fn resolved_ids_are_absolute_or_sentinels() {
    let resolver = resolver();
    for (id, importer) in [
      ("./util.js", Some("/p/src/app.ts")),
      ("foo", Some("/p/src/app.js")),
      ("bar/sub", Some("/p/src/app.js")),
      ("/src/app.ts", None),
      ("fs", Some("/p/src/app.js")),
    ] {
      let res = resolver.resolve_id(id, importer, &ResolveContext::default()).unwrap();
      if let ResolveResult::Resolved(resolved) = res {
        assert!(
          resolved.external
            || resolved.id.starts_with('/')
            || resolved.id.starts_with(BROWSER_EXTERNAL_ID),
          "unexpected id shape: {}",
          resolved.id
        );
      }
    }
  }
}
