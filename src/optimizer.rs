use std::path::Path;
use std::sync::Arc;

use tracing::trace;

use crate::error::ResolverError;
use crate::path::dirname;
use crate::{ResolveOptions, Resolver};

/// A pre-bundled dependency the optimizer serves under a versioned url.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizedDepInfo {
  pub id: String,
  pub file: String,
  /// The source file the entry was bundled from. Chunks carry none.
  pub src: Option<String>,
  pub browser_hash: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DepOptimizationMetadata {
  pub browser_hash: String,
  pub dep_info_list: Vec<OptimizedDepInfo>,
}

/// The dependency-optimizer surface the resolver consumes. The optimizer
/// itself lives with the dev server; the resolver only reads its views and
/// registers missing imports.
pub trait DepsOptimizer: Send + Sync {
  /// Block until the initial dependency scan has finished. Implementations
  /// that are already past scanning return immediately.
  fn wait_for_scan(&self) {}

  /// `None` while the optimizer has not produced metadata yet.
  fn metadata(&self, ssr: bool) -> Option<DepOptimizationMetadata>;

  fn is_optimized_dep_url(&self, id: &str) -> bool;

  fn is_optimized_dep_file(&self, path: &str) -> bool;

  /// The `optimizeDeps.exclude` view.
  fn is_excluded(&self, pkg_id: &str) -> bool;

  fn register_missing_import(&self, id: &str, resolved: &str, ssr: bool) -> OptimizedDepInfo;

  fn optimized_dep_id(&self, info: &OptimizedDepInfo) -> String;
}

impl Resolver {
  /// Map a bare id onto an already-optimized dependency, either directly or
  /// through a nested-dependency entry whose id ends with it.
  pub(crate) fn try_optimized_resolve(
    &self,
    optimizer: &Arc<dyn DepsOptimizer>,
    ssr: bool,
    id: &str,
    importer: Option<&str>,
    opts: &ResolveOptions,
  ) -> Result<Option<String>, ResolverError> {
    optimizer.wait_for_scan();

    let metadata = match optimizer.metadata(ssr) {
      Some(metadata) => metadata,
      None => return Ok(None),
    };

    if let Some(info) = metadata.dep_info_list.iter().find(|info| info.id == id) {
      return Ok(Some(optimizer.optimized_dep_id(info)));
    }

    let importer = match importer {
      Some(importer) => importer,
      None => return Ok(None),
    };

    // check if the id is imported by a nested dependency, matching entries
    // like "my-lib > foo" by their recorded source file
    let mut resolved_src: Option<String> = None;
    let mut computed = false;
    for info in &metadata.dep_info_list {
      let src = match &info.src {
        Some(src) => src,
        // ignore chunks
        None => continue,
      };
      if !info.id.ends_with(id) {
        continue;
      }

      if !computed {
        computed = true;
        // this is best-effort only, so swallow resolution errors
        resolved_src = self
          .resolve_from(id, Path::new(dirname(importer)), opts)
          .ok()
          .flatten();
        if resolved_src.is_none() {
          break;
        }
      }

      if resolved_src.as_deref() == Some(src.as_str()) {
        trace!("optimized nested dep {} for {id}", info.id);
        return Ok(Some(optimizer.optimized_dep_id(info)));
      }
    }

    Ok(None)
  }
}
