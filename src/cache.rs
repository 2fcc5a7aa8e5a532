use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::trace;

use crate::error::ResolverError;
use crate::fs::{FileSystemRealPathCache, FileSystemRef};
use crate::package::PackageData;
use crate::package_json::PackageJson;

/// Shared, insert-only state of one resolver instance: the manifest cache,
/// the realpath cache, and the map from resolved file ids back to the
/// package that produced them.
pub struct Cache {
  pub fs: FileSystemRef,
  packages: DashMap<PathBuf, Result<Arc<PackageData>, ResolverError>>,
  realpath_cache: FileSystemRealPathCache,
  id_to_pkg: DashMap<String, Arc<PackageData>>,
}

impl std::fmt::Debug for Cache {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Cache").finish()
  }
}

impl Cache {
  pub fn new(fs: FileSystemRef) -> Self {
    Self {
      fs,
      packages: DashMap::new(),
      realpath_cache: DashMap::new(),
      id_to_pkg: DashMap::new(),
    }
  }

  pub fn canonicalize(&self, path: &Path) -> std::io::Result<PathBuf> {
    self.fs.canonicalize(path, &self.realpath_cache)
  }

  /// Load and cache the manifest at `manifest_path`.
  pub fn load_package_data(
    &self,
    manifest_path: &Path,
    preserve_symlinks: bool,
  ) -> Result<Arc<PackageData>, ResolverError> {
    let manifest_path = if preserve_symlinks {
      manifest_path.to_path_buf()
    } else {
      self.canonicalize(manifest_path)?
    };

    if let Some(cached) = self.packages.get(&manifest_path) {
      return cached.clone();
    }

    let entry = self
      .fs
      .read_to_string(&manifest_path)
      .map_err(ResolverError::from)
      .and_then(|contents| {
        PackageJson::parse(manifest_path.clone(), &contents).map_err(|e| ResolverError::Json {
          path: manifest_path.clone(),
          line: e.line(),
          column: e.column(),
          message: e.to_string(),
        })
      })
      .map(|data| Arc::new(PackageData::new(data)));

    self.packages.insert(manifest_path, entry.clone());
    entry
  }

  /// Walk ancestor `node_modules` directories from `basedir` looking for
  /// `pkg_id`. Manifests that fail to parse are skipped; unexpected IO
  /// errors propagate.
  pub fn resolve_package_data(
    &self,
    pkg_id: &str,
    basedir: &Path,
    preserve_symlinks: bool,
  ) -> Result<Option<Arc<PackageData>>, ResolverError> {
    for dir in basedir.ancestors() {
      let manifest = dir.join("node_modules").join(pkg_id).join("package.json");
      if !self.fs.is_file(&manifest) {
        continue;
      }
      match self.load_package_data(&manifest, preserve_symlinks) {
        Ok(pkg) => return Ok(Some(pkg)),
        Err(ResolverError::Json { ref path, .. }) => {
          trace!("parsing failed: {}", path.display());
        }
        Err(e) => return Err(e),
      }
    }

    Ok(None)
  }

  /// Remember which package produced a resolved id, so later relative
  /// resolutions from inside that file see its `browser` map and
  /// `sideEffects` predicate.
  pub fn set_pkg_for_id(&self, id: &str, pkg: Arc<PackageData>) {
    self.id_to_pkg.insert(id.to_string(), pkg);
  }

  pub fn pkg_for_id(&self, id: &str) -> Option<Arc<PackageData>> {
    self.id_to_pkg.get(id).map(|p| p.clone())
  }
}
