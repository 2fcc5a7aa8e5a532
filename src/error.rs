use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolverError {
  /// Every entry candidate of a package failed to resolve.
  #[error("Failed to resolve entry for package \"{package}\". The package may have incorrect main/module/exports specified in its package.json{}", fmt_details(.details))]
  PackageEntryNotFound {
    package: String,
    details: Option<String>,
  },

  /// The `exports` field excludes the requested subpath.
  #[error("Package subpath '{subpath}' is not defined by \"exports\" in {}.", .package_json_path.display())]
  PackagePathNotExported {
    subpath: String,
    package_json_path: PathBuf,
  },

  /// A Node built-in was imported while `ssr.noExternal` forbids externals.
  #[error("Cannot bundle Node.js built-in \"{id}\"{}. Consider disabling ssr.noExternal or remove the built-in dependency.", fmt_importer(.importer))]
  NodeBuiltinNotBundled {
    id: String,
    importer: Option<String>,
  },

  #[error("Failed to parse {}: {message}", .path.display())]
  Json {
    path: PathBuf,
    line: usize,
    column: usize,
    message: String,
  },

  #[error("IO error: {0}")]
  Io(IoError),
}

fn fmt_details(details: &Option<String>) -> String {
  match details {
    Some(details) => format!(": {details}"),
    None => ".".to_string(),
  }
}

fn fmt_importer(importer: &Option<String>) -> String {
  match importer {
    Some(importer) => format!(" imported from \"{importer}\""),
    None => String::new(),
  }
}

/// Wrapper keeping `ResolverError` cloneable and comparable so that cached
/// manifest load results can be shared across lookups.
#[derive(Debug, Clone)]
pub struct IoError(Arc<std::io::Error>);

impl std::fmt::Display for IoError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    self.0.fmt(f)
  }
}

impl PartialEq for IoError {
  fn eq(&self, other: &Self) -> bool {
    self.0.kind() == other.0.kind()
  }
}

impl From<std::io::Error> for ResolverError {
  fn from(e: std::io::Error) -> Self {
    ResolverError::Io(IoError(Arc::new(e)))
  }
}
