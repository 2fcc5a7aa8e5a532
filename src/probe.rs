use std::path::Path;

use tracing::trace;

use crate::error::ResolverError;
use crate::path::{basename, dirname, split_file_and_postfix, to_slash};
use crate::{ResolveOptions, Resolver};

impl Resolver {
  /// Probe `fs_path` (which may carry a `?query#hash` postfix) for the
  /// first existing file, trying the configured extensions and, when
  /// `try_index` is set, directory indexes and adjacent manifests.
  pub(crate) fn try_fs_resolve(
    &self,
    fs_path: &str,
    opts: &ResolveOptions,
    try_index: bool,
    target_web: bool,
  ) -> Result<Option<String>, ResolverError> {
    let (file, postfix) = split_file_and_postfix(fs_path);
    let try_prefix = opts.try_prefix.as_deref();

    // the postfix might be part of the file name itself (#4703)
    if !postfix.is_empty() {
      if let Some(res) =
        self.try_resolve_file(fs_path, "", opts, false, target_web, try_prefix, opts.skip_package_json)?
      {
        return Ok(Some(res));
      }
    }

    if let Some(res) =
      self.try_resolve_file(file, postfix, opts, false, target_web, try_prefix, opts.skip_package_json)?
    {
      return Ok(Some(res));
    }

    for ext in &opts.extensions {
      if !postfix.is_empty() {
        if let Some(res) = self.try_resolve_file(
          &format!("{fs_path}{ext}"),
          "",
          opts,
          false,
          target_web,
          try_prefix,
          opts.skip_package_json,
        )? {
          return Ok(Some(res));
        }
      }

      if let Some(res) = self.try_resolve_file(
        &format!("{file}{ext}"),
        postfix,
        opts,
        false,
        target_web,
        try_prefix,
        opts.skip_package_json,
      )? {
        return Ok(Some(res));
      }
    }

    let try_index = try_index && opts.try_index;
    if !postfix.is_empty() {
      if let Some(res) =
        self.try_resolve_file(fs_path, "", opts, try_index, target_web, try_prefix, opts.skip_package_json)?
      {
        return Ok(Some(res));
      }
    }

    self.try_resolve_file(file, postfix, opts, try_index, target_web, try_prefix, opts.skip_package_json)
  }

  #[allow(clippy::too_many_arguments)]
  fn try_resolve_file(
    &self,
    file: &str,
    postfix: &str,
    opts: &ResolveOptions,
    try_index: bool,
    target_web: bool,
    try_prefix: Option<&str>,
    skip_package_json: bool,
  ) -> Result<Option<String>, ResolverError> {
    let path = Path::new(file);
    if self.cache.fs.is_file(path) {
      let resolved = self.get_real_path(path, opts)?;
      return Ok(Some(format!("{resolved}{postfix}")));
    }

    if try_index && self.cache.fs.is_dir(path) {
      if !skip_package_json {
        let manifest = path.join("package.json");
        if self.cache.fs.is_file(&manifest) {
          // load errors other than a missing manifest propagate
          let pkg = self.cache.load_package_data(&manifest, opts.preserve_symlinks)?;
          let resolved = self.resolve_package_entry(file, &pkg, target_web, opts)?;
          return Ok(Some(resolved));
        }
      }
      if let Some(index) = self.try_fs_resolve(&format!("{file}/index"), opts, true, true)? {
        return Ok(Some(format!("{index}{postfix}")));
      }
    }

    let try_ts_extension = opts.is_from_ts_importer && is_possible_ts_output(file);
    if try_ts_extension {
      for src_path in potential_ts_src_paths(file) {
        if let Some(res) =
          self.try_resolve_file(&src_path, postfix, opts, try_index, target_web, None, skip_package_json)?
        {
          return Ok(Some(res));
        }
      }
      return Ok(None);
    }

    if let Some(prefix) = try_prefix {
      let prefixed = format!("{}/{}{}", dirname(file), prefix, basename(file));
      return self.try_resolve_file(&prefixed, postfix, opts, try_index, target_web, None, false);
    }

    Ok(None)
  }

  /// The final path of a resolved file, passed through `realpath` unless
  /// symlinks are preserved.
  fn get_real_path(&self, path: &Path, opts: &ResolveOptions) -> Result<String, ResolverError> {
    if opts.preserve_symlinks {
      Ok(to_slash(path))
    } else {
      let real = self.cache.canonicalize(path)?;
      if real != path {
        trace!("symlink {} -> {}", path.display(), real.display());
      }
      Ok(to_slash(&real))
    }
  }
}

/// Whether a request could be the compiled output of a TypeScript source.
fn is_possible_ts_output(file: &str) -> bool {
  matches!(crate::path::extname(file), ".js" | ".jsx" | ".mjs" | ".cjs")
}

/// The TypeScript sources a JS-like request may have been emitted from.
fn potential_ts_src_paths(file: &str) -> Vec<String> {
  let ext = crate::path::extname(file);
  let stem = &file[..file.len() - ext.len()];
  match ext {
    ".js" => vec![format!("{stem}.ts"), format!("{stem}.tsx")],
    ".jsx" => vec![format!("{stem}.tsx")],
    ".mjs" => vec![format!("{stem}.mts")],
    ".cjs" => vec![format!("{stem}.cts")],
    _ => Vec::new(),
  }
}
