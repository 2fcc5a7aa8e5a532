use crate::path::{is_windows_drive_path, FS_PREFIX};
use crate::BROWSER_EXTERNAL_ID;

/// Shape of an import specifier, computed once at dispatch entry. Kinds that
/// depend on collaborator state (optimized-dep urls) are checked by the
/// orchestrator instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecifierKind {
  /// Already redirected to the browser-external stub.
  BrowserExternal,
  /// CommonJS proxy artifacts owned by another plugin.
  CommonJsProxy,
  /// Explicit filesystem escape, `/@fs/` prefixed.
  FsEscape,
  /// Root-absolute url (leading `/`).
  RootUrl,
  Relative,
  /// Absolute filesystem path that is not a root-relative url
  /// (a windows drive path).
  Absolute,
  ExternalUrl,
  DataUrl,
  /// Bare package import, begins with a word character or `@scope/`.
  Bare,
  Unresolvable,
}

impl SpecifierKind {
  pub fn classify(id: &str) -> SpecifierKind {
    if id.is_empty() {
      SpecifierKind::Unresolvable
    } else if id.starts_with(BROWSER_EXTERNAL_ID) {
      SpecifierKind::BrowserExternal
    } else if id.contains("?commonjs") || id == "commonjsHelpers.js" {
      SpecifierKind::CommonJsProxy
    } else if id.starts_with(FS_PREFIX) {
      SpecifierKind::FsEscape
    } else if id.starts_with('.') {
      SpecifierKind::Relative
    } else if is_windows_drive_path(id) {
      SpecifierKind::Absolute
    } else if is_external_url(id) {
      SpecifierKind::ExternalUrl
    } else if id.starts_with("data:") {
      SpecifierKind::DataUrl
    } else if id.starts_with('/') {
      SpecifierKind::RootUrl
    } else if is_bare(id) {
      SpecifierKind::Bare
    } else {
      SpecifierKind::Unresolvable
    }
  }
}

fn is_bare(id: &str) -> bool {
  let first = id.as_bytes()[0];
  (first.is_ascii_alphanumeric() || first == b'_' || first == b'@') && !id.contains("://")
}

fn is_external_url(id: &str) -> bool {
  if id.starts_with("//") {
    return true;
  }
  match parse_scheme(id) {
    Some((_, rest)) => rest.starts_with("//"),
    None => false,
  }
}

// https://url.spec.whatwg.org/#scheme-state
fn parse_scheme(input: &str) -> Option<(&str, &str)> {
  if !input.starts_with(|c: char| c.is_ascii_alphabetic()) {
    return None;
  }
  for (i, c) in input.char_indices() {
    match c {
      'a'..='z' | 'A'..='Z' | '0'..='9' | '+' | '-' | '.' => {}
      ':' => return Some((&input[..i], &input[i + 1..])),
      _ => return None,
    }
  }

  // EOF before ':'
  None
}

/// Split a bare specifier into `(package id, subpath)`. The subpath does not
/// include the separating slash. Returns `None` for malformed scoped ids.
pub fn parse_package_specifier(specifier: &str) -> Option<(&str, &str)> {
  let idx = specifier.find('/');
  if specifier.starts_with('@') {
    let idx = idx?;
    if let Some(next) = specifier[idx + 1..].find('/') {
      Some((&specifier[0..idx + 1 + next], &specifier[idx + next + 2..]))
    } else {
      Some((specifier, ""))
    }
  } else if let Some(idx) = idx {
    Some((&specifier[0..idx], &specifier[idx + 1..]))
  } else {
    Some((specifier, ""))
  }
}
