use std::path::{Component, Path, PathBuf};

/// Reserved prefix for explicit filesystem escapes in served urls.
pub const FS_PREFIX: &str = "/@fs/";

/// Split `file?query#hash` into the file part and the postfix beginning at
/// the first `?` or `#`, whichever appears first.
pub fn split_file_and_postfix(path: &str) -> (&str, &str) {
  let file = clean_url(path);
  (file, &path[file.len()..])
}

pub fn clean_url(url: &str) -> &str {
  match url.find(|c| c == '?' || c == '#') {
    Some(i) => &url[..i],
    None => url,
  }
}

/// Normalize separators to forward slashes. A no-op on posix systems.
pub fn to_slash(path: &Path) -> String {
  #[cfg(windows)]
  {
    path.to_string_lossy().replace('\\', "/")
  }
  #[cfg(not(windows))]
  {
    path.to_string_lossy().into_owned()
  }
}

/// Collapse `.` and `..` segments lexically, without consulting the
/// filesystem. `..` never climbs past a root or drive prefix
/// (`PathBuf::pop` refuses to).
pub fn normalize_components(path: &Path) -> PathBuf {
  let mut out = PathBuf::new();
  for part in path.components() {
    match part {
      Component::CurDir => {}
      Component::ParentDir => {
        out.pop();
      }
      part => out.push(part.as_os_str()),
    }
  }
  out
}

/// Resolve `subpath` against the `base` directory, collapsing `.` and `..`
/// segments. Absolute subpaths win outright.
pub fn resolve_path(base: &Path, subpath: &str) -> PathBuf {
  let subpath = Path::new(subpath);
  if subpath.is_absolute() || matches!(subpath.components().next(), Some(Component::Prefix(..))) {
    normalize_components(subpath)
  } else {
    normalize_components(&base.join(subpath))
  }
}

/// `true` for `C:`-style drive-prefixed paths, which are absolute but do not
/// begin with a slash.
pub fn is_windows_drive_path(path: &str) -> bool {
  let bytes = path.as_bytes();
  bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Strip the `/@fs/` escape prefix and recover an absolute filesystem path.
pub fn fs_path_from_id(id: &str) -> String {
  let fs_path = to_slash(&normalize_components(Path::new(
    id.strip_prefix(FS_PREFIX).unwrap_or(id),
  )));
  if fs_path.starts_with('/') || is_windows_drive_path(&fs_path) {
    fs_path
  } else {
    format!("/{fs_path}")
  }
}

/// Insert `query` (a `key=value` pair) into `url`, before any existing query
/// and hash.
pub fn inject_query(url: &str, query: &str) -> String {
  let (file, postfix) = split_file_and_postfix(url);
  let (search, hash) = match postfix.find('#') {
    Some(i) => (&postfix[..i], &postfix[i..]),
    None => (postfix, ""),
  };
  if search.is_empty() {
    format!("{file}?{query}{hash}")
  } else {
    format!("{file}?{query}&{}{hash}", &search[1..])
  }
}

/// Normalize a `/`-separated relative path the way `path.posix.normalize`
/// does: collapse `.` and `..` segments and duplicate slashes.
pub fn normalize_posix(path: &str) -> String {
  let absolute = path.starts_with('/');
  let mut segments: Vec<&str> = Vec::new();
  for segment in path.split('/') {
    match segment {
      "" | "." => {}
      ".." => {
        if matches!(segments.last(), Some(&s) if s != "..") {
          segments.pop();
        } else if !absolute {
          segments.push("..");
        }
      }
      _ => segments.push(segment),
    }
  }
  let joined = segments.join("/");
  if absolute {
    format!("/{joined}")
  } else if joined.is_empty() {
    ".".to_string()
  } else {
    joined
  }
}

pub fn dirname(path: &str) -> &str {
  match path.rfind('/') {
    Some(0) => "/",
    Some(i) => &path[..i],
    None => ".",
  }
}

pub fn basename(path: &str) -> &str {
  match path.rfind('/') {
    Some(i) => &path[i + 1..],
    None => path,
  }
}

/// The file extension including the leading dot, or `""`.
pub fn extname(path: &str) -> &str {
  let base = basename(path);
  match base.rfind('.') {
    Some(i) if i > 0 => &base[i..],
    _ => "",
  }
}

/// `true` when the request points at a TypeScript source file.
pub fn is_ts_request(url: &str) -> bool {
  matches!(extname(clean_url(url)), ".ts" | ".mts" | ".cts" | ".tsx")
}
