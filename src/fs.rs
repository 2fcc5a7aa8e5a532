use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;

/// File-system abstraction instance shared by the resolver and its caches.
///
/// This should be `OsFileSystem` for non-testing environments and
/// `InMemoryFileSystem` for testing.
pub type FileSystemRef = Arc<dyn FileSystem + Send + Sync>;

pub type FileSystemRealPathCache = DashMap<PathBuf, Option<PathBuf>>;

/// Trait abstracting the file-system operations the resolver performs.
pub trait FileSystem {
  fn cwd(&self) -> io::Result<PathBuf>;
  fn canonicalize(&self, path: &Path, cache: &FileSystemRealPathCache) -> io::Result<PathBuf>;
  fn read_to_string(&self, path: &Path) -> io::Result<String>;
  fn is_file(&self, path: &Path) -> bool;
  fn is_dir(&self, path: &Path) -> bool;
}

#[derive(Default)]
pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
  fn cwd(&self) -> io::Result<PathBuf> {
    std::env::current_dir()
  }

  fn canonicalize(&self, path: &Path, cache: &FileSystemRealPathCache) -> io::Result<PathBuf> {
    canonicalize(path, cache)
  }

  fn read_to_string(&self, path: &Path) -> io::Result<String> {
    std::fs::read_to_string(path)
  }

  fn is_file(&self, path: &Path) -> bool {
    path.is_file()
  }

  fn is_dir(&self, path: &Path) -> bool {
    path.is_dir()
  }
}

/// `std::fs::canonicalize`, except symlink targets are remembered in the
/// shared cache so repeated resolutions of the same tree stay cheap.
pub fn canonicalize(path: &Path, cache: &FileSystemRealPathCache) -> io::Result<PathBuf> {
  resolve_symlinks(path, |prefix| {
    if let Some(known) = cache.get(prefix) {
      return Ok(known.clone());
    }
    let target = if std::fs::symlink_metadata(prefix)?.is_symlink() {
      Some(std::fs::read_link(prefix)?)
    } else {
      None
    };
    cache.insert(prefix.to_path_buf(), target.clone());
    Ok(target)
  })
}

/// Walk `path` segment by segment, collapsing `.`/`..` and splicing in
/// symlink targets as `read_link` reports them. `read_link` answers for
/// every prefix of the path built so far; `Ok(None)` means "not a link".
fn resolve_symlinks<F>(path: &Path, mut read_link: F) -> io::Result<PathBuf>
where
  F: FnMut(&Path) -> io::Result<Option<PathBuf>>,
{
  let mut resolved = PathBuf::new();
  // unprocessed path chunks, deepest on top
  let mut pending = vec![path.to_path_buf()];
  let mut hops = 0;

  while let Some(chunk) = pending.pop() {
    let mut parts = chunk.components();
    while let Some(part) = parts.next() {
      match part {
        Component::CurDir => {}
        Component::ParentDir => {
          resolved.pop();
        }
        Component::Prefix(_) | Component::RootDir => resolved.push(part.as_os_str()),
        Component::Normal(name) => {
          resolved.push(name);
          let target = match read_link(&resolved)? {
            Some(target) => target,
            None => continue,
          };

          hops += 1;
          if hops > 32 {
            return Err(io::Error::new(
              io::ErrorKind::NotFound,
              "too many levels of symbolic links",
            ));
          }

          // requeue whatever is left of this chunk, then the link target
          // so it resolves first; absolute targets restart the walk
          let rest = parts.as_path();
          if !rest.as_os_str().is_empty() {
            pending.push(rest.to_path_buf());
          }
          if target.is_absolute() {
            resolved = PathBuf::new();
          } else {
            resolved.pop();
          }
          pending.push(target);
          break;
        }
      }
    }
  }

  Ok(resolved)
}

/// In memory implementation of a file-system entry.
enum InMemoryEntry {
  File { contents: String },
  Directory,
  Symlink { target: PathBuf },
}

/// In memory implementation of the `FileSystem` trait, for testing purpouses.
#[derive(Default)]
pub struct InMemoryFileSystem {
  entries: HashMap<PathBuf, InMemoryEntry>,
  cwd: Option<PathBuf>,
}

impl InMemoryFileSystem {
  pub fn set_cwd(&mut self, cwd: impl Into<PathBuf>) {
    self.cwd = Some(cwd.into());
  }

  pub fn create_directory(&mut self, path: impl AsRef<Path>) {
    let path = path.as_ref();
    self.create_parents(path);
    self.entries.insert(path.into(), InMemoryEntry::Directory);
  }

  /// Write a file at path, creating the parent directories.
  pub fn write_file(&mut self, path: impl AsRef<Path>, contents: impl Into<String>) {
    let path = path.as_ref();
    self.create_parents(path);
    self.entries.insert(
      path.into(),
      InMemoryEntry::File {
        contents: contents.into(),
      },
    );
  }

  pub fn symlink(&mut self, path: impl AsRef<Path>, target: impl Into<PathBuf>) {
    let path = path.as_ref();
    self.create_parents(path);
    self.entries.insert(
      path.into(),
      InMemoryEntry::Symlink {
        target: target.into(),
      },
    );
  }

  fn create_parents(&mut self, path: &Path) {
    for dir in path.ancestors().skip(1) {
      if dir.as_os_str().is_empty() || self.entries.contains_key(dir) {
        continue;
      }
      self.entries.insert(dir.to_path_buf(), InMemoryEntry::Directory);
    }
  }

  /// Resolve `.`/`..` segments and symlinks, mirroring what the OS
  /// canonicalize does for on-disk trees.
  fn resolve_links(&self, path: &Path) -> io::Result<PathBuf> {
    resolve_symlinks(path, |prefix| {
      Ok(match self.entries.get(prefix) {
        Some(InMemoryEntry::Symlink { target }) => Some(target.clone()),
        _ => None,
      })
    })
  }
}

impl FileSystem for InMemoryFileSystem {
  fn cwd(&self) -> io::Result<PathBuf> {
    Ok(self.cwd.clone().unwrap_or_else(|| PathBuf::from("/")))
  }

  fn canonicalize(&self, path: &Path, _cache: &FileSystemRealPathCache) -> io::Result<PathBuf> {
    self.resolve_links(path)
  }

  fn read_to_string(&self, path: &Path) -> io::Result<String> {
    let path = self.resolve_links(path)?;
    match self.entries.get(&path) {
      Some(InMemoryEntry::File { contents }) => Ok(contents.clone()),
      Some(_) => Err(io::Error::new(io::ErrorKind::InvalidInput, "path is a directory")),
      None => Err(io::Error::new(io::ErrorKind::NotFound, "file not found")),
    }
  }

  fn is_file(&self, path: &Path) -> bool {
    match self.resolve_links(path) {
      Ok(path) => matches!(self.entries.get(&path), Some(InMemoryEntry::File { .. })),
      Err(_) => false,
    }
  }

  fn is_dir(&self, path: &Path) -> bool {
    match self.resolve_links(path) {
      Ok(path) => matches!(self.entries.get(&path), Some(InMemoryEntry::Directory)),
      Err(_) => false,
    }
  }
}
