//! Directory walking with flat and recursive listing caches.
//!
//! ```text
//! load(dir, recursive=false)            load(dir, recursive=true)
//!        │                                       │
//!        ▼                                       ▼
//!   stat(dir).mtime                      recursive cache hit? ──► list
//!        │                                       │ miss
//!        ├─► flat cache hit and                  ▼
//!        │   stamped >= mtime? ──► list     walk subtree (leaves only)
//!        │                                       │
//!        ├─► drop recursive entries for          ▼
//!        │   ancestors stamped < mtime      store + return
//!        ▼ miss
//!   walk one level (folders + accepted files) ──► store + return
//! ```
//!
//! Hidden entries (leading `.`) are never listed or descended into.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

use super::entry::{FileEntry, SharedFileList, SortedFileList};
use crate::cache::BoundedCache;

/// Number of one-level listings retained.
pub const FLAT_CACHE_CAPACITY: usize = 10;

/// Number of recursive listings retained.
pub const RECURSIVE_CACHE_CAPACITY: usize = 5;

/// Errors raised while indexing a directory.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Directory not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("I/O error reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl IndexError {
    fn io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            IndexError::NotFound(path.to_path_buf())
        } else {
            IndexError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// Builds and caches directory listings for one media handler.
#[derive(Debug)]
pub struct DirectoryIndexer {
    flat: BoundedCache<PathBuf, SharedFileList>,
    recursive: BoundedCache<PathBuf, SharedFileList>,
    walks: AtomicU64,
}

impl DirectoryIndexer {
    pub fn new() -> Self {
        Self::with_capacities(FLAT_CACHE_CAPACITY, RECURSIVE_CACHE_CAPACITY)
    }

    pub fn with_capacities(flat: usize, recursive: usize) -> Self {
        Self {
            flat: BoundedCache::new(flat),
            recursive: BoundedCache::new(recursive),
            walks: AtomicU64::new(0),
        }
    }

    /// Return the listing for `dir`, walking the filesystem only when no
    /// valid cached listing exists.
    ///
    /// # Arguments
    ///
    /// * `dir` - Directory to list
    /// * `recursive` - List every accepted file in the subtree instead of
    ///   one level
    /// * `accept` - Predicate deciding which files are listed; folders in
    ///   a one-level listing are always kept
    ///
    /// # Errors
    ///
    /// Returns `IndexError` if `dir` does not exist, is not a directory,
    /// or cannot be read.
    pub fn load(
        &self,
        dir: &Path,
        recursive: bool,
        accept: &dyn Fn(&Path) -> bool,
    ) -> Result<SharedFileList, IndexError> {
        let key = dir.to_path_buf();

        if recursive {
            if let Some(list) = self.recursive.get(&key) {
                tracing::trace!(path = %dir.display(), "Recursive listing cache hit");
                return Ok(list);
            }
        } else {
            let modified = directory_mtime(dir)?;
            self.drop_stale_recursive(dir, modified);

            if let Some((list, stamped)) = self.flat.get_with_time(&key) {
                if stamped >= modified {
                    tracing::trace!(path = %dir.display(), "Flat listing cache hit");
                    return Ok(list);
                }
                tracing::debug!(path = %dir.display(), "Flat listing is stale");
            }
        }

        let list = SortedFileList::new(self.walk(dir, recursive, accept)?).into_shared();
        if recursive {
            self.recursive.put(key, list.clone());
        } else {
            self.flat.put(key, list.clone());
        }
        Ok(list)
    }

    /// Drop every cached listing.
    pub fn invalidate_all(&self) {
        self.flat.clear();
        self.recursive.clear();
    }

    /// Whether a recursive listing for `dir` is currently cached.
    pub fn has_recursive(&self, dir: &Path) -> bool {
        self.recursive.contains_key(&dir.to_path_buf())
    }

    /// Whether a one-level listing for `dir` is currently cached.
    pub fn has_flat(&self, dir: &Path) -> bool {
        self.flat.contains_key(&dir.to_path_buf())
    }

    /// Number of filesystem walks performed so far.
    pub fn walk_count(&self) -> u64 {
        self.walks.load(Ordering::Relaxed)
    }

    /// A recursive listing rooted at or above `dir` that was built before
    /// `dir` last changed no longer reflects the subtree.
    fn drop_stale_recursive(&self, dir: &Path, modified: std::time::SystemTime) {
        for root in self.recursive.keys() {
            if !dir.starts_with(&root) {
                continue;
            }
            let stale = self
                .recursive
                .last_modified(&root)
                .is_some_and(|stamped| stamped < modified);
            if stale {
                tracing::debug!(
                    root = %root.display(),
                    changed = %dir.display(),
                    "Dropping stale recursive listing"
                );
                self.recursive.delete(&root);
            }
        }
    }

    fn walk(
        &self,
        dir: &Path,
        recursive: bool,
        accept: &dyn Fn(&Path) -> bool,
    ) -> Result<Vec<FileEntry>, IndexError> {
        self.walks.fetch_add(1, Ordering::Relaxed);

        let mut walker = WalkDir::new(dir)
            .min_depth(1)
            .follow_links(true)
            .sort_by_file_name();
        if !recursive {
            walker = walker.max_depth(1);
        }

        let mut entries = Vec::new();
        for item in walker.into_iter().filter_entry(|e| !is_hidden(e)) {
            let item = match item {
                Ok(item) => item,
                Err(err) => {
                    tracing::warn!(path = %dir.display(), error = %err, "Skipping unreadable entry");
                    continue;
                }
            };

            let is_dir = item.file_type().is_dir();
            if is_dir && recursive {
                continue;
            }
            if !is_dir && !accept(item.path()) {
                continue;
            }

            match item.metadata() {
                Ok(metadata) => entries.push(FileEntry::from_metadata(item.into_path(), &metadata)),
                Err(err) => {
                    tracing::warn!(path = %item.path().display(), error = %err, "Skipping entry without metadata");
                }
            }
        }

        tracing::debug!(
            path = %dir.display(),
            recursive,
            entries = entries.len(),
            "Indexed directory"
        );
        Ok(entries)
    }
}

impl Default for DirectoryIndexer {
    fn default() -> Self {
        Self::new()
    }
}

fn directory_mtime(dir: &Path) -> Result<std::time::SystemTime, IndexError> {
    let metadata = fs::metadata(dir).map_err(|e| IndexError::io(dir, e))?;
    if !metadata.is_dir() {
        return Err(IndexError::NotADirectory(dir.to_path_buf()));
    }
    metadata.modified().map_err(|e| IndexError::io(dir, e))
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.'))
}
