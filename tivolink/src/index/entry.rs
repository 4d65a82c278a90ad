//! File entries and the lazily sorted list that holds them.

use std::fs::Metadata;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;

/// Snapshot of one file or folder taken during a directory walk.
///
/// Entries are never updated in place; a re-index replaces the whole list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Absolute local path.
    pub path: PathBuf,
    pub is_dir: bool,
    /// Creation time where the platform reports one, else modification time.
    pub capture_date: SystemTime,
    pub modified_date: SystemTime,
    /// Size in bytes (zero for folders).
    pub size: u64,
}

impl FileEntry {
    /// Create an entry with epoch timestamps and zero size.
    pub fn new(path: PathBuf, is_dir: bool) -> Self {
        Self {
            path,
            is_dir,
            capture_date: SystemTime::UNIX_EPOCH,
            modified_date: SystemTime::UNIX_EPOCH,
            size: 0,
        }
    }

    /// Build an entry from filesystem metadata.
    pub fn from_metadata(path: PathBuf, metadata: &Metadata) -> Self {
        let modified_date = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let capture_date = metadata.created().unwrap_or(modified_date);
        let is_dir = metadata.is_dir();
        Self {
            path,
            is_dir,
            capture_date,
            modified_date,
            size: if is_dir { 0 } else { metadata.len() },
        }
    }

    pub fn with_dates(mut self, capture_date: SystemTime, modified_date: SystemTime) -> Self {
        self.capture_date = capture_date;
        self.modified_date = modified_date;
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    /// Final path component as a displayable string.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Shared handle to a cached listing.
pub type SharedFileList = Arc<Mutex<SortedFileList>>;

/// Mutable, lazily sorted collection of entries for one listing.
///
/// The list remembers which ordering is currently applied so that a
/// repeat request with the same sort key can skip the re-sort, and where
/// the previous page started so anchor searches can begin there.
#[derive(Debug, Clone)]
pub struct SortedFileList {
    entries: Vec<FileEntry>,
    sort_key: Option<String>,
    dirty: bool,
    pinned_start: Option<PathBuf>,
    last_start: usize,
}

impl SortedFileList {
    /// Wrap freshly walked entries. A new list always needs sorting.
    pub fn new(entries: Vec<FileEntry>) -> Self {
        Self {
            entries,
            sort_key: None,
            dirty: true,
            pinned_start: None,
            last_start: 0,
        }
    }

    pub fn into_shared(self) -> SharedFileList {
        Arc::new(Mutex::new(self))
    }

    pub fn entries(&self) -> &[FileEntry] {
        &self.entries
    }

    /// Mutable access for re-ordering. The caller must follow up with
    /// [`mark_sorted`](Self::mark_sorted).
    pub fn entries_mut(&mut self) -> &mut Vec<FileEntry> {
        self.dirty = true;
        &mut self.entries
    }

    /// Whether the entries must be re-ordered to satisfy `sort_key`.
    pub fn needs_sort(&self, sort_key: &str) -> bool {
        self.dirty || self.sort_key.as_deref() != Some(sort_key)
    }

    /// Record that the entries are now ordered by `sort_key`.
    pub fn mark_sorted(&mut self, sort_key: impl Into<String>) {
        self.sort_key = Some(sort_key.into());
        self.dirty = false;
    }

    pub fn sort_key(&self) -> Option<&str> {
        self.sort_key.as_deref()
    }

    pub fn pinned_start(&self) -> Option<&PathBuf> {
        self.pinned_start.as_ref()
    }

    pub fn set_pinned_start(&mut self, path: Option<PathBuf>) {
        self.pinned_start = path;
    }

    pub fn last_start(&self) -> usize {
        self.last_start
    }

    pub fn set_last_start(&mut self, start: usize) {
        self.last_start = start;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
