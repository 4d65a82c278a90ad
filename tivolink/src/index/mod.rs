//! Directory indexing.
//!
//! The [`DirectoryIndexer`] walks share directories and caches the
//! resulting [`SortedFileList`]s; the query layer sorts and pages them in
//! place under each list's own lock.

mod entry;
mod indexer;

pub use entry::{FileEntry, SharedFileList, SortedFileList};
pub use indexer::{DirectoryIndexer, IndexError, FLAT_CACHE_CAPACITY, RECURSIVE_CACHE_CAPACITY};
