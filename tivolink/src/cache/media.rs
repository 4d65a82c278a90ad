//! Per-photo attribute store.
//!
//! Listing a photo container creates one [`MediaAttributes`] record per
//! entry; fetching a single photo later reads and updates the same record
//! (rotation, EXIF orientation, capture date, thumbnail). Records live in
//! a [`BoundedCache`] keyed by local path, each behind its own mutex.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use parking_lot::Mutex;

use super::BoundedCache;
use crate::index::FileEntry;

/// Number of photos whose attributes are retained.
pub const MEDIA_CACHE_CAPACITY: usize = 300;

/// Shared handle to one photo's attributes.
pub type SharedAttributes = Arc<Mutex<MediaAttributes>>;

/// Mutable state remembered about one photo or folder.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaAttributes {
    /// Absolute local path.
    pub path: PathBuf,
    /// Path below the share root, `/`-separated with a leading slash.
    pub part_path: String,
    /// File or folder name shown to the client.
    pub display_name: String,
    /// Whether this entry is a folder.
    pub is_dir: bool,
    /// Filesystem creation time (falls back to modification time).
    pub creation_date: SystemTime,
    /// Filesystem modification time.
    pub modification_date: SystemTime,
    capture_date: Option<SystemTime>,
    rotation_degrees: i32,
    exif_rotation: Option<i32>,
    probed_size: Option<(u32, u32)>,
    thumbnail: Option<Bytes>,
}

impl MediaAttributes {
    /// Build the initial record for an indexed entry.
    ///
    /// # Arguments
    ///
    /// * `entry` - Entry produced by the directory indexer
    /// * `share_root` - Local root of the share the entry belongs to
    pub fn from_entry(entry: &FileEntry, share_root: &Path) -> Self {
        let relative = entry.path.strip_prefix(share_root).unwrap_or(&entry.path);
        let part_path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .fold(String::new(), |mut acc, part| {
                acc.push('/');
                acc.push_str(&part);
                acc
            });

        Self {
            path: entry.path.clone(),
            part_path,
            display_name: entry.file_name(),
            is_dir: entry.is_dir,
            creation_date: entry.capture_date,
            modification_date: entry.modified_date,
            capture_date: None,
            rotation_degrees: 0,
            exif_rotation: None,
            probed_size: None,
            thumbnail: None,
        }
    }

    /// Rotation requested by the client, in degrees within `0..360`.
    pub fn rotation(&self) -> i32 {
        self.rotation_degrees
    }

    /// Record a client-requested rotation.
    ///
    /// Any stored thumbnail was rendered at the old rotation and is
    /// dropped.
    pub fn set_rotation(&mut self, degrees: i32) {
        self.rotation_degrees = degrees.rem_euclid(360);
        self.thumbnail = None;
    }

    /// Orientation correction parsed from EXIF, once known.
    pub fn exif_rotation(&self) -> Option<i32> {
        self.exif_rotation
    }

    pub fn set_exif_rotation(&mut self, degrees: i32) {
        self.exif_rotation = Some(degrees);
    }

    /// Capture date from EXIF if one was found, else the creation date.
    pub fn capture_date(&self) -> SystemTime {
        self.capture_date.unwrap_or(self.creation_date)
    }

    /// Whether an EXIF capture date has been recorded.
    pub fn has_exif_capture_date(&self) -> bool {
        self.capture_date.is_some()
    }

    pub fn set_capture_date(&mut self, when: SystemTime) {
        self.capture_date = Some(when);
    }

    /// Source size reported by ffmpeg for images the decoder cannot read.
    pub fn probed_size(&self) -> Option<(u32, u32)> {
        self.probed_size
    }

    pub fn set_probed_size(&mut self, width: u32, height: u32) {
        self.probed_size = Some((width, height));
    }

    pub fn thumbnail(&self) -> Option<Bytes> {
        self.thumbnail.clone()
    }

    pub fn store_thumbnail(&mut self, jpeg: Bytes) {
        self.thumbnail = Some(jpeg);
    }
}

/// Process-wide store of [`MediaAttributes`] keyed by local path.
#[derive(Debug)]
pub struct MediaStore {
    cache: BoundedCache<PathBuf, SharedAttributes>,
}

impl MediaStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: BoundedCache::new(capacity),
        }
    }

    /// Attributes for `path` if they have been recorded.
    pub fn get(&self, path: &Path) -> Option<SharedAttributes> {
        self.cache.get(&path.to_path_buf())
    }

    /// Attributes for `entry`, creating the record on first sight.
    pub fn attributes_for(&self, entry: &FileEntry, share_root: &Path) -> SharedAttributes {
        self.cache.get_or_insert_with(entry.path.clone(), || {
            Arc::new(Mutex::new(MediaAttributes::from_entry(entry, share_root)))
        })
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Forget every record.
    pub fn clear(&self) {
        self.cache.clear();
    }
}

impl Default for MediaStore {
    fn default() -> Self {
        Self::new(MEDIA_CACHE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn entry(path: &str, is_dir: bool) -> FileEntry {
        let when = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        FileEntry::new(PathBuf::from(path), is_dir).with_dates(when, when)
    }

    #[test]
    fn test_from_entry_builds_part_path() {
        let attrs = MediaAttributes::from_entry(
            &entry("/photos/2023/beach.jpg", false),
            Path::new("/photos"),
        );
        assert_eq!(attrs.part_path, "/2023/beach.jpg");
        assert_eq!(attrs.display_name, "beach.jpg");
        assert_eq!(attrs.rotation(), 0);
        assert!(!attrs.is_dir);
    }

    #[test]
    fn test_set_rotation_normalizes_and_clears_thumbnail() {
        let mut attrs =
            MediaAttributes::from_entry(&entry("/p/a.jpg", false), Path::new("/p"));
        attrs.store_thumbnail(Bytes::from_static(b"jpeg"));

        attrs.set_rotation(-90);

        assert_eq!(attrs.rotation(), 270);
        assert!(attrs.thumbnail().is_none());
    }

    #[test]
    fn test_capture_date_prefers_exif() {
        let mut attrs =
            MediaAttributes::from_entry(&entry("/p/a.jpg", false), Path::new("/p"));
        let exif = SystemTime::UNIX_EPOCH + Duration::from_secs(42);
        assert_eq!(attrs.capture_date(), attrs.creation_date);

        attrs.set_capture_date(exif);
        assert_eq!(attrs.capture_date(), exif);
        assert!(attrs.has_exif_capture_date());
    }

    #[test]
    fn test_store_shares_record_between_lookups() {
        let store = MediaStore::default();
        let e = entry("/p/a.jpg", false);

        let first = store.attributes_for(&e, Path::new("/p"));
        first.lock().set_rotation(90);

        let again = store.get(Path::new("/p/a.jpg")).unwrap();
        assert_eq!(again.lock().rotation(), 90);
        assert!(Arc::ptr_eq(&first, &again));
    }

    #[test]
    fn test_store_respects_capacity() {
        let store = MediaStore::new(2);
        for name in ["a", "b", "c"] {
            store.attributes_for(&entry(&format!("/p/{name}.jpg"), false), Path::new("/p"));
        }
        assert_eq!(store.len(), 2);
        assert!(store.get(Path::new("/p/a.jpg")).is_none());
    }
}
