//! In-process caches shared across requests.
//!
//! - [`BoundedCache`] - generic LRU store with per-entry modification times
//! - [`MediaStore`] - per-photo attributes (rotation, EXIF data, thumbnail)

mod bounded;
mod media;

pub use bounded::{BoundedCache, CacheStats};
pub use media::{MediaAttributes, MediaStore, SharedAttributes, MEDIA_CACHE_CAPACITY};
