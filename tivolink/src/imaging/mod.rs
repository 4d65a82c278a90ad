//! Photo adaptation for the client display.
//!
//! ```text
//! file ──► decode ──► pre-shrink ──► EXIF (date, orientation)
//!                                          │
//!                                          ▼
//!        JPEG q85 ◄── Lanczos3 resize ◄── RGB/gray ◄── rotate (CCW)
//! ```
//!
//! Thumbnail-sized requests (both sides under 100 px) are answered from
//! the attribute store when a previous render left one there. Files the
//! decoder rejects are rendered by ffmpeg when one is configured.

mod adapter;
mod error;
pub mod exif;
mod ffmpeg;
mod geometry;

pub use adapter::{ImageAdapter, RenderRequest, JPEG_QUALITY, THUMBNAIL_LIMIT};
pub use error::AdapterError;
pub use ffmpeg::{filter_chain, parse_size, FfmpegImager};
pub use geometry::{decode_scale, fit_to_box, normalize_degrees, PixelShape};
