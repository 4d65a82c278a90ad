//! Source image to client JPEG.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ::image::codecs::jpeg::JpegEncoder;
use ::image::imageops::FilterType;
use ::image::DynamicImage;
use bytes::Bytes;

use super::error::AdapterError;
use super::exif;
use super::ffmpeg::FfmpegImager;
use super::geometry::{decode_scale, fit_to_box, normalize_degrees, PixelShape};
use crate::cache::SharedAttributes;

/// JPEG quality used for every rendered image.
pub const JPEG_QUALITY: u8 = 85;

/// Requests with both dimensions strictly between zero and this limit are
/// thumbnails and may be answered from the attribute store.
pub const THUMBNAIL_LIMIT: u32 = 100;

/// Output parameters for one render.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderRequest {
    /// Target box width; zero keeps the source width.
    pub width: u32,
    /// Target box height; zero keeps the source height.
    pub height: u32,
    pub pixel_shape: PixelShape,
    /// Counter-clockwise rotation requested by the client.
    pub rotation: i32,
}

impl RenderRequest {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    pub fn with_rotation(mut self, degrees: i32) -> Self {
        self.rotation = degrees;
        self
    }

    pub fn with_pixel_shape(mut self, shape: PixelShape) -> Self {
        self.pixel_shape = shape;
        self
    }

    /// Whether this request is small enough to use a stored thumbnail.
    pub fn is_thumbnail(&self) -> bool {
        (1..THUMBNAIL_LIMIT).contains(&self.width) && (1..THUMBNAIL_LIMIT).contains(&self.height)
    }
}

/// Decodes, orients, resizes and re-encodes photos.
#[derive(Debug, Clone)]
pub struct ImageAdapter {
    quality: u8,
    ffmpeg: Option<FfmpegImager>,
}

impl ImageAdapter {
    pub fn new() -> Self {
        Self {
            quality: JPEG_QUALITY,
            ffmpeg: None,
        }
    }

    /// Hand images the decoder rejects to `program`, killed after `wait`.
    pub fn with_ffmpeg(mut self, program: impl Into<PathBuf>, wait: Duration) -> Self {
        self.ffmpeg = Some(FfmpegImager::new(program, wait));
        self
    }

    /// Render `path` as a JPEG fitted to `request`.
    ///
    /// When `attrs` is supplied, EXIF findings are recorded there and
    /// thumbnail-sized results are stored and reused.
    ///
    /// # Errors
    ///
    /// Returns `AdapterError` naming the file and the failing stage.
    pub fn render(
        &self,
        path: &Path,
        request: &RenderRequest,
        attrs: Option<&SharedAttributes>,
    ) -> Result<Bytes, AdapterError> {
        if request.is_thumbnail() {
            if let Some(thumb) = attrs.and_then(|a| a.lock().thumbnail()) {
                tracing::trace!(path = %path.display(), "Serving stored thumbnail");
                return Ok(thumb);
            }
        }

        let jpeg = self.build(path, request, attrs)?;

        if request.is_thumbnail() {
            if let Some(attrs) = attrs {
                attrs.lock().store_thumbnail(jpeg.clone());
            }
        }
        Ok(jpeg)
    }

    fn build(
        &self,
        path: &Path,
        request: &RenderRequest,
        attrs: Option<&SharedAttributes>,
    ) -> Result<Bytes, AdapterError> {
        let file_bytes = fs::read(path).map_err(|source| AdapterError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let mut picture = match ::image::load_from_memory(&file_bytes) {
            Ok(picture) => picture,
            Err(source) => {
                let Some(ffmpeg) = &self.ffmpeg else {
                    return Err(AdapterError::Decode {
                        path: path.to_path_buf(),
                        source,
                    });
                };
                tracing::debug!(
                    path = %path.display(),
                    error = %source,
                    "Decoder failed, trying ffmpeg"
                );
                let rotation = corrected_rotation(&file_bytes, request.rotation, attrs);
                return ffmpeg.render(path, request, rotation, attrs);
            }
        };

        // Cheap pre-shrink before the expensive filters
        let scale = decode_scale(
            (picture.width(), picture.height()),
            (request.width, request.height),
        );
        if scale > 1 {
            picture = picture.thumbnail_exact(picture.width() / scale, picture.height() / scale);
        }

        let rotation = corrected_rotation(&file_bytes, request.rotation, attrs);
        picture = rotate_counter_clockwise(picture, rotation);

        picture = match picture {
            DynamicImage::ImageRgb8(_) | DynamicImage::ImageLuma8(_) => picture,
            other => DynamicImage::ImageRgb8(other.to_rgb8()),
        };

        let (width, height) = fit_to_box(
            (picture.width(), picture.height()),
            (request.width, request.height),
            request.pixel_shape,
        );
        let resized = picture.resize_exact(width, height, FilterType::Lanczos3);

        let mut out = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut out, self.quality);
        resized
            .write_with_encoder(encoder)
            .map_err(|source| AdapterError::Encode {
                path: path.to_path_buf(),
                source,
            })?;

        tracing::debug!(
            path = %path.display(),
            width,
            height,
            rotation,
            bytes = out.len(),
            "Rendered image"
        );
        Ok(Bytes::from(out))
    }
}

impl Default for ImageAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Combine the requested rotation with the EXIF orientation correction.
///
/// A correction already recorded in `attrs` is reused; otherwise the EXIF
/// block is scanned and the finding (and capture date) recorded.
fn corrected_rotation(file_bytes: &[u8], requested: i32, attrs: Option<&SharedAttributes>) -> i32 {
    let Some(exif_block) = exif::find_exif(file_bytes) else {
        return normalize_degrees(requested);
    };

    let mut attrs = attrs.map(|a| a.lock());
    if let Some(attrs) = attrs.as_mut() {
        if !attrs.has_exif_capture_date() {
            if let Some(when) = exif::capture_date(exif_block) {
                attrs.set_capture_date(when);
            }
        }
        if let Some(known) = attrs.exif_rotation() {
            return normalize_degrees(requested + known);
        }
    }

    let correction = exif::orientation(exif_block).map(exif::orientation_degrees);
    if let (Some(correction), Some(attrs)) = (correction, attrs.as_mut()) {
        attrs.set_exif_rotation(correction);
    }
    normalize_degrees(requested + correction.unwrap_or(0))
}

fn rotate_counter_clockwise(picture: DynamicImage, degrees: i32) -> DynamicImage {
    match normalize_degrees(degrees) {
        0 => picture,
        90 => picture.rotate270(),
        180 => picture.rotate180(),
        270 => picture.rotate90(),
        other => {
            tracing::debug!(degrees = other, "Ignoring rotation that is not a right angle");
            picture
        }
    }
}
