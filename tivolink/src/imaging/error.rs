//! Error types for image adaptation.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Errors raised while turning a source image into a JPEG.
///
/// Every variant names the file and the pipeline stage that failed.
#[derive(Debug)]
pub enum AdapterError {
    /// The source file could not be read.
    Open { path: PathBuf, source: io::Error },
    /// The source bytes are not a decodable image.
    Decode {
        path: PathBuf,
        source: ::image::ImageError,
    },
    /// The resized image could not be encoded.
    Encode {
        path: PathBuf,
        source: ::image::ImageError,
    },
    /// The ffmpeg fallback failed after the built-in decoder gave up.
    External { path: PathBuf, message: String },
}

impl AdapterError {
    /// Path of the image that failed.
    pub fn path(&self) -> &PathBuf {
        match self {
            AdapterError::Open { path, .. }
            | AdapterError::Decode { path, .. }
            | AdapterError::Encode { path, .. }
            | AdapterError::External { path, .. } => path,
        }
    }
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterError::Open { path, source } => {
                write!(f, "Could not open {}: {}", path.display(), source)
            }
            AdapterError::Decode { path, source } => {
                write!(f, "Could not decode {}: {}", path.display(), source)
            }
            AdapterError::Encode { path, source } => {
                write!(f, "Encode failed on {}: {}", path.display(), source)
            }
            AdapterError::External { path, message } => {
                write!(f, "FFmpeg failed on {}: {}", path.display(), message)
            }
        }
    }
}

impl std::error::Error for AdapterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AdapterError::Open { source, .. } => Some(source),
            AdapterError::Decode { source, .. } | AdapterError::Encode { source, .. } => {
                Some(source)
            }
            AdapterError::External { .. } => None,
        }
    }
}
