//! Share handlers.
//!
//! Every share is served by the handler for its [`ShareKind`]. Handlers
//! implement [`ContainerHandler`]: listing and file delivery are
//! mandatory, `QueryItem` and `TVBusQuery` are optional and answer 404
//! unless overridden.
//!
//! ```text
//! ShareKind::Photo ──► PhotoHandler ──► QueryResolver + MediaStore + ImageAdapter
//! ShareKind::Video ──► VideoHandler ──► QueryResolver + VideoStreamNegotiator
//! ```

mod photo;
mod video;

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::config::{DeviceProfile, ServerSettings, ShareConfig, ShareKind};
use crate::imaging::AdapterError;
use crate::index::IndexError;
use crate::query::{Query, ShareLocation};
use crate::transcode::Transcoder;
use crate::transfer::TransferSink;
use crate::video::VideoError;

pub use photo::{is_image_file, PhotoHandler, IMAGE_EXTENSIONS};
pub use video::VideoHandler;

/// Request failures, each mapped to one HTTP status.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unsupported media type: {0}")]
    Unsupported(String),

    #[error("Range not satisfiable: {0}")]
    RangeNotSatisfiable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HandlerError {
    pub fn status(&self) -> u16 {
        match self {
            HandlerError::NotFound(_) => 404,
            HandlerError::Unsupported(_) => 415,
            HandlerError::RangeNotSatisfiable(_) => 416,
            HandlerError::Internal(_) => 500,
        }
    }
}

impl From<IndexError> for HandlerError {
    fn from(e: IndexError) -> Self {
        match e {
            IndexError::NotFound(_) | IndexError::NotADirectory(_) => {
                HandlerError::NotFound(e.to_string())
            }
            IndexError::Io { .. } => HandlerError::Internal(e.to_string()),
        }
    }
}

impl From<VideoError> for HandlerError {
    fn from(e: VideoError) -> Self {
        match e {
            VideoError::RangeNotSatisfiable { .. } => HandlerError::RangeNotSatisfiable(e.to_string()),
            VideoError::NotFound(_) | VideoError::DecoderUnavailable => {
                HandlerError::NotFound(e.to_string())
            }
        }
    }
}

impl From<AdapterError> for HandlerError {
    fn from(e: AdapterError) -> Self {
        HandlerError::NotFound(e.to_string())
    }
}

/// Everything a handler needs to know about one request.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    pub share: &'a ShareConfig,
    pub device: &'a DeviceProfile,
    pub query: &'a Query,
    pub guid: &'a str,
    /// Client name for log lines.
    pub client: &'a str,
    /// Start offset from a `Range: bytes=N-` header.
    pub range_offset: u64,
}

impl<'a> RequestContext<'a> {
    pub fn location(&self) -> ShareLocation<'a> {
        ShareLocation::new(&self.share.name, &self.share.path)
    }

    /// `Container` parameter, defaulting to the share itself.
    pub fn container(&self) -> &'a str {
        self.query.get("Container").unwrap_or(&self.share.name)
    }
}

/// Capabilities of a share handler.
pub trait ContainerHandler: Send + Sync {
    /// Render one page of the requested container.
    fn list_container(&self, ctx: &RequestContext<'_>) -> Result<String, HandlerError>;

    /// Stream the file at `path` (already resolved inside the share).
    ///
    /// # Errors
    ///
    /// Errors are only returned before the response head is sent.
    fn send_file(
        &self,
        ctx: &RequestContext<'_>,
        path: &Path,
        sink: &mut dyn TransferSink,
    ) -> Result<(), HandlerError>;

    /// Single-item details (`QueryItem`).
    fn query_item(&self, _ctx: &RequestContext<'_>) -> Result<String, HandlerError> {
        Err(HandlerError::NotFound("QueryItem".to_string()))
    }

    /// Recording details (`TVBusQuery`).
    fn tvbus_query(&self, _ctx: &RequestContext<'_>) -> Result<String, HandlerError> {
        Err(HandlerError::NotFound("TVBusQuery".to_string()))
    }
}

/// One handler per share kind.
pub struct Handlers {
    photo: PhotoHandler,
    video: VideoHandler,
}

impl Handlers {
    pub fn new(settings: &ServerSettings, transcoder: Arc<dyn Transcoder>) -> Self {
        Self {
            photo: PhotoHandler::with_ffmpeg(&settings.ffmpeg, settings.ffmpeg_wait),
            video: VideoHandler::new(transcoder, settings.clone()),
        }
    }

    pub fn for_kind(&self, kind: ShareKind) -> &dyn ContainerHandler {
        match kind {
            ShareKind::Photo => &self.photo,
            ShareKind::Video => &self.video,
        }
    }

    pub fn photo(&self) -> &PhotoHandler {
        &self.photo
    }

    pub fn video(&self) -> &VideoHandler {
        &self.video
    }

    /// Forget every cached listing and photo attribute (`FlushServer`).
    pub fn flush(&self) {
        self.photo.resolver().indexer().invalidate_all();
        self.photo.store().clear();
        self.video.resolver().indexer().invalidate_all();
        tracing::info!("Flushed listing and media caches");
    }
}
