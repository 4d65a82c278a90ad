//! Video transfer negotiation.
//!
//! ```text
//!                 ┌─ compatible ──► 200, Content-Length, header + file
//! request ─► decide
//!                 └─ otherwise ───► 206 chunked, transcode / resume
//! ```
//!
//! Every check that can reject a request (missing file, missing decoder,
//! unsatisfiable range) runs before the response head is sent.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use moka::sync::Cache;
use thiserror::Error;

use super::details::{modified_time, VideoDetails};
use super::header::tivo_header;
use crate::config::{DeviceProfile, ServerSettings};
use crate::render;
use crate::transcode::{is_tivo_file, Transcoder, MIME_MPEG, MIME_TIVO_MPEG, BLOCK_SIZE};
use crate::transfer::{CountingWriter, StreamHead, TransferSink};

/// Rendered details documents kept per `(device, path)`.
const DETAILS_CACHE_CAPACITY: u64 = 16;

/// Errors that reject a video request before any byte is sent.
#[derive(Debug, Error)]
pub enum VideoError {
    #[error("Video not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Decoding .tivo files needs tivodecode and a media access key")]
    DecoderUnavailable,

    #[error("Cannot serve {} from byte {offset}", .path.display())]
    RangeNotSatisfiable { path: PathBuf, offset: u64 },
}

/// How a request will be answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoCompatibilityDecision {
    /// The file can be sent byte for byte.
    pub is_byte_compatible: bool,
    pub reason: String,
    /// A TiVo header must be written before the video data.
    pub requires_header_synthesis: bool,
    /// A `.tivo` recording must be decoded to plain MPEG.
    pub needs_decode: bool,
}

/// One video request.
#[derive(Debug, Clone)]
pub struct StreamRequest<'a> {
    pub path: &'a Path,
    pub device: &'a DeviceProfile,
    /// `Format` parameter; defaults to [`MIME_TIVO_MPEG`].
    pub mime: Option<&'a str>,
    /// Start of a `Range: bytes=N-` request.
    pub offset: u64,
    /// Name of the client for log lines.
    pub client: &'a str,
}

/// Outcome of a transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferReport {
    pub status: u16,
    pub bytes: u64,
    pub elapsed: Duration,
    pub compatible: bool,
    /// The transfer ended early (client gone or encoder failure).
    pub interrupted: bool,
}

impl TransferReport {
    /// Throughput in Mb/s.
    pub fn megabits_per_sec(&self) -> f64 {
        let mega_elapsed = (self.elapsed.as_secs_f64() * 1024.0 * 1024.0).max(1.0);
        self.bytes as f64 * 8.0 / mega_elapsed
    }
}

/// Decides between passthrough and transcoding and runs the transfer.
pub struct VideoStreamNegotiator {
    transcoder: Arc<dyn Transcoder>,
    settings: ServerSettings,
    details: Cache<(String, PathBuf), Arc<str>>,
}

impl VideoStreamNegotiator {
    pub fn new(transcoder: Arc<dyn Transcoder>, settings: ServerSettings) -> Self {
        Self {
            transcoder,
            settings,
            details: Cache::new(DETAILS_CACHE_CAPACITY),
        }
    }

    pub fn transcoder(&self) -> &Arc<dyn Transcoder> {
        &self.transcoder
    }

    /// Decide how `path` is sent to `device` as `mime`.
    pub fn determine_compatibility(
        &self,
        path: &Path,
        device: &DeviceProfile,
        mime: &str,
    ) -> VideoCompatibilityDecision {
        let tivo_source = is_tivo_file(path);
        let needs_decode = tivo_source && mime == MIME_MPEG;
        let (is_byte_compatible, reason) = if needs_decode {
            (false, "TRANSCODE=YES, TiVo recording needs decoding".to_string())
        } else {
            let verdict = self.transcoder.compatibility(path, device, mime);
            (verdict.compatible, verdict.reason)
        };

        VideoCompatibilityDecision {
            is_byte_compatible,
            reason,
            requires_header_synthesis: mime == MIME_TIVO_MPEG
                && !(tivo_source && is_byte_compatible),
            needs_decode,
        }
    }

    /// Full details for `path` as rendered for `device`.
    pub fn video_details(&self, path: &Path, device: &DeviceProfile) -> VideoDetails {
        let modified = modified_time(path);
        let mut details = VideoDetails::for_file(path, modified);
        match self.transcoder.video_info(path) {
            Ok(info) => {
                let passthrough = self
                    .transcoder
                    .compatibility(path, device, MIME_TIVO_MPEG)
                    .compatible;
                let size = if passthrough {
                    std::fs::metadata(path).ok().map(|m| m.len())
                } else {
                    None
                };
                details.complete(&info, device, modified, size);
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "No probe data for details");
            }
        }
        details
    }

    /// TvBus details document, cached per device and path.
    pub fn details_xml(&self, path: &Path, device: &DeviceProfile) -> Arc<str> {
        let key = (device.tsn.clone(), path.to_path_buf());
        self.details.get_with(key, || {
            Arc::from(render::tvbus(&self.video_details(path, device).resolve()))
        })
    }

    /// Compatibility header for `path`.
    pub fn header_for(&self, path: &Path, device: &DeviceProfile, mime: &str) -> Bytes {
        tivo_header(&self.details_xml(path, device), mime)
    }

    /// Serve one video request into `sink`.
    ///
    /// # Errors
    ///
    /// Returns `VideoError` only for requests rejected before the response
    /// head. Failures while streaming are logged and reported through
    /// [`TransferReport::interrupted`].
    pub fn serve(
        &self,
        request: &StreamRequest<'_>,
        sink: &mut dyn TransferSink,
    ) -> Result<TransferReport, VideoError> {
        let path = request.path;
        let metadata = std::fs::metadata(path)
            .ok()
            .filter(|m| m.is_file())
            .ok_or_else(|| VideoError::NotFound(path.to_path_buf()))?;

        let mime = request.mime.unwrap_or(MIME_TIVO_MPEG);
        let decision = self.determine_compatibility(path, request.device, mime);
        if decision.needs_decode && !self.settings.can_decode_tivo() {
            return Err(VideoError::DecoderUnavailable);
        }

        let header = if decision.requires_header_synthesis {
            self.header_for(path, request.device, mime)
        } else {
            Bytes::new()
        };
        let total = metadata.len() + header.len() as u64;
        let offset = request.offset;

        // Held through the transfer so the session cannot vanish after the head.
        let claim = if offset > 0 && !decision.is_byte_compatible {
            self.transcoder.claim_resume(path, offset)
        } else {
            None
        };
        let valid = offset == 0
            || if decision.is_byte_compatible {
                offset < total
            } else {
                claim.is_some()
            };
        if !valid {
            return Err(VideoError::RangeNotSatisfiable {
                path: path.to_path_buf(),
                offset,
            });
        }

        let head = if decision.is_byte_compatible {
            StreamHead::fixed(mime, total - offset)
                .with_content_range(format!("bytes {}-{}/{}", offset, total - 1, total))
        } else {
            StreamHead::chunked(mime)
        };
        let status = head.status;

        tracing::info!(
            path = %path.display(),
            client = request.client,
            offset,
            compatible = decision.is_byte_compatible,
            reason = %decision.reason,
            "Start sending video"
        );
        let started = Instant::now();

        let (bytes, result) = {
            let outcome = sink.start(head);
            let mut counter = CountingWriter::new(&mut *sink);
            let result = outcome.and_then(|()| {
                if decision.is_byte_compatible {
                    send_file(&mut counter, &header, path, offset)
                } else if let Some(claim) = claim {
                    claim.stream(&mut counter).map_err(io::Error::other)
                } else {
                    self.transcoder
                        .transcode(path, &mut counter, request.device, mime, &header)
                        .map_err(io::Error::other)
                }
            });
            (counter.written(), result)
        };
        let result = result.and_then(|()| sink.finish());

        let report = TransferReport {
            status,
            bytes,
            elapsed: started.elapsed(),
            compatible: decision.is_byte_compatible,
            interrupted: result.is_err(),
        };
        if let Err(e) = &result {
            tracing::info!(path = %path.display(), error = %e, "Transfer ended early");
        }
        tracing::info!(
            path = %path.display(),
            client = request.client,
            bytes = report.bytes,
            elapsed_ms = report.elapsed.as_millis() as u64,
            mbps = %format!("{:.2}", report.megabits_per_sec()),
            "Done sending video"
        );
        Ok(report)
    }
}

/// Write `header` then the file, skipping the first `offset` bytes of the
/// combined stream.
fn send_file(out: &mut dyn Write, header: &[u8], path: &Path, offset: u64) -> io::Result<()> {
    let header_len = header.len() as u64;
    let file_offset = if offset < header_len {
        out.write_all(&header[offset as usize..])?;
        0
    } else {
        offset - header_len
    };

    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(file_offset))?;
    let mut buf = vec![0u8; BLOCK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
    }
    out.flush()
}
