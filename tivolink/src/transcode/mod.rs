//! Video probing, compatibility checks and transcoding.
//!
//! The [`Transcoder`] trait is the seam between the stream negotiator and
//! the external tools. [`FfmpegTranscoder`] drives ffprobe, ffmpeg and
//! tivodecode as subprocesses; tests substitute their own implementations.

mod ffmpeg;
mod probe;
mod process;
mod session;

use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::config::DeviceProfile;

pub use ffmpeg::FfmpegTranscoder;
pub use probe::VideoInfo;
pub use process::{run_with_timeout, ProcessOutput};
pub use session::{
    ResumeClaim, Session, SessionRegistry, SharedSession, BLOCK_SIZE, RETAINED_BLOCKS,
    SESSION_IDLE_TIMEOUT,
};

/// Program-stream TiVo video (the default).
pub const MIME_TIVO_MPEG: &str = "video/x-tivo-mpeg";
/// Transport-stream TiVo video.
pub const MIME_TIVO_MPEG_TS: &str = "video/x-tivo-mpeg-ts";
/// Plain MPEG, used for decoded `.tivo` downloads.
pub const MIME_MPEG: &str = "video/mpeg";

/// Errors from probing and transcoding.
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("Could not start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} did not finish within {budget:?}")]
    Timeout { program: String, budget: Duration },

    #[error("{program} failed: {message}")]
    Failed { program: String, message: String },

    #[error("Probe failed: {0}")]
    Probe(String),

    #[error("No resumable session for {0} at that offset")]
    NotResumable(String),

    #[error("Decoding .tivo files needs tivodecode and a media access key")]
    DecoderUnavailable,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Verdict on whether a file can be sent byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compatibility {
    pub compatible: bool,
    pub reason: String,
}

impl Compatibility {
    pub fn yes(reason: impl Into<String>) -> Self {
        Self {
            compatible: true,
            reason: reason.into(),
        }
    }

    pub fn no(reason: impl Into<String>) -> Self {
        Self {
            compatible: false,
            reason: reason.into(),
        }
    }
}

/// Encoder backend used by the video path.
pub trait Transcoder: Send + Sync {
    /// Whether `path` holds a playable video.
    fn supported_format(&self, path: &Path) -> bool;

    /// Probe `path` (cached per path and modification time).
    fn video_info(&self, path: &Path) -> Result<VideoInfo, TranscodeError>;

    /// Probe result only if it is already cached.
    fn cached_video_info(&self, _path: &Path) -> Option<VideoInfo> {
        None
    }

    /// Whether `path` can be sent unchanged to `device` as `mime`.
    fn compatibility(&self, path: &Path, device: &DeviceProfile, mime: &str) -> Compatibility;

    /// Reserve a running transcode of `path` for a transfer from `offset`.
    ///
    /// `None` when no session can serve that offset.
    fn claim_resume(&self, _path: &Path, _offset: u64) -> Option<ResumeClaim> {
        None
    }

    /// Write `header` and then the encoded stream of `path` to `out`.
    fn transcode(
        &self,
        path: &Path,
        out: &mut dyn Write,
        device: &DeviceProfile,
        mime: &str,
        header: &[u8],
    ) -> Result<(), TranscodeError>;
}

/// Whether `path` is a TiVo recording.
pub fn is_tivo_file(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("tivo"))
}

/// File extensions offered in video listings.
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "3g2", "3gp", "asf", "avi", "divx", "dvr-ms", "flv", "m2t", "m2ts", "m4v", "mkv", "mov",
    "mp4", "mpeg", "mpg", "mts", "ogv", "tivo", "tp", "ts", "vob", "webm", "wmv", "wtv",
];

/// Cheap listing filter: known video extension, hidden files excluded by
/// the indexer.
pub fn has_video_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            VIDEO_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

/// Extensions whose files are usually transport streams already.
pub const LIKELY_TS_EXTENSIONS: &[&str] = &[
    "ts", "tp", "trp", "3g2", "3gp", "3gp2", "3gpp", "m2t", "m2ts", "mts", "mp4", "m4v", "flv",
    "mkv", "mov", "wtv", "dvr-ms", "webm",
];

/// Whether `path` is better sent to a capable device as a transport stream.
pub fn is_likely_transport_stream(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            LIKELY_TS_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

/// Decide byte-compatibility from probe facts.
pub fn check_compatibility(
    path: &Path,
    info: &VideoInfo,
    device: &DeviceProfile,
    mime: &str,
) -> Compatibility {
    if is_tivo_file(path) {
        return if mime.starts_with(MIME_TIVO_MPEG) {
            Compatibility::yes("TRANSCODE=NO, TiVo recording")
        } else {
            Compatibility::no("TRANSCODE=YES, TiVo recording needs decoding")
        };
    }

    let transport_stream = mime == MIME_TIVO_MPEG_TS;
    let expected = if transport_stream { "mpegts" } else { "mpeg" };
    if info.container != expected {
        return Compatibility::no(format!(
            "TRANSCODE=YES, container {} not {}",
            info.container, expected
        ));
    }

    match info.video_codec.as_deref() {
        Some("mpeg2video") => {}
        Some("h264") if transport_stream => {}
        Some(other) => {
            return Compatibility::no(format!("TRANSCODE=YES, video codec {}", other));
        }
        None => return Compatibility::no("TRANSCODE=YES, no video stream"),
    }

    match info.audio_codec.as_deref() {
        Some("ac3" | "mp2") | None => {}
        Some(other) => {
            return Compatibility::no(format!("TRANSCODE=YES, audio codec {}", other));
        }
    }
    if info
        .audio_bitrate_kbps
        .is_some_and(|br| br > device.max_audio_bitrate)
    {
        return Compatibility::no("TRANSCODE=YES, audio bitrate over device limit");
    }

    if info.width > device.width || info.height > device.height {
        return Compatibility::no(format!(
            "TRANSCODE=YES, {}x{} larger than {}x{}",
            info.width, info.height, device.width, device.height
        ));
    }

    if info
        .bitrate_kbps
        .is_some_and(|br| br > device.max_video_bitrate)
    {
        return Compatibility::no("TRANSCODE=YES, bitrate over device limit");
    }

    Compatibility::yes(format!("TRANSCODE=NO, all {} compatible", expected))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dvd_info() -> VideoInfo {
        VideoInfo {
            container: "mpeg".to_string(),
            video_codec: Some("mpeg2video".to_string()),
            audio_codec: Some("ac3".to_string()),
            width: 720,
            height: 480,
            bitrate_kbps: Some(6000),
            ..VideoInfo::default()
        }
    }

    fn hd_device() -> DeviceProfile {
        DeviceProfile::for_tsn("6520001802DA1F0")
    }

    #[test]
    fn test_mpeg_program_stream_is_compatible() {
        let verdict = check_compatibility(
            Path::new("/v/movie.mpg"),
            &dvd_info(),
            &hd_device(),
            MIME_TIVO_MPEG,
        );
        assert!(verdict.compatible, "{}", verdict.reason);
    }

    #[test]
    fn test_container_must_match_mime() {
        let verdict = check_compatibility(
            Path::new("/v/movie.mpg"),
            &dvd_info(),
            &hd_device(),
            MIME_TIVO_MPEG_TS,
        );
        assert!(!verdict.compatible);
        assert!(verdict.reason.contains("container"));
    }

    #[test]
    fn test_h264_only_in_transport_stream() {
        let mut info = dvd_info();
        info.video_codec = Some("h264".to_string());
        let ps = check_compatibility(Path::new("/v/a.mpg"), &info, &hd_device(), MIME_TIVO_MPEG);
        assert!(!ps.compatible);

        info.container = "mpegts".to_string();
        let ts = check_compatibility(Path::new("/v/a.ts"), &info, &hd_device(), MIME_TIVO_MPEG_TS);
        assert!(ts.compatible, "{}", ts.reason);
    }

    #[test]
    fn test_oversized_for_sd_device() {
        let mut info = dvd_info();
        info.width = 1280;
        info.height = 720;
        let sd = DeviceProfile::for_tsn("2400000000");
        let verdict = check_compatibility(Path::new("/v/a.mpg"), &info, &sd, MIME_TIVO_MPEG);
        assert!(!verdict.compatible);
    }

    #[test]
    fn test_unsupported_audio() {
        let mut info = dvd_info();
        info.audio_codec = Some("aac".to_string());
        let verdict =
            check_compatibility(Path::new("/v/a.mpg"), &info, &hd_device(), MIME_TIVO_MPEG);
        assert!(!verdict.compatible);
        assert!(verdict.reason.contains("aac"));
    }

    #[test]
    fn test_tivo_recordings_depend_on_mime() {
        let info = VideoInfo::default();
        let path = Path::new("/v/Show.TiVo");
        assert!(check_compatibility(path, &info, &hd_device(), MIME_TIVO_MPEG).compatible);
        assert!(check_compatibility(path, &info, &hd_device(), MIME_TIVO_MPEG_TS).compatible);
        assert!(!check_compatibility(path, &info, &hd_device(), MIME_MPEG).compatible);
    }

    #[test]
    fn test_video_extensions() {
        assert!(has_video_extension(Path::new("/v/a.MKV")));
        assert!(has_video_extension(Path::new("/v/show.tivo")));
        assert!(!has_video_extension(Path::new("/v/notes.txt")));
        assert!(!has_video_extension(Path::new("/v/noext")));
    }
}
