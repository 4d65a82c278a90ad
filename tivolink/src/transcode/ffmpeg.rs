//! ffmpeg / ffprobe / tivodecode backend.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::SystemTime;

use moka::sync::Cache;

use super::probe::{self, VideoInfo};
use super::session::{ResumeClaim, Session, SessionRegistry};
use super::{
    check_compatibility, is_tivo_file, Compatibility, TranscodeError, Transcoder, MIME_MPEG,
    MIME_TIVO_MPEG_TS,
};
use crate::config::{DeviceProfile, ServerSettings};

/// Probe results kept in memory.
const PROBE_CACHE_CAPACITY: u64 = 1000;

/// Transcoder backed by external command-line tools.
pub struct FfmpegTranscoder {
    settings: ServerSettings,
    probes: Cache<PathBuf, (SystemTime, VideoInfo)>,
    sessions: SessionRegistry,
}

impl FfmpegTranscoder {
    pub fn new(settings: ServerSettings) -> Self {
        Self {
            settings,
            probes: Cache::new(PROBE_CACHE_CAPACITY),
            sessions: SessionRegistry::new(),
        }
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Build the encoder command line for `path`.
    ///
    /// `.tivo` recordings requested as plain MPEG go through tivodecode;
    /// everything else is re-encoded to MPEG-2 video with AC-3 audio in a
    /// program or transport stream, scaled to fit the device.
    ///
    /// # Errors
    ///
    /// [`TranscodeError::DecoderUnavailable`] for `.tivo` decodes when
    /// tivodecode or the media access key is missing.
    pub fn build_command(
        &self,
        path: &Path,
        device: &DeviceProfile,
        mime: &str,
    ) -> Result<Command, TranscodeError> {
        if is_tivo_file(path) && mime == MIME_MPEG {
            let (Some(decoder), Some(mak)) = (&self.settings.tivodecode, &self.settings.tivo_mak)
            else {
                return Err(TranscodeError::DecoderUnavailable);
            };
            let mut command = Command::new(decoder);
            command.arg("-m").arg(mak).arg(path);
            return Ok(command);
        }

        let (width, height) = (device.width, device.height);
        let format = if mime == MIME_TIVO_MPEG_TS { "mpegts" } else { "vob" };

        let mut command = Command::new(&self.settings.ffmpeg);
        command
            .args(["-hide_banner", "-loglevel", "error"])
            .arg("-i")
            .arg(path)
            .args(["-vcodec", "mpeg2video"])
            .arg("-b:v")
            .arg(format!("{}k", device.video_bitrate))
            .arg("-maxrate")
            .arg(format!("{}k", device.max_video_bitrate))
            .args(["-bufsize", "1024k"])
            .arg("-vf")
            .arg(format!(
                "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2",
                w = width,
                h = height
            ))
            .args(["-acodec", "ac3"])
            .arg("-ab")
            .arg(format!("{}k", device.audio_bitrate))
            .args(["-ar", "48000"])
            .args(["-f", format, "-"]);
        Ok(command)
    }

    fn modified(path: &Path) -> Result<SystemTime, TranscodeError> {
        Ok(fs::metadata(path)?.modified()?)
    }
}

impl Transcoder for FfmpegTranscoder {
    fn supported_format(&self, path: &Path) -> bool {
        if is_tivo_file(path) {
            return true;
        }
        match self.video_info(path) {
            Ok(info) => info.has_video(),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Not a playable video");
                false
            }
        }
    }

    fn video_info(&self, path: &Path) -> Result<VideoInfo, TranscodeError> {
        let modified = Self::modified(path)?;
        if let Some((stamp, info)) = self.probes.get(path) {
            if stamp == modified {
                return Ok(info);
            }
        }

        let info = probe::probe(&self.settings.ffprobe, path, self.settings.ffmpeg_wait)?;
        tracing::debug!(
            path = %path.display(),
            container = %info.container,
            video = info.video_codec.as_deref().unwrap_or("-"),
            audio = info.audio_codec.as_deref().unwrap_or("-"),
            "Probed video"
        );
        self.probes
            .insert(path.to_path_buf(), (modified, info.clone()));
        Ok(info)
    }

    fn cached_video_info(&self, path: &Path) -> Option<VideoInfo> {
        let modified = Self::modified(path).ok()?;
        self.probes
            .get(path)
            .filter(|(stamp, _)| *stamp == modified)
            .map(|(_, info)| info)
    }

    fn compatibility(&self, path: &Path, device: &DeviceProfile, mime: &str) -> Compatibility {
        if is_tivo_file(path) {
            return check_compatibility(path, &VideoInfo::default(), device, mime);
        }
        match self.video_info(path) {
            Ok(info) => check_compatibility(path, &info, device, mime),
            Err(e) => Compatibility::no(format!("TRANSCODE=YES, probe failed: {}", e)),
        }
    }

    fn claim_resume(&self, path: &Path, offset: u64) -> Option<ResumeClaim> {
        self.sessions.claim(path, offset)
    }

    fn transcode(
        &self,
        path: &Path,
        out: &mut dyn Write,
        device: &DeviceProfile,
        mime: &str,
        header: &[u8],
    ) -> Result<(), TranscodeError> {
        let mut command = self.build_command(path, device, mime)?;
        let program = command.get_program().to_string_lossy().into_owned();
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| TranscodeError::Spawn {
                program: program.clone(),
                source,
            })?;
        let stdout = child.stdout.take().ok_or_else(|| TranscodeError::Failed {
            program: program.clone(),
            message: "no stdout pipe".to_string(),
        })?;

        tracing::info!(path = %path.display(), program = %program, mime, "Transcoding");
        let session = Session::new(Box::new(stdout), Some(child)).with_prefix(header);
        let shared = self.sessions.start(path, session);
        let mut session = shared.lock();
        session.stream_from(out, 0)?;
        Ok(())
    }
}
