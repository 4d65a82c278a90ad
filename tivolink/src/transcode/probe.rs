//! ffprobe output parsing.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use serde::Deserialize;

use super::TranscodeError;

/// Stream and container facts about a video file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoInfo {
    /// First name in ffprobe's `format_name` list (`mpeg`, `mpegts`, `mov`...).
    pub container: String,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub width: u32,
    pub height: u32,
    pub duration_ms: Option<u64>,
    /// Overall bitrate in kbit/s.
    pub bitrate_kbps: Option<u32>,
    pub audio_bitrate_kbps: Option<u32>,
    pub frame_rate: Option<f64>,
}

impl VideoInfo {
    pub fn has_video(&self) -> bool {
        self.video_codec.is_some()
    }

    /// Parse `ffprobe -print_format json -show_format -show_streams` output.
    pub fn from_ffprobe_json(json: &[u8]) -> Result<Self, TranscodeError> {
        let report: ProbeReport = serde_json::from_slice(json)
            .map_err(|e| TranscodeError::Probe(format!("unreadable ffprobe output: {}", e)))?;

        let video = report.streams.iter().find(|s| s.codec_type == "video");
        let audio = report.streams.iter().find(|s| s.codec_type == "audio");
        let format = report.format.unwrap_or_default();

        let container = format
            .format_name
            .as_deref()
            .and_then(|names| names.split(',').next())
            .unwrap_or_default()
            .to_string();

        let duration_ms = format
            .duration
            .as_deref()
            .and_then(|d| d.parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d >= 0.0)
            .map(|d| (d * 1000.0).round() as u64);

        let bitrate_kbps = format
            .bit_rate
            .as_deref()
            .or_else(|| video.and_then(|v| v.bit_rate.as_deref()))
            .and_then(kbps);

        Ok(Self {
            container,
            video_codec: video.and_then(|v| v.codec_name.clone()),
            audio_codec: audio.and_then(|a| a.codec_name.clone()),
            width: video.and_then(|v| v.width).unwrap_or(0),
            height: video.and_then(|v| v.height).unwrap_or(0),
            duration_ms,
            bitrate_kbps,
            audio_bitrate_kbps: audio.and_then(|a| a.bit_rate.as_deref()).and_then(kbps),
            frame_rate: video
                .and_then(|v| v.r_frame_rate.as_deref())
                .and_then(frame_rate),
        })
    }
}

/// Run ffprobe on `path` within `budget`.
pub fn probe(ffprobe: &Path, path: &Path, budget: Duration) -> Result<VideoInfo, TranscodeError> {
    let mut command = Command::new(ffprobe);
    command
        .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(path);

    let output = super::process::run_with_timeout(command, budget)?;
    if !output.status.success() {
        return Err(TranscodeError::Failed {
            program: ffprobe.display().to_string(),
            message: output.stderr_text(),
        });
    }
    VideoInfo::from_ffprobe_json(&output.stdout)
}

#[derive(Debug, Deserialize)]
struct ProbeReport {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    #[serde(default)]
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    bit_rate: Option<String>,
    r_frame_rate: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeFormat {
    format_name: Option<String>,
    duration: Option<String>,
    bit_rate: Option<String>,
}

fn kbps(bits: &str) -> Option<u32> {
    bits.parse::<u64>().ok().map(|b| (b / 1000) as u32)
}

/// `30000/1001` style rates.
fn frame_rate(rate: &str) -> Option<f64> {
    let (num, den) = rate.split_once('/')?;
    let num: f64 = num.parse().ok()?;
    let den: f64 = den.parse().ok()?;
    (den > 0.0 && num > 0.0).then(|| num / den)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DVD_RIP: &str = r#"{
        "streams": [
            {"index": 0, "codec_name": "mpeg2video", "codec_type": "video",
             "width": 720, "height": 480, "r_frame_rate": "30000/1001"},
            {"index": 1, "codec_name": "ac3", "codec_type": "audio", "bit_rate": "192000"}
        ],
        "format": {"format_name": "mpeg", "duration": "1325.480000", "bit_rate": "5230000"}
    }"#;

    #[test]
    fn test_parse_mpeg_program_stream() {
        let info = VideoInfo::from_ffprobe_json(DVD_RIP.as_bytes()).unwrap();
        assert_eq!(info.container, "mpeg");
        assert_eq!(info.video_codec.as_deref(), Some("mpeg2video"));
        assert_eq!(info.audio_codec.as_deref(), Some("ac3"));
        assert_eq!((info.width, info.height), (720, 480));
        assert_eq!(info.duration_ms, Some(1_325_480));
        assert_eq!(info.bitrate_kbps, Some(5230));
        assert_eq!(info.audio_bitrate_kbps, Some(192));
        let fps = info.frame_rate.unwrap();
        assert!((fps - 29.97).abs() < 0.01);
    }

    #[test]
    fn test_container_uses_first_format_name() {
        let json = r#"{"streams": [{"codec_type": "video", "codec_name": "h264"}],
                       "format": {"format_name": "mov,mp4,m4a,3gp,3g2,mj2"}}"#;
        let info = VideoInfo::from_ffprobe_json(json.as_bytes()).unwrap();
        assert_eq!(info.container, "mov");
        assert!(info.has_video());
        assert_eq!(info.audio_codec, None);
    }

    #[test]
    fn test_audio_only_has_no_video() {
        let json = r#"{"streams": [{"codec_type": "audio", "codec_name": "mp3"}],
                       "format": {"format_name": "mp3"}}"#;
        let info = VideoInfo::from_ffprobe_json(json.as_bytes()).unwrap();
        assert!(!info.has_video());
    }

    #[test]
    fn test_garbage_is_probe_error() {
        let err = VideoInfo::from_ffprobe_json(b"not json").unwrap_err();
        assert!(matches!(err, TranscodeError::Probe(_)));
    }

    #[test]
    fn test_frame_rate_rejects_zero_denominator() {
        assert_eq!(frame_rate("0/0"), None);
        assert_eq!(frame_rate("25/1"), Some(25.0));
    }
}
