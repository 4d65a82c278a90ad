//! ffmpeg fallback for images the built-in decoder cannot read.
//!
//! The source size comes from ffmpeg's stream report (`ffmpeg -i FILE`)
//! and is remembered in the photo's attributes. Rotation, pre-shrinking
//! and the final resize all happen inside one `-vf` filter chain.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use std::time::Duration;

use bytes::Bytes;
use regex::Regex;

use super::error::AdapterError;
use super::geometry::fit_to_box;
use super::RenderRequest;
use crate::cache::SharedAttributes;
use crate::transcode::run_with_timeout;

/// APP0 segment spliced in when ffmpeg emits a bare JPEG stream.
const JFIF_TAG: &[u8] = b"\xff\xe0\x00\x10JFIF\x00\x01\x02\x00\x00\x01\x00\x01\x00\x00";

/// Halve the source inside the chain while it is this many times the target.
const PRESHRINK_RATIO: f64 = 50.0;

fn size_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"Video: .+, (\d+)x(\d+)[, ]").expect("valid stream size pattern")
    })
}

/// Renders through an external ffmpeg binary.
#[derive(Debug, Clone)]
pub struct FfmpegImager {
    program: PathBuf,
    wait: Duration,
}

impl FfmpegImager {
    pub fn new(program: impl Into<PathBuf>, wait: Duration) -> Self {
        Self {
            program: program.into(),
            wait,
        }
    }

    /// Source dimensions, probed once and then read back from `attrs`.
    pub fn source_size(
        &self,
        path: &Path,
        attrs: Option<&SharedAttributes>,
    ) -> Result<(u32, u32), AdapterError> {
        if let Some(size) = attrs.and_then(|a| a.lock().probed_size()) {
            return Ok(size);
        }

        let mut command = Command::new(&self.program);
        command.arg("-i").arg(path);
        // Exits nonzero without an output file; only the report matters.
        let output = run_with_timeout(command, self.wait).map_err(|e| external(path, e))?;
        let (width, height) = parse_size(&String::from_utf8_lossy(&output.stderr))
            .ok_or_else(|| external(path, "Couldn't parse size"))?;

        if let Some(attrs) = attrs {
            attrs.lock().set_probed_size(width, height);
        }
        Ok((width, height))
    }

    /// Render `path` as a JPEG, rotated counter-clockwise by `rotation`.
    pub fn render(
        &self,
        path: &Path,
        request: &RenderRequest,
        rotation: i32,
        attrs: Option<&SharedAttributes>,
    ) -> Result<Bytes, AdapterError> {
        let (width, height) = self.source_size(path, attrs)?;
        let rotated = if matches!(rotation, 90 | 270) {
            (height, width)
        } else {
            (width, height)
        };
        let target = fit_to_box(
            rotated,
            (request.width, request.height),
            request.pixel_shape,
        );
        let filters = filter_chain(rotation, rotated, target);

        let mut command = Command::new(&self.program);
        command
            .arg("-i")
            .arg(path)
            .args(["-vf", filters.as_str(), "-f", "mjpeg", "-"]);
        let output = run_with_timeout(command, self.wait).map_err(|e| external(path, e))?;
        if !output.status.success() || output.stdout.is_empty() {
            return Err(external(path, output.stderr_text()));
        }

        tracing::debug!(
            path = %path.display(),
            width = target.0,
            height = target.1,
            rotation,
            bytes = output.stdout.len(),
            "Rendered image with ffmpeg"
        );
        Ok(Bytes::from(with_jfif_marker(output.stdout)))
    }
}

fn external(path: &Path, message: impl ToString) -> AdapterError {
    AdapterError::External {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

/// Width and height from the first video stream line of an ffmpeg report.
pub fn parse_size(report: &str) -> Option<(u32, u32)> {
    let captures = size_pattern().captures(report)?;
    let width = captures[1].parse().ok()?;
    let height = captures[2].parse().ok()?;
    Some((width, height))
}

/// `-vf` chain: rotate, force full-range 4:2:0, halve while far larger
/// than the target, then scale to the target.
///
/// `source` is the size after rotation.
pub fn filter_chain(rotation: i32, source: (u32, u32), target: (u32, u32)) -> String {
    let mut filters = match rotation {
        270 => "transpose=1,".to_string(),
        180 => "hflip,vflip,".to_string(),
        90 => "transpose=2,".to_string(),
        _ => String::new(),
    };
    filters.push_str("format=yuvj420p,");

    let (target_w, target_h) = (f64::from(target.0.max(1)), f64::from(target.1.max(1)));
    let (mut width, mut height) = (f64::from(source.0), f64::from(source.1));
    while width / target_w >= PRESHRINK_RATIO || height / target_h >= PRESHRINK_RATIO {
        width /= 2.0;
        height /= 2.0;
        filters.push_str(&format!("scale={}:{},", width as u32, height as u32));
    }

    filters.push_str(&format!("scale={}:{}", target.0, target.1));
    filters
}

fn with_jfif_marker(jpeg: Vec<u8>) -> Vec<u8> {
    let head = &jpeg[..jpeg.len().min(10)];
    if jpeg.len() < 2 || head.windows(4).any(|w| w == b"JFIF") {
        return jpeg;
    }
    let mut out = Vec::with_capacity(jpeg.len() + JFIF_TAG.len());
    out.extend_from_slice(&jpeg[..2]);
    out.extend_from_slice(JFIF_TAG);
    out.extend_from_slice(&jpeg[2..]);
    out
}
