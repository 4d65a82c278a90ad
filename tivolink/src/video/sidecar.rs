//! Text sidecar metadata.
//!
//! For `/videos/Show.mpg` the following files are read in order, later
//! files overriding earlier ones:
//!
//! ```text
//! /videos/.meta/default.txt
//! /videos/.meta/Show.mpg.txt
//! /videos/Show.mpg.txt
//! ```
//!
//! Each line is `key : value`; lines without a colon are ignored.

use std::fs;
use std::path::{Path, PathBuf};

use super::details::VideoDetails;

/// Candidate sidecar files for `path`, lowest precedence first.
pub fn sidecar_paths(path: &Path) -> Vec<PathBuf> {
    let mut paths = Vec::with_capacity(3);
    if let (Some(dir), Some(name)) = (path.parent(), path.file_name()) {
        let meta = dir.join(".meta");
        paths.push(meta.join("default.txt"));
        let mut own = name.to_os_string();
        own.push(".txt");
        paths.push(meta.join(&own));
        paths.push(dir.join(own));
    }
    paths
}

/// Apply `key : value` lines from `text`.
pub fn parse_into(text: &str, details: &mut VideoDetails) {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    for line in text.lines() {
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim();
            if !key.is_empty() {
                details.set(key, value);
            }
        }
    }
}

/// Read every existing sidecar of `path` into `details`.
pub fn apply_sidecars(path: &Path, details: &mut VideoDetails) {
    for candidate in sidecar_paths(path) {
        match fs::read(&candidate) {
            Ok(bytes) => {
                tracing::debug!(path = %candidate.display(), "Reading metadata sidecar");
                parse_into(&String::from_utf8_lossy(&bytes), details);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %candidate.display(), error = %e, "Could not read sidecar");
            }
        }
    }
}
