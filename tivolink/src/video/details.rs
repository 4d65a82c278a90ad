//! Program details shown by the client for a video.
//!
//! [`VideoDetails`] holds only what is actually known about a file; every
//! field is optional. Defaults are filled in by [`VideoDetails::resolve`]
//! when the record is rendered, never on read.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, NaiveDateTime, Utc};

use super::sidecar;
use crate::config::DeviceProfile;
use crate::transcode::VideoInfo;

/// Timestamp layout used throughout the details XML.
const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Marks a recording as high definition.
const SHOWING_BITS_HD: u32 = 4096;

/// What is known about one video file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoDetails {
    pub title: Option<String>,
    pub series_title: Option<String>,
    pub episode_title: Option<String>,
    pub episode_number: Option<String>,
    pub description: Option<String>,
    pub original_air_date: Option<String>,
    pub movie_year: Option<String>,
    pub call_sign: Option<String>,
    pub series_id: Option<String>,
    pub program_id: Option<String>,
    pub tv_rating: Option<String>,
    pub mpaa_rating: Option<String>,
    pub star_rating: Option<String>,
    /// `file`, `oad` or an ISO timestamp; replaced by the resolved start
    /// time once timing is known.
    pub time: Option<String>,
    pub is_episode: Option<bool>,
    pub showing_bits: Option<u32>,
    pub display_major_number: Option<String>,
    pub display_minor_number: Option<String>,
    pub color_code: Option<String>,
    /// `(name, code)`, e.g. `("SERIES", "5")`.
    pub show_type: Option<(String, String)>,
    /// Multi-valued fields keyed by their `v`-prefixed name (`vActor`,
    /// `vProgramGenre`...).
    pub credits: BTreeMap<String, Vec<String>>,
    pub duration_ms: Option<u64>,
    /// Expected transfer size in bytes.
    pub size: Option<u64>,
    pub start_time: Option<NaiveDateTime>,
    pub stop_time: Option<NaiveDateTime>,
}

/// [`VideoDetails`] with every default applied, ready for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDetails {
    pub title: String,
    pub series_title: String,
    pub episode_title: String,
    pub episode_number: String,
    pub description: String,
    pub original_air_date: String,
    pub movie_year: String,
    pub call_sign: String,
    pub series_id: String,
    pub program_id: String,
    pub tv_rating: String,
    pub mpaa_rating: String,
    pub star_rating: String,
    pub time: String,
    pub start_time: String,
    pub stop_time: String,
    pub iso_duration: String,
    pub duration_ms: String,
    pub size: String,
    pub is_episode: bool,
    pub showing_bits: u32,
    pub display_major_number: String,
    pub display_minor_number: String,
    /// `(name, code)`.
    pub color: (String, String),
    pub show_type: (String, String),
    pub credits: BTreeMap<String, Vec<String>>,
}

impl ResolvedDetails {
    /// Values of a multi-valued field; empty when unknown.
    pub fn list(&self, key: &str) -> &[String] {
        self.credits.get(key).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl VideoDetails {
    pub fn new() -> Self {
        Self::default()
    }

    /// Title from the file name, air date from the modification time, then
    /// any sidecar text files layered on top.
    pub fn for_file(path: &Path, modified: SystemTime) -> Self {
        let mut details = Self {
            title: path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned()),
            original_air_date: Some(iso(modified)),
            ..Self::default()
        };
        sidecar::apply_sidecars(path, &mut details);
        details
    }

    /// Set a field from a `key : value` pair.
    ///
    /// Keys beginning with `v` are multi-valued; repeated values are
    /// appended once. Unknown keys are ignored.
    pub fn set(&mut self, key: &str, value: &str) {
        let value = value.trim();
        if key.starts_with('v') {
            let values = self.credits.entry(key.to_string()).or_default();
            if !value.is_empty() && !values.iter().any(|v| v == value) {
                values.push(value.to_string());
            }
            return;
        }

        let slot = match key {
            "title" => &mut self.title,
            "seriesTitle" => &mut self.series_title,
            "episodeTitle" => &mut self.episode_title,
            "episodeNumber" => &mut self.episode_number,
            "description" => &mut self.description,
            "originalAirDate" => &mut self.original_air_date,
            "movieYear" => &mut self.movie_year,
            "callsign" => &mut self.call_sign,
            "seriesId" => &mut self.series_id,
            "programId" => &mut self.program_id,
            "tvRating" => &mut self.tv_rating,
            "mpaaRating" => &mut self.mpaa_rating,
            "starRating" => &mut self.star_rating,
            "time" => &mut self.time,
            "displayMajorNumber" => &mut self.display_major_number,
            "displayMinorNumber" => &mut self.display_minor_number,
            "colorCode" => &mut self.color_code,
            "isEpisode" => {
                self.is_episode = Some(matches!(
                    value.to_ascii_lowercase().as_str(),
                    "true" | "yes" | "1"
                ));
                return;
            }
            "showingBits" => {
                self.showing_bits = value.parse().ok();
                return;
            }
            _ => {
                tracing::trace!(key, "Ignoring unknown details field");
                return;
            }
        };
        *slot = Some(value.to_string());
    }

    /// Fill in probe-derived facts: HD flag, timing and expected size.
    ///
    /// # Arguments
    ///
    /// * `info` - Probe result for the file
    /// * `device` - Client the details are rendered for
    /// * `modified` - File modification time, used for `time = file`
    /// * `transfer_size` - Exact size when sent unchanged, `None` when the
    ///   file will be transcoded and the size must be estimated
    pub fn complete(
        &mut self,
        info: &VideoInfo,
        device: &DeviceProfile,
        modified: SystemTime,
        transfer_size: Option<u64>,
    ) {
        if (info.height >= 720 && device.height >= 720)
            || (info.width >= 1280 && device.width >= 1280)
        {
            self.showing_bits = Some(SHOWING_BITS_HD);
        }

        if let Some(episode) = &self.episode_number {
            self.episode_number = Some(episode.trim().parse::<u32>().unwrap_or(0).to_string());
        }

        let start = self.start_time(modified);
        let duration_ms = info.duration_ms.unwrap_or(0);
        if info.duration_ms.is_none() {
            tracing::warn!(title = ?self.title, "Video has no duration");
        }
        let length = chrono::Duration::milliseconds(duration_ms as i64);

        self.time = Some(start.format(ISO_FORMAT).to_string());
        self.start_time = Some(start);
        self.stop_time = Some(start + length);
        self.duration_ms = Some(duration_ms);
        self.size = Some(transfer_size.unwrap_or_else(|| {
            estimated_size(duration_ms, device.video_bitrate, device.max_audio_bitrate)
        }));
    }

    fn start_time(&self, modified: SystemTime) -> NaiveDateTime {
        let now = Utc::now().naive_utc();
        match self.time.as_deref().map(str::trim) {
            None => now,
            Some(t) if t.eq_ignore_ascii_case("file") => {
                DateTime::<Utc>::from(modified).naive_utc()
            }
            Some(t) if t.eq_ignore_ascii_case("oad") => self
                .original_air_date
                .as_deref()
                .and_then(parse_iso)
                .unwrap_or(now),
            Some(t) => parse_iso(t).unwrap_or_else(|| {
                tracing::warn!(time = t, "Bad time format, using current time");
                now
            }),
        }
    }

    /// Apply defaults for rendering.
    pub fn resolve(&self) -> ResolvedDetails {
        let text = |field: &Option<String>| field.clone().unwrap_or_default();
        let duration = Duration::from_millis(self.duration_ms.unwrap_or(0));
        let color_code = self.color_code.as_deref().unwrap_or("4");

        ResolvedDetails {
            title: text(&self.title),
            series_title: text(&self.series_title),
            episode_title: text(&self.episode_title),
            episode_number: text(&self.episode_number),
            description: text(&self.description),
            original_air_date: text(&self.original_air_date),
            movie_year: text(&self.movie_year),
            call_sign: text(&self.call_sign),
            series_id: text(&self.series_id),
            program_id: text(&self.program_id),
            tv_rating: text(&self.tv_rating),
            mpaa_rating: text(&self.mpaa_rating),
            star_rating: text(&self.star_rating),
            time: text(&self.time),
            start_time: self
                .start_time
                .map(|t| t.format(ISO_FORMAT).to_string())
                .unwrap_or_default(),
            stop_time: self
                .stop_time
                .map(|t| t.format(ISO_FORMAT).to_string())
                .unwrap_or_default(),
            iso_duration: iso_duration(duration),
            duration_ms: self.duration_ms.map(|d| d.to_string()).unwrap_or_default(),
            size: self.size.map(|s| s.to_string()).unwrap_or_default(),
            is_episode: self.is_episode.unwrap_or(true),
            showing_bits: self.showing_bits.unwrap_or(0),
            display_major_number: self
                .display_major_number
                .clone()
                .unwrap_or_else(|| "0".to_string()),
            display_minor_number: self
                .display_minor_number
                .clone()
                .unwrap_or_else(|| "0".to_string()),
            color: color_name(color_code),
            show_type: self
                .show_type
                .clone()
                .unwrap_or_else(|| ("SERIES".to_string(), "5".to_string())),
            credits: self.credits.clone(),
        }
    }
}

/// Modification time of `path`, or now if it cannot be read.
pub fn modified_time(path: &Path) -> SystemTime {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or_else(|_| SystemTime::now())
}

/// Transfer size from bitrates (kbit/s) plus 2% container overhead.
pub fn estimated_size(duration_ms: u64, video_kbps: u32, audio_kbps: u32) -> u64 {
    let bits_per_sec = (u64::from(video_kbps) + u64::from(audio_kbps)) * 1000;
    let bytes = duration_ms as f64 / 1000.0 * bits_per_sec as f64 * 1.02 / 8.0;
    bytes as u64
}

/// `P{days}DT{h}H{m}M{s}S`.
pub fn iso_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let days = total / 86_400;
    let rest = total % 86_400;
    format!(
        "P{}DT{}H{}M{}S",
        days,
        rest / 3600,
        (rest % 3600) / 60,
        rest % 60
    )
}

fn iso(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).format(ISO_FORMAT).to_string()
}

fn parse_iso(text: &str) -> Option<NaiveDateTime> {
    let head = text.get(..19).unwrap_or(text);
    NaiveDateTime::parse_from_str(head, ISO_FORMAT).ok()
}

fn color_name(code: &str) -> (String, String) {
    let name = match code {
        "1" => "BW",
        "2" => "COLOR_AND_BW",
        "3" => "COLORIZED",
        "4" => "COLOR",
        _ => "COLOR",
    };
    (name.to_string(), code.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn info(width: u32, height: u32, duration_ms: u64) -> VideoInfo {
        VideoInfo {
            container: "mpeg".to_string(),
            width,
            height,
            duration_ms: Some(duration_ms),
            ..VideoInfo::default()
        }
    }

    #[test]
    fn test_defaults_apply_only_on_resolve() {
        let details = VideoDetails::new();
        assert_eq!(details.showing_bits, None);

        let resolved = details.resolve();
        assert_eq!(resolved.showing_bits, 0);
        assert_eq!(resolved.display_major_number, "0");
        assert_eq!(resolved.display_minor_number, "0");
        assert!(resolved.is_episode);
        assert_eq!(resolved.color, ("COLOR".to_string(), "4".to_string()));
        assert_eq!(resolved.show_type, ("SERIES".to_string(), "5".to_string()));
        assert!(resolved.list("vActor").is_empty());
        assert_eq!(resolved.title, "");
    }

    #[test]
    fn test_set_fields_and_lists() {
        let mut details = VideoDetails::new();
        details.set("title", " Pilot ");
        details.set("isEpisode", "false");
        details.set("vActor", "Ann");
        details.set("vActor", "Bob");
        details.set("vActor", "Ann");
        details.set("unknownKey", "x");

        assert_eq!(details.title.as_deref(), Some("Pilot"));
        assert_eq!(details.is_episode, Some(false));
        assert_eq!(details.credits["vActor"], vec!["Ann", "Bob"]);
    }

    #[test]
    fn test_complete_hd_timing_and_size() {
        let mut details = VideoDetails::new();
        details.set("time", "2020-05-01T20:00:00Z");
        details.set("episodeNumber", "012");
        let device = DeviceProfile::for_tsn("6520001802DA1F0");

        details.complete(&info(1920, 1080, 90 * 60 * 1000), &device, SystemTime::now(), None);

        assert_eq!(details.showing_bits, Some(SHOWING_BITS_HD));
        assert_eq!(details.episode_number.as_deref(), Some("12"));
        let start = NaiveDate::from_ymd_opt(2020, 5, 1)
            .unwrap()
            .and_hms_opt(20, 0, 0)
            .unwrap();
        assert_eq!(details.start_time, Some(start));
        assert_eq!(
            details.stop_time,
            Some(start + chrono::Duration::minutes(90))
        );
        assert_eq!(details.size, Some(estimated_size(90 * 60 * 1000, 4096, 448)));

        let resolved = details.resolve();
        assert_eq!(resolved.iso_duration, "P0DT1H30M0S");
        assert_eq!(resolved.time, "2020-05-01T20:00:00");
    }

    #[test]
    fn test_sd_device_never_flags_hd() {
        let mut details = VideoDetails::new();
        let sd = DeviceProfile::for_tsn("2400000000");
        details.complete(&info(1920, 1080, 1000), &sd, SystemTime::now(), Some(42));
        assert_eq!(details.showing_bits, None);
        assert_eq!(details.size, Some(42));
    }

    #[test]
    fn test_time_from_file_and_air_date() {
        let modified = SystemTime::UNIX_EPOCH + Duration::from_secs(86_400);
        let mut from_file = VideoDetails::new();
        from_file.set("time", "file");
        from_file.complete(&info(720, 480, 0), &DeviceProfile::default(), modified, Some(0));
        assert_eq!(from_file.resolve().start_time, "1970-01-02T00:00:00");

        let mut from_oad = VideoDetails::new();
        from_oad.set("time", "OAD");
        from_oad.set("originalAirDate", "1999-12-31T00:00:00Z");
        from_oad.complete(&info(720, 480, 0), &DeviceProfile::default(), modified, Some(0));
        assert_eq!(from_oad.resolve().start_time, "1999-12-31T00:00:00");
    }

    #[test]
    fn test_iso_duration_with_days() {
        assert_eq!(
            iso_duration(Duration::from_secs(86_400 + 3_723)),
            "P1DT1H2M3S"
        );
    }

    #[test]
    fn test_estimated_size() {
        // 10 s at 1000 + 0 kbit/s is 1.25 MB plus 2%.
        assert_eq!(estimated_size(10_000, 1000, 0), 1_275_000);
    }
}
