//! Server configuration.
//!
//! Settings come from an INI file (see [`ConfigFile`]) and can also be
//! built programmatically with the `with_*` builders, which is how tests
//! and the CLI override individual values.
//!
//! ```ini
//! [Server]
//! port = 9032
//! ffmpeg = /usr/bin/ffmpeg
//! tivo_mak = 0123456789
//!
//! [Photos]
//! type = photo
//! path = /srv/media/photos
//!
//! [_tivo_6520001802DA1F0]
//! width = 1920
//! height = 1080
//! ```

mod file;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub use file::{config_file_path, ConfigError, ConfigFile};

/// Default HTTP port of the TiVoConnect service.
pub const DEFAULT_PORT: u16 = 9032;

/// Default budget for a probe subprocess.
pub const DEFAULT_FFMPEG_WAIT_SECS: u64 = 10;

/// Kind of media a share serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShareKind {
    Photo,
    Video,
}

impl ShareKind {
    /// Protocol content type of the share's top-level container.
    pub fn content_type(&self) -> &'static str {
        match self {
            ShareKind::Photo => "x-container/tivo-photos",
            ShareKind::Video => "x-container/tivo-videos",
        }
    }
}

impl FromStr for ShareKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "photo" => Ok(ShareKind::Photo),
            "video" => Ok(ShareKind::Video),
            other => Err(format!("Unknown share type '{}'", other)),
        }
    }
}

impl fmt::Display for ShareKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShareKind::Photo => write!(f, "photo"),
            ShareKind::Video => write!(f, "video"),
        }
    }
}

/// Tri-state switch used for `ts` and `allow_recurse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Toggle {
    /// Decide per device.
    #[default]
    Auto,
    On,
    Off,
}

impl Toggle {
    /// Resolve against the per-device default.
    pub fn resolve(self, auto: bool) -> bool {
        match self {
            Toggle::Auto => auto,
            Toggle::On => true,
            Toggle::Off => false,
        }
    }
}

impl FromStr for Toggle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(Toggle::Auto),
            "on" | "true" | "yes" | "1" => Ok(Toggle::On),
            "off" | "false" | "no" | "0" => Ok(Toggle::Off),
            other => Err(format!("Expected auto/on/off, got '{}'", other)),
        }
    }
}

/// One shared directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareConfig {
    /// Section name; also the first component of every container path.
    pub name: String,
    pub kind: ShareKind,
    pub path: PathBuf,
    /// Always list folders first, then by name, ignoring `SortOrder`.
    pub force_alpha: bool,
    pub allow_recurse: Toggle,
}

impl ShareConfig {
    pub fn new(name: impl Into<String>, kind: ShareKind, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            kind,
            path: path.into(),
            force_alpha: false,
            allow_recurse: Toggle::Auto,
        }
    }

    pub fn with_force_alpha(mut self, force_alpha: bool) -> Self {
        self.force_alpha = force_alpha;
        self
    }

    pub fn with_allow_recurse(mut self, allow: Toggle) -> Self {
        self.allow_recurse = allow;
        self
    }

    /// Whether `Recurse=Yes` is honoured for `device`.
    ///
    /// Newer devices (serial numbers from `7` up) mishandle recursive
    /// listings, so recursion is off for them unless forced on.
    pub fn recursion_allowed(&self, device: &DeviceProfile) -> bool {
        let auto = device.tsn.is_empty() || device.tsn.as_str() < "7";
        self.allow_recurse.resolve(auto)
    }
}

/// Output limits for one client device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    /// Device serial number (`tsn` header); empty when unknown.
    pub tsn: String,
    pub name: Option<String>,
    pub width: u32,
    pub height: u32,
    /// Target video bitrate in kbit/s.
    pub video_bitrate: u32,
    /// Largest video bitrate passed through untouched, kbit/s.
    pub max_video_bitrate: u32,
    /// Audio bitrate for transcodes, kbit/s.
    pub audio_bitrate: u32,
    pub max_audio_bitrate: u32,
    pub ts: Toggle,
}

impl DeviceProfile {
    /// Profile with defaults derived from the serial number.
    pub fn for_tsn(tsn: impl Into<String>) -> Self {
        let tsn = tsn.into();
        let (width, height) = if is_hd_device(&tsn) { (1920, 1080) } else { (544, 480) };
        Self {
            tsn,
            name: None,
            width,
            height,
            video_bitrate: 4096,
            max_video_bitrate: 30000,
            audio_bitrate: 192,
            max_audio_bitrate: 448,
            ts: Toggle::Auto,
        }
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_ts(mut self, ts: Toggle) -> Self {
        self.ts = ts;
        self
    }

    /// Whether this device can play MPEG transport streams at all.
    pub fn is_ts_capable(&self) -> bool {
        self.tsn.starts_with("663") || self.tsn.chars().next().is_some_and(|c| c >= '7')
    }

    /// Whether a file should be offered as a transport stream.
    ///
    /// Requires a capable device; `ts = on` forces it, `ts = off` never
    /// offers it and `auto` follows `likely_ts`.
    pub fn prefers_transport_stream(&self, likely_ts: bool) -> bool {
        self.is_ts_capable() && self.ts.resolve(likely_ts)
    }

    /// Whether this device can display high-definition video.
    pub fn is_hd(&self) -> bool {
        self.height >= 720
    }
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self::for_tsn("")
    }
}

fn is_hd_device(tsn: &str) -> bool {
    tsn.chars().next().is_some_and(|c| c >= '6')
}

/// `[Server]` section settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub port: u16,
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub tivodecode: Option<PathBuf>,
    /// Media access key for decoding `.tivo` recordings.
    pub tivo_mak: Option<String>,
    /// Budget for probe subprocesses before they are killed.
    pub ffmpeg_wait: Duration,
    /// Server-wide transport stream preference, overridable per device.
    pub ts: Toggle,
    pub guid: String,
    pub log_dir: Option<PathBuf>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            tivodecode: None,
            tivo_mak: None,
            ffmpeg_wait: Duration::from_secs(DEFAULT_FFMPEG_WAIT_SECS),
            ts: Toggle::Auto,
            guid: "123456".to_string(),
            log_dir: None,
        }
    }
}

impl ServerSettings {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_ffmpeg(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffmpeg = path.into();
        self
    }

    pub fn with_ffprobe(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffprobe = path.into();
        self
    }

    pub fn with_tivodecode(mut self, path: impl Into<PathBuf>, mak: impl Into<String>) -> Self {
        self.tivodecode = Some(path.into());
        self.tivo_mak = Some(mak.into());
        self
    }

    pub fn with_ffmpeg_wait(mut self, wait: Duration) -> Self {
        self.ffmpeg_wait = wait;
        self
    }

    /// Both the decoder binary and the media access key are configured.
    pub fn can_decode_tivo(&self) -> bool {
        self.tivodecode.is_some() && self.tivo_mak.as_deref().is_some_and(|m| !m.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_share_kind_parse() {
        assert_eq!("Photo".parse::<ShareKind>(), Ok(ShareKind::Photo));
        assert_eq!(" video ".parse::<ShareKind>(), Ok(ShareKind::Video));
        assert!("music".parse::<ShareKind>().is_err());
    }

    #[test]
    fn test_toggle_parse_and_resolve() {
        assert_eq!("auto".parse::<Toggle>(), Ok(Toggle::Auto));
        assert_eq!("True".parse::<Toggle>(), Ok(Toggle::On));
        assert_eq!("off".parse::<Toggle>(), Ok(Toggle::Off));
        assert!(Toggle::Auto.resolve(true));
        assert!(!Toggle::Off.resolve(true));
    }

    #[test]
    fn test_device_defaults_from_tsn() {
        let sd = DeviceProfile::for_tsn("2400000000");
        assert_eq!((sd.width, sd.height), (544, 480));
        assert!(!sd.is_hd());
        assert!(!sd.is_ts_capable());

        let premiere = DeviceProfile::for_tsn("7460001902A1");
        assert!(premiere.is_hd());
        assert!(premiere.is_ts_capable());
    }

    #[test]
    fn test_transport_stream_preference() {
        let premiere = DeviceProfile::for_tsn("7460001902A1");
        assert!(premiere.prefers_transport_stream(true));
        assert!(!premiere.prefers_transport_stream(false));

        let forced_on = premiere.clone().with_ts(Toggle::On);
        assert!(forced_on.prefers_transport_stream(false));
        let forced_off = premiere.with_ts(Toggle::Off);
        assert!(!forced_off.prefers_transport_stream(true));

        // Forcing TS does not help a device that cannot play it
        let sd = DeviceProfile::for_tsn("2400000000").with_ts(Toggle::On);
        assert!(!sd.prefers_transport_stream(true));
    }

    #[test]
    fn test_recursion_allowed() {
        let share = ShareConfig::new("Photos", ShareKind::Photo, "/p");
        assert!(share.recursion_allowed(&DeviceProfile::for_tsn("")));
        assert!(share.recursion_allowed(&DeviceProfile::for_tsn("6520001")));
        assert!(!share.recursion_allowed(&DeviceProfile::for_tsn("7460001")));

        let forced = share.with_allow_recurse(Toggle::On);
        assert!(forced.recursion_allowed(&DeviceProfile::for_tsn("7460001")));
    }

    #[test]
    fn test_can_decode_tivo_needs_both() {
        let settings = ServerSettings::default();
        assert!(!settings.can_decode_tivo());
        let settings = settings.with_tivodecode("/usr/bin/tivodecode", "1234567890");
        assert!(settings.can_decode_tivo());
    }
}
