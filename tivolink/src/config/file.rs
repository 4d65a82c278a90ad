//! INI configuration file loading.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::{Ini, Properties};
use thiserror::Error;

use super::{DeviceProfile, ServerSettings, ShareConfig, ShareKind, Toggle};

const SERVER_SECTION: &str = "Server";
const DEVICE_SECTION_PREFIX: &str = "_tivo_";

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] ini::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] ini::ParseError),

    #[error("Invalid value for [{section}] {key}: {message}")]
    InvalidValue {
        section: String,
        key: String,
        message: String,
    },

    #[error("Share [{0}] has no path")]
    MissingPath(String),
}

/// Default location of the configuration file (`~/.tivolink/tivolink.conf`).
pub fn config_file_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tivolink")
        .join("tivolink.conf")
}

/// Parsed configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    pub server: ServerSettings,
    pub shares: Vec<ShareConfig>,
    pub devices: Vec<DeviceProfile>,
}

impl ConfigFile {
    /// Load from the default path.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_file_path())
    }

    /// Load from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path)?;
        let config = Self::from_ini(&ini)?;
        tracing::debug!(
            path = %path.display(),
            shares = config.shares.len(),
            devices = config.devices.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse configuration text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text)?;
        Self::from_ini(&ini)
    }

    /// Add a share (builder form, used by tests and the CLI).
    pub fn with_share(mut self, share: ShareConfig) -> Self {
        self.shares.push(share);
        self
    }

    pub fn with_server(mut self, server: ServerSettings) -> Self {
        self.server = server;
        self
    }

    /// Look up a share by name, ignoring case.
    pub fn share(&self, name: &str) -> Option<&ShareConfig> {
        self.shares.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// Profile for a device serial number.
    ///
    /// Devices without their own section get defaults derived from the
    /// serial number and the server-wide `ts` preference.
    pub fn device(&self, tsn: &str) -> DeviceProfile {
        self.devices
            .iter()
            .find(|d| d.tsn == tsn)
            .cloned()
            .unwrap_or_else(|| DeviceProfile::for_tsn(tsn).with_ts(self.server.ts))
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = ConfigFile::default();

        if let Some(props) = ini.section(Some(SERVER_SECTION)) {
            config.server = parse_server(props)?;
        }

        for (section, props) in ini.iter() {
            let Some(name) = section else { continue };
            if name == SERVER_SECTION {
                continue;
            }
            if let Some(tsn) = name.strip_prefix(DEVICE_SECTION_PREFIX) {
                config.devices.push(parse_device(name, tsn, props, config.server.ts)?);
            } else if props.contains_key("type") {
                config.shares.push(parse_share(name, props)?);
            } else {
                tracing::warn!(section = name, "Ignoring section without a share type");
            }
        }

        Ok(config)
    }
}

fn parse_server(props: &Properties) -> Result<ServerSettings, ConfigError> {
    let mut server = ServerSettings::default();
    if let Some(port) = value(SERVER_SECTION, props, "port")? {
        server.port = port;
    }
    if let Some(path) = props.get("ffmpeg") {
        server.ffmpeg = PathBuf::from(path);
    }
    if let Some(path) = props.get("ffprobe") {
        server.ffprobe = PathBuf::from(path);
    }
    server.tivodecode = props.get("tivodecode").map(PathBuf::from);
    server.tivo_mak = props.get("tivo_mak").map(str::to_string);
    if let Some(secs) = value::<u64>(SERVER_SECTION, props, "ffmpeg_wait")? {
        server.ffmpeg_wait = Duration::from_secs(secs);
    }
    if let Some(ts) = value(SERVER_SECTION, props, "ts")? {
        server.ts = ts;
    }
    if let Some(guid) = props.get("guid") {
        server.guid = guid.to_string();
    }
    server.log_dir = props.get("log_dir").map(PathBuf::from);
    Ok(server)
}

fn parse_share(name: &str, props: &Properties) -> Result<ShareConfig, ConfigError> {
    let kind: ShareKind = value(name, props, "type")?.unwrap_or(ShareKind::Video);
    let path = props
        .get("path")
        .ok_or_else(|| ConfigError::MissingPath(name.to_string()))?;

    let mut share = ShareConfig::new(name, kind, path);
    if let Some(force_alpha) = value::<Toggle>(name, props, "force_alpha")? {
        share.force_alpha = force_alpha == Toggle::On;
    }
    if let Some(allow) = value(name, props, "allow_recurse")? {
        share.allow_recurse = allow;
    }
    Ok(share)
}

fn parse_device(
    section: &str,
    tsn: &str,
    props: &Properties,
    server_ts: Toggle,
) -> Result<DeviceProfile, ConfigError> {
    let mut device = DeviceProfile::for_tsn(tsn).with_ts(server_ts);
    device.name = props.get("name").map(str::to_string);
    if let Some(width) = value(section, props, "width")? {
        device.width = width;
    }
    if let Some(height) = value(section, props, "height")? {
        device.height = height;
    }
    if let Some(br) = bitrate(section, props, "video_br")? {
        device.video_bitrate = br;
    }
    if let Some(br) = bitrate(section, props, "max_video_br")? {
        device.max_video_bitrate = br;
    }
    if let Some(br) = bitrate(section, props, "audio_br")? {
        device.audio_bitrate = br;
    }
    if let Some(br) = bitrate(section, props, "max_audio_br")? {
        device.max_audio_bitrate = br;
    }
    if let Some(ts) = value(section, props, "ts")? {
        device.ts = ts;
    }
    Ok(device)
}

fn value<T>(section: &str, props: &Properties, key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match props.get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                section: section.to_string(),
                key: key.to_string(),
                message: e.to_string(),
            }),
    }
}

/// Bitrates accept a trailing `K` / `k` (`4096K`) or `M` (`16M`).
fn bitrate(section: &str, props: &Properties, key: &str) -> Result<Option<u32>, ConfigError> {
    let Some(raw) = props.get(key) else {
        return Ok(None);
    };
    let raw = raw.trim();
    let (digits, scale) = match raw.chars().last() {
        Some('k' | 'K') => (&raw[..raw.len() - 1], 1),
        Some('m' | 'M') => (&raw[..raw.len() - 1], 1000),
        _ => (raw, 1),
    };
    digits
        .parse::<u32>()
        .map(|n| Some(n * scale))
        .map_err(|e| ConfigError::InvalidValue {
            section: section.to_string(),
            key: key.to_string(),
            message: e.to_string(),
        })
}
