//! Configuration management for the blackbox.
//!
//! Loads configuration from platform-standard config directories:
//! - Linux: `~/.config/blackbox/config.json`
//! - macOS: `~/Library/Application Support/blackbox/config.json`
//! - Windows: `%APPDATA%\blackbox\config\config.json`

use crate::error::ConfigError;
use crate::location::{FixedLocation, LocationProvider, NoLocation};
use crate::recorder::RecorderSettings;
use crate::selector::SelectorSettings;
use blackbox_common::logging::{config_path, default_chunk_dir, default_outbox_dir};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// How chunk files are encoded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// H.264 in MP4 through FFmpeg
    #[default]
    H264,
    /// Unencoded RGB24 frames; no FFmpeg required
    Raw,
}

impl Codec {
    /// Chunk format reported in bundle metadata.
    pub fn format_name(self) -> &'static str {
        match self {
            Self::H264 => "mp4",
            Self::Raw => "rawvideo",
        }
    }
}

/// Recorder settings group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecorderConfig {
    /// Chunk directory. If None, uses the platform data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
    /// Camera device. If None, uses the platform default camera.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Nominal chunk length in seconds.
    #[serde(default = "default_chunk_seconds")]
    pub chunk_seconds: u32,
    #[serde(default)]
    pub codec: Codec,
    /// Keep only the newest N chunks. None keeps every chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retain_chunks: Option<usize>,
}

fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    720
}

fn default_fps() -> u32 {
    30
}

fn default_chunk_seconds() -> u32 {
    10
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            device: None,
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            chunk_seconds: default_chunk_seconds(),
            codec: Codec::default(),
            retain_chunks: None,
        }
    }
}

/// Evidence selection timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelectorConfig {
    #[serde(default = "default_grace_seconds")]
    pub grace_seconds: f64,
    #[serde(default = "default_completion_wait_seconds")]
    pub completion_wait_seconds: f64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_grace_seconds() -> f64 {
    1.0
}

fn default_completion_wait_seconds() -> f64 {
    25.0
}

fn default_poll_interval_ms() -> u64 {
    250
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            grace_seconds: default_grace_seconds(),
            completion_wait_seconds: default_completion_wait_seconds(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Bundle packaging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackagerConfig {
    /// Deflate level, 0-9.
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
}

fn default_compression_level() -> u32 {
    crate::packager::DEFAULT_COMPRESSION_LEVEL
}

impl Default for PackagerConfig {
    fn default() -> Self {
        Self {
            compression_level: default_compression_level(),
        }
    }
}

/// Trigger phrase settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerConfig {
    #[serde(default = "default_phrases")]
    pub phrases: Vec<String>,
}

fn default_phrases() -> Vec<String> {
    vec!["blackbox".to_string(), "black box".to_string()]
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            phrases: default_phrases(),
        }
    }
}

/// Fixed location tag. Both coordinates must be set to be used.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LocationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
}

/// Upload settings group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct UploadConfig {
    /// Outbox directory. If None, uses the platform data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbox_dir: Option<String>,
}

/// Blackbox configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct BlackboxConfig {
    #[serde(default)]
    pub recorder: RecorderConfig,
    #[serde(default)]
    pub selector: SelectorConfig,
    #[serde(default)]
    pub packager: PackagerConfig,
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub location: LocationConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

fn non_empty_path(value: &Option<String>) -> Option<PathBuf> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
}

fn seconds(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

impl BlackboxConfig {
    /// Directory the recorder writes chunks into.
    pub fn chunk_dir(&self) -> PathBuf {
        non_empty_path(&self.recorder.output_dir).unwrap_or_else(default_chunk_dir)
    }

    /// Directory finished bundles are dropped into.
    pub fn outbox_dir(&self) -> PathBuf {
        non_empty_path(&self.upload.outbox_dir).unwrap_or_else(default_outbox_dir)
    }

    pub fn recorder_settings(&self) -> RecorderSettings {
        RecorderSettings {
            chunk_dir: self.chunk_dir(),
            chunk_seconds: self.recorder.chunk_seconds,
            retain_chunks: self.recorder.retain_chunks,
        }
    }

    pub fn selector_settings(&self) -> SelectorSettings {
        SelectorSettings {
            grace: seconds(self.selector.grace_seconds),
            completion_wait: seconds(self.selector.completion_wait_seconds),
            poll_interval: Duration::from_millis(self.selector.poll_interval_ms.max(1)),
        }
    }

    /// The configured location tag, or none.
    pub fn location_provider(&self) -> Arc<dyn LocationProvider> {
        match (self.location.lat, self.location.lng) {
            (Some(lat), Some(lng)) => Arc::new(FixedLocation::new(lat, lng)),
            _ => Arc::new(NoLocation),
        }
    }
}

/// Load configuration from an explicit file.
pub fn load_config_from(path: &Path) -> Result<BlackboxConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load configuration from disk.
/// Returns default config if file doesn't exist or is invalid.
pub fn load_config() -> BlackboxConfig {
    let Some(path) = config_path() else {
        warn!("Could not determine config directory, using defaults");
        return BlackboxConfig::default();
    };

    if !path.exists() {
        info!("No config file found, using defaults");
        return BlackboxConfig::default();
    }

    match load_config_from(&path) {
        Ok(config) => {
            info!("Loaded config from {}", path.display());
            config
        }
        Err(e) => {
            warn!("{}. Using defaults.", e);
            BlackboxConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = BlackboxConfig::default();
        assert_eq!(config.recorder.width, 1280);
        assert_eq!(config.recorder.height, 720);
        assert_eq!(config.recorder.fps, 30);
        assert_eq!(config.recorder.chunk_seconds, 10);
        assert_eq!(config.recorder.codec, Codec::H264);
        assert!(config.recorder.retain_chunks.is_none());
        assert_eq!(config.packager.compression_level, 6);
        assert_eq!(config.trigger.phrases, vec!["blackbox", "black box"]);
    }

    #[test]
    fn test_selector_settings_from_config() {
        let settings = BlackboxConfig::default().selector_settings();
        assert_eq!(settings, SelectorSettings::default());

        let mut config = BlackboxConfig::default();
        config.selector.grace_seconds = -3.0;
        config.selector.poll_interval_ms = 0;
        let settings = config.selector_settings();
        assert_eq!(settings.grace, Duration::ZERO);
        assert_eq!(settings.poll_interval, Duration::from_millis(1));
    }

    #[test]
    fn test_empty_directories_are_not_serialized() {
        let json = serde_json::to_string(&BlackboxConfig::default()).unwrap();
        assert!(!json.contains("output_dir"));
        assert!(!json.contains("outbox_dir"));
        assert!(!json.contains("retain_chunks"));
    }

    #[test]
    fn test_blank_output_dir_uses_default() {
        let mut config = BlackboxConfig::default();
        config.recorder.output_dir = Some("  ".to_string());
        assert_eq!(config.chunk_dir(), default_chunk_dir());

        config.recorder.output_dir = Some("/var/blackbox".to_string());
        assert_eq!(config.recorder_settings().chunk_dir, PathBuf::from("/var/blackbox"));
    }

    #[test]
    fn test_config_backward_compatible() {
        // Old config with only a recorder group and no codec
        let json = r#"{"recorder": {"fps": 15}}"#;
        let parsed: BlackboxConfig = serde_json::from_str(json).unwrap();

        assert_eq!(parsed.recorder.fps, 15);
        assert_eq!(parsed.recorder.width, 1280);
        assert_eq!(parsed.recorder.codec, Codec::H264);
        assert_eq!(parsed.selector, SelectorConfig::default());
        assert_eq!(parsed.trigger.phrases.len(), 2);
    }

    #[test]
    fn test_location_requires_both_coordinates() {
        let mut config = BlackboxConfig::default();
        config.location.lat = Some(10.0);
        assert!(config.location_provider().current_location().is_none());

        config.location.lng = Some(20.0);
        let location = config.location_provider().current_location().unwrap();
        assert_eq!((location.lat, location.lng), (10.0, 20.0));
    }

    #[test]
    fn test_serialize_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        let mut config = BlackboxConfig::default();
        config.recorder.codec = Codec::Raw;
        config.recorder.retain_chunks = Some(360);
        config.upload.outbox_dir = Some("/srv/outbox".to_string());

        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
        assert_eq!(load_config_from(&path).unwrap(), config);
    }

    #[test]
    fn test_load_errors_are_typed() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(load_config_from(&missing), Err(ConfigError::Read { .. })));

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{ not json").unwrap();
        assert!(matches!(load_config_from(&broken), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_codec_format_names() {
        assert_eq!(Codec::H264.format_name(), "mp4");
        assert_eq!(Codec::Raw.format_name(), "rawvideo");
    }

    #[test]
    fn test_codec_names() {
        let parsed: RecorderConfig = serde_json::from_str(r#"{ "codec": "raw" }"#).unwrap();
        assert_eq!(parsed.codec, Codec::Raw);
        assert!(serde_json::from_str::<RecorderConfig>(r#"{ "codec": "vp9" }"#).is_err());
    }
}
