//! Demo settings
//!
//! Loaded from an optional TOML file, then `CAPTURE_DEMO__*` environment
//! variables (e.g. `CAPTURE_DEMO__CAMERA__RESOLUTION=qvga`).

use config::{Config, ConfigError, Environment, File, FileFormat};
use dcmi_camera::CameraConfig;
use serde::{Deserialize, Serialize};

/// Default settings file, looked up in the working directory
pub const DEFAULT_PATH: &str = "capture-demo.toml";

/// Target exposure levels, applied step by step after init
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExposureSettings {
    pub brightness: i8,
    pub contrast: i8,
    pub night_mode: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoSettings {
    /// Sensor configuration for the snapshot phase
    pub camera: CameraConfig,
    pub exposure: ExposureSettings,
    /// Number of single frames to take
    pub snapshots: u32,
    /// Length of the continuous phase (milliseconds, 0 to skip)
    pub continuous_ms: u64,
    /// Capture buffer size in words; largest frame if unset
    pub buffer_words: Option<usize>,
    /// Max log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            camera: CameraConfig::default(),
            exposure: ExposureSettings::default(),
            snapshots: 3,
            continuous_ms: 1000,
            buffer_words: None,
            log_level: "info".to_string(),
        }
    }
}

impl DemoSettings {
    /// Load from `path` (or [`DEFAULT_PATH`]) and the environment
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let required = path.is_some();
        let path = path.unwrap_or(DEFAULT_PATH);
        Config::builder()
            .add_source(File::with_name(path).required(required))
            .add_source(
                Environment::with_prefix("CAPTURE_DEMO")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }

    /// Parse settings from TOML text
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}
