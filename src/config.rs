//! TOML configuration.
//!
//! Every section and key is optional; missing values fall back to defaults.
//!
//! ```toml
//! [detection]
//! threshold_db = -40.0
//! min_duration_ms = 1500.0
//!
//! [export]
//! format = "mp3"
//! mp3_bitrate = 256
//! ffmpeg_path = "/opt/ffmpeg/bin/ffmpeg"
//!
//! [lookup]
//! discogs_token = "..."
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SliceError};
use crate::gaps::DetectionParams;
use crate::lookup::DEFAULT_USER_AGENT;
use crate::models::OutputFormat;

pub const CONFIG_DIR_NAME: &str = "autoslice";
pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub detection: DetectionParams,

    #[serde(default)]
    pub export: ExportSettings,

    #[serde(default)]
    pub lookup: LookupSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSettings {
    /// Base directory for `{artist}/{album}/` output folders.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default)]
    pub format: OutputFormat,

    /// MP3 bitrate in kbps.
    #[serde(default = "default_mp3_bitrate")]
    pub mp3_bitrate: u32,

    /// Output sample rate; the source rate is kept when unset.
    #[serde(default)]
    pub sample_rate: Option<u32>,

    #[serde(default)]
    pub normalize: bool,

    /// ffmpeg executable; looked up on `PATH` when unset.
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            format: OutputFormat::default(),
            mp3_bitrate: default_mp3_bitrate(),
            sample_rate: None,
            normalize: false,
            ffmpeg_path: None,
        }
    }
}

fn default_output_dir() -> PathBuf {
    dirs::audio_dir()
        .map(|d| d.join("AutoSlice"))
        .unwrap_or_else(|| PathBuf::from("AutoSlice"))
}

fn default_mp3_bitrate() -> u32 {
    320
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupSettings {
    /// Discogs personal access token.
    #[serde(default)]
    pub discogs_token: Option<String>,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for LookupSettings {
    fn default() -> Self {
        Self {
            discogs_token: None,
            user_agent: default_user_agent(),
        }
    }
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

/// `<config dir>/autoslice/config.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

impl Settings {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .map_err(|e| SliceError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
            .map_err(|e| SliceError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load from `path` if given, otherwise from [`default_config_path`].
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => match default_config_path() {
                Some(p) => Self::load(&p),
                None => Ok(Self::default()),
            },
        }
    }

    fn validate(&self) -> Result<()> {
        let d = &self.detection;
        if d.window_ms <= 0.0 || d.hop_ms <= 0.0 {
            return Err(SliceError::Config(
                "detection.window_ms and detection.hop_ms must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&d.sensitivity) {
            return Err(SliceError::Config(
                "detection.sensitivity must be between 0 and 1".to_string(),
            ));
        }
        if d.min_duration_ms < 0.0 {
            return Err(SliceError::Config(
                "detection.min_duration_ms must not be negative".to_string(),
            ));
        }
        if self.export.mp3_bitrate == 0 {
            return Err(SliceError::Config("export.mp3_bitrate must be positive".to_string()));
        }
        Ok(())
    }
}
