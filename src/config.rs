//! Runtime settings for narration jobs.
//!
//! Settings are read from an optional JSON file and then overridden by
//! command-line flags:
//!
//! ```json
//! {
//!   "voice": "bf_emma",
//!   "speed": 1.1,
//!   "model_dir": "models/kokoro",
//!   "encoder": { "program": "ffmpeg", "bitrate_kbps": 64 }
//! }
//! ```

use std::path::{Path, PathBuf};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::SynthesisParams;

/// Supported speed multipliers for the Kokoro engine.
pub const SPEED_RANGE: std::ops::RangeInclusive<f32> = 0.5..=2.0;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// How intermediate waveforms are transcoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[builder(default, setter(into))]
#[serde(default)]
pub struct EncodeSettings {
    /// Encoder executable, looked up on PATH when not absolute.
    pub program: PathBuf,
    /// Target bitrate in kbps.
    pub bitrate_kbps: u32,
    /// Silence inserted before the narration, in seconds.
    pub leading_pad_secs: u32,
    /// Variable bitrate encoding.
    pub vbr: bool,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            bitrate_kbps: 64,
            leading_pad_secs: 2,
            vbr: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[builder(default, setter(into), build_fn(validate = "Self::validate"))]
#[serde(default)]
pub struct Settings {
    /// Voice name (e.g. `"af_heart"`).
    pub voice: String,
    /// Speech speed multiplier.
    pub speed: f32,
    /// Directory holding the ONNX model and `voices-v1.0.bin`.
    pub model_dir: PathBuf,
    /// Number of inference threads; `None` lets the runtime decide.
    #[builder(setter(strip_option))]
    pub num_threads: Option<usize>,
    /// Bundled espeak-ng binary, if not on PATH.
    #[builder(setter(strip_option))]
    pub espeak_bin: Option<PathBuf>,
    /// Bundled espeak-ng data directory.
    #[builder(setter(strip_option))]
    pub espeak_data: Option<PathBuf>,
    pub encoder: EncodeSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            voice: "af_heart".to_string(),
            speed: 1.3,
            model_dir: PathBuf::from("models/kokoro"),
            num_threads: None,
            espeak_bin: None,
            espeak_data: None,
            encoder: EncodeSettings::default(),
        }
    }
}

impl SettingsBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(speed) = self.speed {
            check_speed(speed)?;
        }
        if let Some(encoder) = &self.encoder {
            check_bitrate(encoder.bitrate_kbps)?;
        }
        Ok(())
    }
}

impl Settings {
    /// Load settings from a JSON file. Absent keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Settings =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        settings.validate()?;
        log::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_speed(self.speed).map_err(ConfigError::Invalid)?;
        check_bitrate(self.encoder.bitrate_kbps).map_err(ConfigError::Invalid)?;
        if self.voice.trim().is_empty() {
            return Err(ConfigError::Invalid("voice must not be empty".to_string()));
        }
        Ok(())
    }

    /// Voice and speed for synthesis requests.
    pub fn voice(&self) -> SynthesisParams {
        SynthesisParams {
            voice: self.voice.clone(),
            speed: self.speed,
        }
    }
}

fn check_speed(speed: f32) -> Result<(), String> {
    if SPEED_RANGE.contains(&speed) {
        Ok(())
    } else {
        Err(format!(
            "speed {speed} outside {}..={}",
            SPEED_RANGE.start(),
            SPEED_RANGE.end()
        ))
    }
}

fn check_bitrate(kbps: u32) -> Result<(), String> {
    if kbps == 0 {
        Err("bitrate_kbps must be positive".to_string())
    } else {
        Ok(())
    }
}
