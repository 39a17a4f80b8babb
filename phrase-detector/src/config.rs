//! Phrase service configuration
//!
//! Loaded from an optional JSON file; every field has a default so a file
//! only needs the values it changes. The binary layers CLI and environment
//! overrides on top.

use crate::backend::SegmentSettings;
use crate::coordinator::BackendMode;
use crate::matcher::{CatalogError, PhraseCatalog, DEFAULT_PHRASES};
use actuator::ActuatorConfig;
use audio_capture::{CalibrationConfig, SAMPLE_RATE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Google Cloud Speech-to-Text settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudSettings {
    pub endpoint: String,

    /// Sent as the `key` query parameter
    pub api_key: Option<String>,

    /// BCP-47 language code
    pub language: String,

    pub request_timeout_secs: f32,
}

impl Default for CloudSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://speech.googleapis.com/v1/speech:recognize".to_string(),
            api_key: None,
            language: "en-US".to_string(),
            request_timeout_secs: 10.0,
        }
    }
}

/// Vosk settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineSettings {
    /// Directory of an unpacked Vosk model
    pub model_path: PathBuf,

    /// Samples per block fed to the recognizer
    pub block_samples: usize,

    /// Pause after opening the stream before listening
    pub warmup_secs: f32,
}

impl Default for OfflineSettings {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("vosk-model-en-us-0.22-lgraph"),
            block_samples: 8000,
            warmup_secs: 0.5,
        }
    }
}

impl OfflineSettings {
    /// Block length at the preferred sample rate
    pub fn block_millis(&self) -> u32 {
        (self.block_samples as u64 * 1000 / SAMPLE_RATE as u64) as u32
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_secs_f32(self.warmup_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Catalog, in priority order for tie-breaks
    pub phrases: Vec<String>,

    pub mode: BackendMode,

    /// Minimum score for a match to count
    pub match_threshold: f64,

    /// Longest cloud segment, and the offline receive timeout
    pub utterance_window_secs: f32,

    /// Ambient calibration before the cloud backend listens
    pub calibration_secs: f32,

    /// Speech onset above the ambient median (dB)
    pub onset_margin_db: f32,

    /// Trailing quiet that closes a cloud segment
    pub pause_secs: f32,

    /// Cloud capture frame length
    pub frame_ms: u32,

    /// Input device index; default device when unset
    pub device_index: Option<usize>,

    /// Length of the alarm pulse on a second detection
    pub alarm_pulse_ms: u64,

    pub cloud: CloudSettings,
    pub offline: OfflineSettings,
    pub actuator: ActuatorConfig,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            phrases: DEFAULT_PHRASES.iter().map(|p| p.to_string()).collect(),
            mode: BackendMode::AutoFallback,
            match_threshold: 0.70,
            utterance_window_secs: 4.0,
            calibration_secs: 2.0,
            onset_margin_db: 3.5,
            pause_secs: 0.8,
            frame_ms: 30,
            device_index: None,
            alarm_pulse_ms: 1000,
            cloud: CloudSettings::default(),
            offline: OfflineSettings::default(),
            actuator: ActuatorConfig::default(),
        }
    }
}

impl DetectorConfig {
    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.match_threshold) {
            return Err(ConfigError::Invalid(format!(
                "match_threshold must be within [0, 1], got {}",
                self.match_threshold
            )));
        }

        for (name, value) in [
            ("utterance_window_secs", self.utterance_window_secs),
            ("calibration_secs", self.calibration_secs),
            ("pause_secs", self.pause_secs),
            ("cloud.request_timeout_secs", self.cloud.request_timeout_secs),
        ] {
            if !(value > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be positive, got {value}"
                )));
            }
            check_duration(name, value)?;
        }

        check_duration("offline.warmup_secs", self.offline.warmup_secs)?;

        self.calibration()
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("calibration: {e}")))?;

        if self.frame_ms == 0 || self.offline.block_millis() == 0 {
            return Err(ConfigError::Invalid("frame sizes must be non-zero".to_string()));
        }

        self.catalog()?;

        self.actuator
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("actuator: {e}")))
    }

    pub fn catalog(&self) -> Result<PhraseCatalog, ConfigError> {
        Ok(PhraseCatalog::new(self.phrases.iter().cloned())?)
    }

    pub fn utterance_window(&self) -> Duration {
        Duration::from_secs_f32(self.utterance_window_secs)
    }

    pub fn alarm_pulse(&self) -> Duration {
        Duration::from_millis(self.alarm_pulse_ms)
    }

    pub fn segment_settings(&self) -> SegmentSettings {
        SegmentSettings {
            onset_margin_db: self.onset_margin_db,
            max_window: self.utterance_window(),
            pause: Duration::from_secs_f32(self.pause_secs),
        }
    }

    pub fn calibration(&self) -> CalibrationConfig {
        CalibrationConfig {
            duration_secs: self.calibration_secs,
            ..Default::default()
        }
    }
}

/// Rejects values `Duration` cannot hold: negative, NaN or out of range
fn check_duration(name: &str, secs: f32) -> Result<(), ConfigError> {
    Duration::try_from_secs_f32(secs)
        .map(|_| ())
        .map_err(|e| ConfigError::Invalid(format!("{name}: {secs} is not a valid duration ({e})")))
}
