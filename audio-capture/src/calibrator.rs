//! Ambient noise calibration
//!
//! Listens for a short window, takes the median frame loudness and places
//! the silence threshold a fixed margin below it.

use crate::loudness::rms_dbfs;
use crate::source::{AudioError, FrameSource};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Longest calibration window accepted
pub const MAX_CALIBRATION_SECS: f32 = 600.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Listening window in seconds
    pub duration_secs: f32,

    /// Distance below the ambient median, in dB
    pub margin_db: f32,

    pub min_threshold_db: f32,
    pub max_threshold_db: f32,

    /// Median assumed when the window produced no frames
    pub fallback_median_db: f32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            duration_secs: 3.0,
            margin_db: 3.0,
            min_threshold_db: -90.0,
            max_threshold_db: -10.0,
            fallback_median_db: -60.0,
        }
    }
}

impl CalibrationConfig {
    pub fn validate(&self) -> Result<(), AudioError> {
        if !(self.duration_secs > 0.0 && self.duration_secs <= MAX_CALIBRATION_SECS) {
            return Err(AudioError::InvalidConfig(format!(
                "calibration duration must be within (0, {}] s, got {}",
                MAX_CALIBRATION_SECS, self.duration_secs
            )));
        }

        if !(self.margin_db >= 0.0) || !self.margin_db.is_finite() {
            return Err(AudioError::InvalidConfig(
                "calibration margin must not be negative".to_string(),
            ));
        }

        if self.min_threshold_db > self.max_threshold_db {
            return Err(AudioError::InvalidConfig(format!(
                "threshold bounds inverted: {} > {}",
                self.min_threshold_db, self.max_threshold_db
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationResult {
    pub ambient_median_dbfs: f32,
    pub silence_threshold_dbfs: f32,
    pub frames_sampled: usize,
}

pub struct AmbientCalibrator {
    config: CalibrationConfig,
}

impl AmbientCalibrator {
    pub fn new(config: CalibrationConfig) -> Result<Self, AudioError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Read the calibration window from `source` and derive a threshold
    ///
    /// A stream that closes early is calibrated on whatever arrived.
    pub async fn calibrate(
        &self,
        source: &mut dyn FrameSource,
    ) -> Result<CalibrationResult, AudioError> {
        let format = source.format();
        let wanted = format
            .frames_in(Duration::from_secs_f32(self.config.duration_secs))
            .max(1);

        info!(
            "Calibrating ambient noise for {:.1}s ({} frames)",
            self.config.duration_secs, wanted
        );

        let mut levels = Vec::with_capacity(wanted);
        while levels.len() < wanted {
            match source.next_frame().await {
                Ok(frame) => levels.push(rms_dbfs(&frame.samples)),
                Err(AudioError::StreamClosed) => {
                    warn!(
                        "Stream closed after {} of {} calibration frames",
                        levels.len(),
                        wanted
                    );
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        let result = self.from_levels(&levels);
        info!(
            "Ambient median {:.1} dBFS, silence threshold {:.1} dBFS",
            result.ambient_median_dbfs, result.silence_threshold_dbfs
        );

        Ok(result)
    }

    /// Threshold from already-measured frame levels
    pub fn from_levels(&self, levels: &[f32]) -> CalibrationResult {
        let ambient_median_dbfs = median(levels).unwrap_or(self.config.fallback_median_db);
        let silence_threshold_dbfs = (ambient_median_dbfs - self.config.margin_db)
            .clamp(self.config.min_threshold_db, self.config.max_threshold_db);

        CalibrationResult {
            ambient_median_dbfs,
            silence_threshold_dbfs,
            frames_sampled: levels.len(),
        }
    }
}

/// Median of `values`; the mean of the middle pair for even counts
pub fn median(values: &[f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}
