//! Shutdown daemon
//!
//! Calibrates on the ambient noise, watches for prolonged silence and asks
//! the actuator to power the device off.

use crate::monitor::{MonitorOutcome, SilenceConfig, SilenceError, SilenceMonitor};
use actuator::ActuatorSink;
use audio_capture::{AmbientCalibrator, CalibrationConfig, CaptureConfig, FrameSource};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub capture: CaptureConfig,
    pub calibration: CalibrationConfig,
    pub silence: SilenceConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            calibration: CalibrationConfig {
                duration_secs: 3.0,
                margin_db: 3.0,
                ..CalibrationConfig::default()
            },
            silence: SilenceConfig::default(),
        }
    }
}

impl DaemonConfig {
    pub fn validate(&self) -> Result<(), SilenceError> {
        self.capture.validate()?;
        self.calibration.validate()?;
        self.silence.validate()
    }
}

/// How a daemon run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonOutcome {
    /// Power-off was requested; `accepted` is false if the actuator failed
    PoweredOff { accepted: bool },
    Cancelled,
    StreamEnded,
}

/// Calibrate, monitor and power off
///
/// `started_at` is the start of the grace period, normally taken before the
/// input device is opened. The actuator is returned to its safe state on
/// every exit path.
pub async fn run_daemon(
    config: &DaemonConfig,
    source: &mut dyn FrameSource,
    actuator: &dyn ActuatorSink,
    started_at: Instant,
    cancel: &CancellationToken,
) -> Result<DaemonOutcome, SilenceError> {
    let result = monitor_and_act(config, source, actuator, started_at, cancel).await;

    if let Err(e) = actuator.safe_off().await {
        error!("Failed to reset actuator: {}", e);
    }

    result
}

async fn monitor_and_act(
    config: &DaemonConfig,
    source: &mut dyn FrameSource,
    actuator: &dyn ActuatorSink,
    started_at: Instant,
    cancel: &CancellationToken,
) -> Result<DaemonOutcome, SilenceError> {
    let calibrator = AmbientCalibrator::new(config.calibration.clone())?;

    let calibration = tokio::select! {
        biased;

        _ = cancel.cancelled() => {
            info!("Cancelled during calibration");
            return Ok(DaemonOutcome::Cancelled);
        }
        result = calibrator.calibrate(source) => result?,
    };

    let mut monitor = SilenceMonitor::new(
        &config.silence,
        calibration.silence_threshold_dbfs,
        started_at,
    )?;

    match monitor.run(source, cancel).await? {
        MonitorOutcome::Shutdown(event) => {
            info!(
                "Silence for {:.1}s. Initiating shutdown...",
                event.silence.as_secs_f32()
            );

            match actuator.power_off().await {
                Ok(()) => Ok(DaemonOutcome::PoweredOff { accepted: true }),
                Err(e) => {
                    error!("Failed to call shutdown: {}", e);
                    Ok(DaemonOutcome::PoweredOff { accepted: false })
                }
            }
        }
        MonitorOutcome::Cancelled => Ok(DaemonOutcome::Cancelled),
        MonitorOutcome::StreamEnded => Ok(DaemonOutcome::StreamEnded),
    }
}
