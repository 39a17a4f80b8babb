//! Prolonged-silence detection
//!
//! Tracks the last frame louder than the calibrated threshold and reports a
//! single shutdown event once the quiet stretch exceeds the configured
//! minimum. Time comes from frame timestamps, so replayed audio behaves the
//! same as a live microphone.

use audio_capture::{rms_dbfs, AudioError, FrameSource};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

#[derive(Error, Debug)]
pub enum SilenceError {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SilenceConfig {
    /// Continuous silence before shutdown
    pub min_silence_secs: f32,

    /// Startup period during which shutdown is never evaluated
    pub grace_period_secs: f32,
}

impl Default for SilenceConfig {
    fn default() -> Self {
        Self {
            min_silence_secs: 30.0,
            grace_period_secs: 20.0,
        }
    }
}

impl SilenceConfig {
    pub fn validate(&self) -> Result<(), SilenceError> {
        if !(self.min_silence_secs > 0.0) {
            return Err(SilenceError::InvalidConfig(format!(
                "min silence must be positive, got {}",
                self.min_silence_secs
            )));
        }

        for (name, secs) in [
            ("min silence", self.min_silence_secs),
            ("grace period", self.grace_period_secs),
        ] {
            Duration::try_from_secs_f32(secs).map_err(|e| {
                SilenceError::InvalidConfig(format!(
                    "{name} of {secs} s is not a valid duration ({e})"
                ))
            })?;
        }

        Ok(())
    }

    pub fn min_silence(&self) -> Duration {
        Duration::from_secs_f32(self.min_silence_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs_f32(self.grace_period_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownEvent {
    /// Length of the quiet stretch that triggered the event
    pub silence: Duration,
    pub at: Instant,
}

/// Result of feeding one frame level to the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SilenceDecision {
    /// Still inside the startup grace period
    Grace,
    /// Frame was above the threshold
    Sound,
    /// Quiet, but not for long enough yet
    Silent { elapsed: Duration },
    Shutdown(ShutdownEvent),
    /// Shutdown already reported; later frames are ignored
    Finished,
}

/// Why [`SilenceMonitor::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    Shutdown(ShutdownEvent),
    Cancelled,
    StreamEnded,
}

pub struct SilenceMonitor {
    threshold_dbfs: f32,
    min_silence: Duration,
    grace_period: Duration,
    started_at: Instant,
    last_non_silent: Instant,
    fired: Option<ShutdownEvent>,
}

impl SilenceMonitor {
    /// Start monitoring as of `started_at`, which also counts as the last
    /// moment sound was heard
    pub fn new(
        config: &SilenceConfig,
        threshold_dbfs: f32,
        started_at: Instant,
    ) -> Result<Self, SilenceError> {
        config.validate()?;

        Ok(Self {
            threshold_dbfs,
            min_silence: config.min_silence(),
            grace_period: config.grace_period(),
            started_at,
            last_non_silent: started_at,
            fired: None,
        })
    }

    pub fn threshold_dbfs(&self) -> f32 {
        self.threshold_dbfs
    }

    pub fn last_non_silent(&self) -> Instant {
        self.last_non_silent
    }

    pub fn is_finished(&self) -> bool {
        self.fired.is_some()
    }

    pub fn observe(&mut self, level_dbfs: f32, now: Instant) -> SilenceDecision {
        if self.fired.is_some() {
            return SilenceDecision::Finished;
        }

        let loud = level_dbfs > self.threshold_dbfs;
        if loud {
            self.last_non_silent = now;
        }

        if now.saturating_duration_since(self.started_at) < self.grace_period {
            return SilenceDecision::Grace;
        }

        let elapsed = now.saturating_duration_since(self.last_non_silent);
        if elapsed >= self.min_silence {
            let event = ShutdownEvent {
                silence: elapsed,
                at: now,
            };
            self.fired = Some(event);
            return SilenceDecision::Shutdown(event);
        }

        if loud {
            SilenceDecision::Sound
        } else {
            SilenceDecision::Silent { elapsed }
        }
    }

    /// Consume frames until shutdown, cancellation or end of stream
    pub async fn run(
        &mut self,
        source: &mut dyn FrameSource,
        cancel: &CancellationToken,
    ) -> Result<MonitorOutcome, SilenceError> {
        if let Some(event) = self.fired {
            return Ok(MonitorOutcome::Shutdown(event));
        }

        info!(
            "Monitoring... min_silence={:.1}s, grace={:.1}s, threshold={:.1} dBFS",
            self.min_silence.as_secs_f32(),
            self.grace_period.as_secs_f32(),
            self.threshold_dbfs
        );

        let mut was_silent = false;
        loop {
            let next = tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("Silence monitoring cancelled");
                    return Ok(MonitorOutcome::Cancelled);
                }
                next = source.next_frame() => next,
            };

            let frame = match next {
                Ok(frame) => frame,
                Err(AudioError::StreamClosed) => {
                    info!("Audio stream ended");
                    return Ok(MonitorOutcome::StreamEnded);
                }
                Err(e) => return Err(e.into()),
            };

            let level = rms_dbfs(&frame.samples);
            trace!("level={:.1} dBFS", level);

            match self.observe(level, frame.captured_at) {
                SilenceDecision::Shutdown(event) => return Ok(MonitorOutcome::Shutdown(event)),
                SilenceDecision::Silent { .. } if !was_silent => {
                    debug!("Silence started ({:.1} dBFS)", level);
                    was_silent = true;
                }
                SilenceDecision::Sound if was_silent => {
                    debug!("Sound resumed ({:.1} dBFS)", level);
                    was_silent = false;
                }
                _ => {}
            }
        }
    }
}
