//! Actuator outputs as seen by the decision loops

use crate::runner::RunnerError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ActuatorError {
    #[error("Command failed: {0}")]
    Command(#[from] RunnerError),

    #[error("Output not configured: {0}")]
    NotConfigured(&'static str),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// One physical action, as recorded by [`RecordingActuator`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actuation {
    Alert(bool),
    AlarmPulse(Duration),
    PowerOff,
}

/// The alert line, the alarm line and the power-off call
#[async_trait]
pub trait ActuatorSink: Send + Sync {
    async fn set_alert(&self, on: bool) -> Result<(), ActuatorError>;

    /// Drive the alarm line high for `duration`, then low again
    async fn pulse_alarm(&self, duration: Duration) -> Result<(), ActuatorError>;

    async fn power_off(&self) -> Result<(), ActuatorError>;

    /// Leave outputs in their resting state
    async fn safe_off(&self) -> Result<(), ActuatorError> {
        self.set_alert(false).await
    }
}

#[async_trait]
impl<T: ActuatorSink + ?Sized> ActuatorSink for Arc<T> {
    async fn set_alert(&self, on: bool) -> Result<(), ActuatorError> {
        (**self).set_alert(on).await
    }

    async fn pulse_alarm(&self, duration: Duration) -> Result<(), ActuatorError> {
        (**self).pulse_alarm(duration).await
    }

    async fn power_off(&self) -> Result<(), ActuatorError> {
        (**self).power_off().await
    }

    async fn safe_off(&self) -> Result<(), ActuatorError> {
        (**self).safe_off().await
    }
}

/// Keeps actuations in memory instead of touching hardware
#[derive(Debug, Default)]
pub struct RecordingActuator {
    actions: Mutex<Vec<Actuation>>,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actions(&self) -> Vec<Actuation> {
        self.actions.lock().clone()
    }

    /// Last alert state written, `false` if never set
    pub fn alert_on(&self) -> bool {
        self.actions
            .lock()
            .iter()
            .rev()
            .find_map(|a| match a {
                Actuation::Alert(on) => Some(*on),
                _ => None,
            })
            .unwrap_or(false)
    }

    pub fn powered_off(&self) -> bool {
        self.actions.lock().contains(&Actuation::PowerOff)
    }

    pub fn clear(&self) {
        self.actions.lock().clear();
    }
}

#[async_trait]
impl ActuatorSink for RecordingActuator {
    async fn set_alert(&self, on: bool) -> Result<(), ActuatorError> {
        self.actions.lock().push(Actuation::Alert(on));
        Ok(())
    }

    async fn pulse_alarm(&self, duration: Duration) -> Result<(), ActuatorError> {
        self.actions.lock().push(Actuation::AlarmPulse(duration));
        Ok(())
    }

    async fn power_off(&self) -> Result<(), ActuatorError> {
        self.actions.lock().push(Actuation::PowerOff);
        Ok(())
    }
}
