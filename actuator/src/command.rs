//! Actuator backed by configured external commands

use crate::runner::{CommandRunner, CommandSpec, RunnerConfig};
use crate::sink::{ActuatorError, ActuatorSink};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Commands for each output line
///
/// The defaults drive BCM pins 17 (alert) and 27 (alarm) through libgpiod's
/// `gpioset` and power off with `sudo /sbin/shutdown -h now`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    /// Log actions instead of running commands
    pub dry_run: bool,

    pub alert_on: Option<CommandSpec>,
    pub alert_off: Option<CommandSpec>,
    pub alarm_on: Option<CommandSpec>,
    pub alarm_off: Option<CommandSpec>,
    pub power_off: Option<CommandSpec>,

    pub runner: RunnerConfig,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            alert_on: Some(CommandSpec::new("gpioset", ["gpiochip0", "17=1"])),
            alert_off: Some(CommandSpec::new("gpioset", ["gpiochip0", "17=0"])),
            alarm_on: Some(CommandSpec::new("gpioset", ["gpiochip0", "27=1"])),
            alarm_off: Some(CommandSpec::new("gpioset", ["gpiochip0", "27=0"])),
            power_off: Some(CommandSpec::new("sudo", ["/sbin/shutdown", "-h", "now"])),
            runner: RunnerConfig::default(),
        }
    }
}

impl ActuatorConfig {
    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ActuatorError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ActuatorError::Config(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&text)
            .map_err(|e| ActuatorError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Every configured command passes the runner's allow-list
    pub fn validate(&self) -> Result<(), ActuatorError> {
        let runner = CommandRunner::new(self.runner.clone());
        for spec in self.commands().into_iter().flatten() {
            runner.validate(spec)?;
        }
        Ok(())
    }

    fn commands(&self) -> [Option<&CommandSpec>; 5] {
        [
            self.alert_on.as_ref(),
            self.alert_off.as_ref(),
            self.alarm_on.as_ref(),
            self.alarm_off.as_ref(),
            self.power_off.as_ref(),
        ]
    }
}

pub struct CommandActuator {
    config: ActuatorConfig,
    runner: CommandRunner,
}

impl CommandActuator {
    pub fn new(config: ActuatorConfig) -> Result<Self, ActuatorError> {
        config.validate()?;

        if config.dry_run {
            info!("Actuator in dry-run mode, commands will only be logged");
        }

        Ok(Self {
            runner: CommandRunner::new(config.runner.clone()),
            config,
        })
    }

    pub fn is_dry_run(&self) -> bool {
        self.config.dry_run
    }

    async fn fire(&self, output: &'static str, spec: Option<&CommandSpec>) -> Result<(), ActuatorError> {
        let spec = spec.ok_or(ActuatorError::NotConfigured(output))?;

        if self.config.dry_run {
            info!("[dry-run] {}: {}", output, spec);
            return Ok(());
        }

        self.runner.run(spec).await?;
        Ok(())
    }
}

#[async_trait]
impl ActuatorSink for CommandActuator {
    async fn set_alert(&self, on: bool) -> Result<(), ActuatorError> {
        if on {
            self.fire("alert_on", self.config.alert_on.as_ref()).await
        } else {
            self.fire("alert_off", self.config.alert_off.as_ref()).await
        }
    }

    async fn pulse_alarm(&self, duration: Duration) -> Result<(), ActuatorError> {
        self.fire("alarm_on", self.config.alarm_on.as_ref()).await?;
        tokio::time::sleep(duration).await;
        self.fire("alarm_off", self.config.alarm_off.as_ref()).await
    }

    async fn power_off(&self) -> Result<(), ActuatorError> {
        warn!("Power-off requested");
        self.fire("power_off", self.config.power_off.as_ref()).await
    }

    async fn safe_off(&self) -> Result<(), ActuatorError> {
        let alert = self.fire("alert_off", self.config.alert_off.as_ref()).await;
        let alarm = self.fire("alarm_off", self.config.alarm_off.as_ref()).await;
        alert.and(alarm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::RunnerError;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_validates() {
        assert!(ActuatorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_unlisted_command_rejected_at_construction() {
        let config = ActuatorConfig {
            power_off: Some(CommandSpec::new("reboot", Vec::<String>::new())),
            ..Default::default()
        };

        assert!(matches!(
            CommandActuator::new(config),
            Err(ActuatorError::Command(RunnerError::NotAllowed(_)))
        ));
    }

    #[tokio::test]
    async fn test_dry_run_runs_nothing() {
        let config = ActuatorConfig {
            dry_run: true,
            ..Default::default()
        };
        let actuator = CommandActuator::new(config).unwrap();

        assert!(actuator.set_alert(true).await.is_ok());
        assert!(actuator.power_off().await.is_ok());
        assert!(actuator.safe_off().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dry_run_pulse_waits_for_duration() {
        let actuator = CommandActuator::new(ActuatorConfig {
            dry_run: true,
            ..Default::default()
        })
        .unwrap();

        let start = tokio::time::Instant::now();
        actuator.pulse_alarm(Duration::from_secs(1)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_missing_output_reported() {
        let actuator = CommandActuator::new(ActuatorConfig {
            dry_run: true,
            alert_on: None,
            ..Default::default()
        })
        .unwrap();

        assert!(matches!(
            actuator.set_alert(true).await,
            Err(ActuatorError::NotConfigured("alert_on"))
        ));
    }

    #[test]
    fn test_load_partial_json() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            r#"{"dry_run": true, "power_off": {"program": "shutdown", "args": ["-h", "now"]}}"#,
        )
        .unwrap();

        let config = ActuatorConfig::load(file.path()).unwrap();
        assert!(config.dry_run);
        assert_eq!(config.power_off.unwrap().program, "shutdown");
        // Unspecified outputs keep their defaults
        assert!(config.alert_on.is_some());
    }
}
