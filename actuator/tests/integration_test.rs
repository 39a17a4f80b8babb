/// Integration tests for the actuator outputs
///
/// Runs real commands through the guarded runner where the platform allows.

use actuator::{
    ActuatorConfig, ActuatorError, ActuatorSink, CommandActuator, CommandSpec, RunnerConfig,
    RunnerError,
};
use std::time::Duration;
use tempfile::tempdir;

#[cfg(unix)]
fn touch_config(dir: &std::path::Path) -> ActuatorConfig {
    let marker = |name: &str| dir.join(name).to_string_lossy().into_owned();

    ActuatorConfig {
        dry_run: false,
        alert_on: Some(CommandSpec::new("touch", [marker("alert_on")])),
        alert_off: Some(CommandSpec::new("touch", [marker("alert_off")])),
        alarm_on: Some(CommandSpec::new("touch", [marker("alarm_on")])),
        alarm_off: Some(CommandSpec::new("touch", [marker("alarm_off")])),
        power_off: Some(CommandSpec::new("touch", [marker("power_off")])),
        runner: RunnerConfig {
            allowed_programs: vec!["touch".to_string()],
            ..Default::default()
        },
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_outputs_run_configured_commands() {
    let dir = tempdir().unwrap();
    let actuator = CommandActuator::new(touch_config(dir.path())).unwrap();

    actuator.set_alert(true).await.unwrap();
    actuator.pulse_alarm(Duration::from_millis(10)).await.unwrap();

    assert!(dir.path().join("alert_on").exists());
    assert!(dir.path().join("alarm_on").exists());
    assert!(dir.path().join("alarm_off").exists());
    assert!(!dir.path().join("power_off").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_safe_off_clears_both_lines() {
    let dir = tempdir().unwrap();
    let actuator = CommandActuator::new(touch_config(dir.path())).unwrap();

    actuator.safe_off().await.unwrap();

    assert!(dir.path().join("alert_off").exists());
    assert!(dir.path().join("alarm_off").exists());
}

#[tokio::test]
async fn test_disallowed_program_never_runs() {
    let dir = tempdir().unwrap();
    let marker = dir.path().join("should_not_exist");

    let config = ActuatorConfig {
        alert_on: Some(CommandSpec::new(
            "touch",
            [marker.to_string_lossy().into_owned()],
        )),
        ..Default::default()
    };

    let result = CommandActuator::new(config);
    assert!(matches!(
        result,
        Err(ActuatorError::Command(RunnerError::NotAllowed(_)))
    ));
    assert!(!marker.exists());
}

#[test]
fn test_config_file_roundtrip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("actuator.json");

    let config = ActuatorConfig {
        dry_run: true,
        ..Default::default()
    };
    std::fs::write(&path, serde_json::to_string(&config).unwrap()).unwrap();

    let loaded = ActuatorConfig::load(&path).unwrap();
    assert!(loaded.dry_run);
    assert_eq!(loaded.power_off, config.power_off);
}
