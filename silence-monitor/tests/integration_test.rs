/// Integration tests for the silence monitor
///
/// Runs the monitor and the full daemon over replayed audio with a
/// recording actuator in place of the shutdown command.

use actuator::{Actuation, RecordingActuator};
use audio_capture::{read_wav, write_wav, CaptureFormat, ReplaySource, SAMPLE_RATE};
use silence_monitor::{
    run_daemon, DaemonConfig, DaemonOutcome, MonitorOutcome, SilenceConfig, SilenceMonitor,
};
use std::f32::consts::PI;
use std::time::{Duration, Instant};
use tempfile::tempdir;
use test_case::test_case;
use tokio_util::sync::CancellationToken;

fn generate_tone(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<i16> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;

    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            let sample = amplitude * (2.0 * PI * frequency * t).sin();
            (sample * i16::MAX as f32) as i16
        })
        .collect()
}

fn generate_silence(duration_secs: f32) -> Vec<i16> {
    vec![0; (SAMPLE_RATE as f32 * duration_secs) as usize]
}

#[test_case(1.0 ; "one second")]
#[test_case(2.0 ; "two seconds")]
#[test_case(5.0 ; "five seconds")]
#[tokio::test]
async fn test_shutdown_fires_at_min_silence(min_silence_secs: f32) {
    let t0 = Instant::now();
    let mut source = ReplaySource::starting_at(CaptureFormat::default(), t0);
    source.push_samples(&generate_silence(10.0));

    let config = SilenceConfig {
        min_silence_secs,
        grace_period_secs: 0.0,
    };
    let mut monitor = SilenceMonitor::new(&config, -40.0, t0).unwrap();

    let outcome = monitor.run(&mut source, &CancellationToken::new()).await.unwrap();
    let MonitorOutcome::Shutdown(event) = outcome else {
        panic!("expected shutdown, got {:?}", outcome);
    };

    let fired_after = event.at.duration_since(t0);
    let min_silence = Duration::from_secs_f32(min_silence_secs);
    assert!(fired_after >= min_silence);
    assert!(fired_after < min_silence + Duration::from_millis(30));
}

#[tokio::test]
async fn test_short_pauses_do_not_trigger() {
    let t0 = Instant::now();
    let mut samples = Vec::new();
    for _ in 0..4 {
        samples.extend(generate_tone(300.0, 1.0, 0.2));
        samples.extend(generate_silence(3.0));
    }

    let mut source = ReplaySource::starting_at(CaptureFormat::default(), t0);
    source.push_samples(&samples);

    let config = SilenceConfig {
        min_silence_secs: 5.0,
        grace_period_secs: 0.0,
    };
    let mut monitor = SilenceMonitor::new(&config, -40.0, t0).unwrap();

    let outcome = monitor.run(&mut source, &CancellationToken::new()).await.unwrap();
    assert_eq!(outcome, MonitorOutcome::StreamEnded);
    assert!(!monitor.is_finished());
}

#[tokio::test]
async fn test_daemon_powers_off_after_wav_session_goes_quiet() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("session.wav");

    // Talking during calibration, then nothing
    let mut samples = generate_tone(440.0, 3.0, 0.1);
    samples.extend(generate_silence(10.0));
    write_wav(&path, &samples, SAMPLE_RATE).unwrap();

    let started_at = Instant::now();
    let mut source = read_wav(&path, 30).unwrap();

    let mut config = DaemonConfig::default();
    config.silence = SilenceConfig {
        min_silence_secs: 5.0,
        grace_period_secs: 0.0,
    };

    let actuator = RecordingActuator::new();
    let outcome = run_daemon(
        &config,
        &mut source,
        &actuator,
        started_at,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(outcome, DaemonOutcome::PoweredOff { accepted: true });
    assert_eq!(
        actuator.actions(),
        vec![Actuation::PowerOff, Actuation::Alert(false)]
    );
    assert!(source.remaining() > 0);
}

#[tokio::test]
async fn test_daemon_respects_grace_period() {
    let t0 = Instant::now();
    let mut source = ReplaySource::starting_at(CaptureFormat::default(), t0);
    source.push_samples(&generate_tone(440.0, 1.0, 0.1));
    source.push_samples(&generate_silence(8.0));

    let mut config = DaemonConfig::default();
    config.calibration.duration_secs = 1.0;
    config.silence = SilenceConfig {
        min_silence_secs: 2.0,
        grace_period_secs: 30.0,
    };

    let actuator = RecordingActuator::new();
    let outcome = run_daemon(&config, &mut source, &actuator, t0, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, DaemonOutcome::StreamEnded);
    assert!(!actuator.powered_off());
}
