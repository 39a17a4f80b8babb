//! Phrase detection service binary
//!
//! Listens on the microphone and drives the alert and alarm outputs when a
//! catalog phrase is heard.

use actuator::{ActuatorSink, CommandActuator};
use anyhow::Context;
use audio_capture::list_input_devices;
use clap::Parser;
use phrase_detector::{
    BackendCoordinator, BackendMode, DetectorConfig, DeviceBackendFactory, PhraseMonitor,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// SafePhrase fraud-phrase detector
#[derive(Parser, Debug)]
#[command(name = "phrase-service", version, about)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, env = "SP_CONFIG")]
    config: Option<PathBuf>,

    /// Backend mode: cloud, offline or auto (google and vosk also accepted)
    #[arg(short, long, env = "SP_MODE")]
    mode: Option<BackendMode>,

    /// Minimum match score in [0, 1]
    #[arg(short, long, env = "SP_MATCH_THRESHOLD")]
    threshold: Option<f64>,

    /// Input device index (see --list-devices)
    #[arg(short, long, env = "SP_MIC_DEVICE_INDEX")]
    device: Option<usize>,

    /// Seconds listened per utterance
    #[arg(long, env = "SP_PHRASE_TIME_LIMIT")]
    window: Option<f32>,

    /// Seconds of ambient calibration
    #[arg(long, env = "SP_CALIBRATION_DURATION")]
    calibration: Option<f32>,

    /// Vosk model directory
    #[arg(long, env = "SP_VOSK_MODEL_PATH")]
    model: Option<PathBuf>,

    /// Google Cloud Speech API key
    #[arg(long, env = "SP_GOOGLE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Log actuator commands instead of running them
    #[arg(long, env = "SP_DRY_RUN")]
    dry_run: bool,

    /// Print input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<DetectorConfig> {
        let mut config = match &self.config {
            Some(path) => DetectorConfig::load(path)?,
            None => DetectorConfig::default(),
        };

        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(threshold) = self.threshold {
            config.match_threshold = threshold;
        }
        if let Some(device) = self.device {
            config.device_index = Some(device);
        }
        if let Some(window) = self.window {
            config.utterance_window_secs = window;
        }
        if let Some(calibration) = self.calibration {
            config.calibration_secs = calibration;
        }
        if let Some(model) = self.model {
            config.offline.model_path = model;
        }
        if self.api_key.is_some() {
            config.cloud.api_key = self.api_key;
        }
        config.actuator.dry_run |= self.dry_run;

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = match cli.verbose {
        0 => "info",
        1 => "info,phrase_detector=debug,audio_capture=debug",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    if cli.list_devices {
        return print_devices();
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.into_config()?;

    info!("Starting SafePhrase phrase detector v{}", phrase_detector::VERSION);
    info!("Mode: {}", config.mode);
    for phrase in &config.phrases {
        info!("  phrase: {}", phrase);
    }

    let actuator: Arc<dyn ActuatorSink> = Arc::new(
        CommandActuator::new(config.actuator.clone()).context("invalid actuator configuration")?,
    );

    let catalog = config.catalog()?;
    let monitor = PhraseMonitor::new(
        catalog,
        Arc::clone(&actuator),
        config.match_threshold,
        config.alarm_pulse(),
    );

    let factory = Arc::new(DeviceBackendFactory::new(config.clone()));
    let coordinator = BackendCoordinator::new(config.mode, factory);

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let summary = monitor.run(coordinator, cancel).await?;
    info!("Stopped after {} utterances", summary.utterances);

    Ok(())
}

fn print_devices() -> ExitCode {
    match list_input_devices() {
        Ok(devices) => {
            println!("Available microphones:");
            for device in devices {
                println!(
                    "  {}: {} ({} Hz, {} ch)",
                    device.index,
                    device.name,
                    device.default_sample_rate.map_or("?".to_string(), |r| r.to_string()),
                    device.channels.map_or("?".to_string(), |c| c.to_string()),
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to list input devices: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Cancel on Ctrl+C, or SIGTERM on unix
async fn cancel_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                    _ = term.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C");
    }

    cancel.cancel();
}
