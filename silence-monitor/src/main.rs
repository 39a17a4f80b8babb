//! Silence shutdown daemon
//!
//! Powers the device off after a continuous quiet stretch.

use actuator::{ActuatorConfig, ActuatorSink, CommandActuator};
use anyhow::{Context, Result};
use audio_capture::{list_input_devices, read_wav, FrameSource, MicrophoneSource};
use clap::Parser;
use silence_monitor::{run_daemon, DaemonConfig, DaemonOutcome};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "silence-shutdown", version, about = "Shutdown on prolonged silence")]
struct Cli {
    /// Input device index; falls back to MICROPHONE_INDEX
    #[arg(long)]
    device: Option<usize>,

    /// List input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// JSON daemon configuration
    #[arg(short, long, env = "SP_SILENCE_CONFIG")]
    config: Option<PathBuf>,

    /// Seconds of continuous silence before shutdown
    #[arg(long, env = "SP_MIN_SILENCE_SECONDS")]
    min_silence: Option<f32>,

    /// Startup grace period in seconds
    #[arg(long, env = "SP_GRACE_PERIOD")]
    grace: Option<f32>,

    /// dB below the ambient median that counts as silence
    #[arg(long, env = "SP_SILENCE_MARGIN_DB")]
    margin: Option<f32>,

    /// Seconds of ambient calibration
    #[arg(long, env = "SP_CALIBRATION_DURATION")]
    calibration: Option<f32>,

    /// Replay a WAV file instead of opening a microphone
    #[arg(long)]
    input_wav: Option<PathBuf>,

    /// JSON actuator configuration
    #[arg(long, env = "SP_ACTUATOR_CONFIG")]
    actuator_config: Option<PathBuf>,

    /// Log the shutdown command instead of running it
    #[arg(long, env = "SP_DRY_RUN")]
    dry_run: bool,
}

impl Cli {
    fn daemon_config(&self) -> Result<DaemonConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("parsing {}", path.display()))?
            }
            None => DaemonConfig::default(),
        };

        config.capture.device_index = self
            .device
            .or_else(device_from_env)
            .or(config.capture.device_index);
        if let Some(min_silence) = self.min_silence {
            config.silence.min_silence_secs = min_silence;
        }
        if let Some(grace) = self.grace {
            config.silence.grace_period_secs = grace;
        }
        if let Some(margin) = self.margin {
            config.calibration.margin_db = margin;
        }
        if let Some(calibration) = self.calibration {
            config.calibration.duration_secs = calibration;
        }

        config.validate()?;
        Ok(config)
    }

    fn actuator_config(&self) -> Result<ActuatorConfig> {
        let mut config = match &self.actuator_config {
            Some(path) => ActuatorConfig::load(path)?,
            None => ActuatorConfig::default(),
        };
        config.dry_run |= self.dry_run;
        Ok(config)
    }
}

/// MICROPHONE_INDEX, ignored when it is not a number
fn device_from_env() -> Option<usize> {
    let raw = std::env::var("MICROPHONE_INDEX").ok()?;
    match raw.trim().parse() {
        Ok(index) => Some(index),
        Err(_) => {
            warn!("Ignoring MICROPHONE_INDEX={:?}: not a device index", raw);
            None
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("silence_monitor=info,silence_shutdown=info,audio_capture=info,actuator=info")
            }),
        )
        .init();

    let cli = Cli::parse();

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

async fn run(cli: Cli) -> Result<()> {
    let config = cli.daemon_config()?;
    let actuator =
        CommandActuator::new(cli.actuator_config()?).context("invalid actuator configuration")?;

    info!("Starting SafePhrase silence monitor v{}", silence_monitor::VERSION);

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let started_at = Instant::now();
    let mut source: Box<dyn FrameSource> = match &cli.input_wav {
        Some(path) => {
            info!("Replaying {}", path.display());
            Box::new(read_wav(path, config.capture.frame_ms)?)
        }
        None => {
            let capture = config.capture.clone();
            let opened = tokio::task::spawn_blocking(move || MicrophoneSource::open(capture))
                .await
                .context("capture thread panicked")?;

            match opened {
                Ok(mic) => Box::new(mic),
                Err(e) => {
                    actuator.safe_off().await.ok();
                    return Err(e).context("failed to open microphone");
                }
            }
        }
    };

    let outcome = run_daemon(&config, source.as_mut(), &actuator, started_at, &cancel).await?;

    match outcome {
        DaemonOutcome::PoweredOff { accepted } => {
            if !accepted {
                warn!("Shutdown request failed");
            }
        }
        DaemonOutcome::Cancelled => info!("Exiting"),
        DaemonOutcome::StreamEnded => info!("Input ended without prolonged silence"),
    }

    Ok(())
}

fn print_devices() -> ExitCode {
    match list_input_devices() {
        Ok(devices) => {
            println!("Input devices:");
            for device in devices {
                println!(
                    "[{}] {} | rate={} | channels={}",
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
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT. Exiting."),
                    _ = term.recv() => info!("Received SIGTERM. Exiting."),
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
        info!("Received Ctrl+C. Exiting.");
    }

    cancel.cancel();
}
