//! Actuator CLI
//!
//! Bench tool for checking the wiring of the alert and alarm lines and the
//! power-off command outside the detection services.

use actuator::{ActuatorConfig, ActuatorSink, CommandActuator};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "actuator", version, about = "Drive SafePhrase actuator outputs")]
struct Cli {
    /// JSON actuator configuration
    #[arg(short, long, env = "SP_ACTUATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Log commands instead of running them
    #[arg(long, env = "SP_DRY_RUN")]
    dry_run: bool,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Switch the alert line
    Alert {
        #[arg(value_parser = ["on", "off"])]
        state: String,
    },

    /// Pulse the alarm line
    Pulse {
        /// Pulse length in milliseconds
        #[arg(long, default_value_t = 1000)]
        ms: u64,
    },

    /// Run the power-off command
    PowerOff {
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },

    /// Print the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("actuator=info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ActuatorConfig::load(path)?,
        None => ActuatorConfig::default(),
    };
    config.dry_run |= cli.dry_run;

    if let Action::Show = cli.action {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let actuator = CommandActuator::new(config).context("invalid actuator configuration")?;

    match cli.action {
        Action::Alert { state } => {
            actuator.set_alert(state == "on").await?;
            info!("Alert {}", state);
        }
        Action::Pulse { ms } => {
            actuator.pulse_alarm(Duration::from_millis(ms)).await?;
            info!("Alarm pulsed for {} ms", ms);
        }
        Action::PowerOff { yes } => {
            if !yes {
                bail!("refusing to power off without --yes");
            }
            actuator.power_off().await?;
        }
        Action::Show => {}
    }

    Ok(())
}
