//! Silence-triggered shutdown for SafePhrase
//!
//! Measures microphone loudness against a calibrated ambient threshold and
//! powers the device off once the room has been quiet for long enough.

pub mod daemon;
pub mod monitor;

pub use daemon::{run_daemon, DaemonConfig, DaemonOutcome};
pub use monitor::{
    MonitorOutcome, ShutdownEvent, SilenceConfig, SilenceDecision, SilenceError, SilenceMonitor,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
