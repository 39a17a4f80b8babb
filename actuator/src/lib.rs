//! Actuator outputs for SafePhrase
//!
//! This module drives the physical side of the system:
//! - An alert line (LED or vibration motor)
//! - An alarm line pulsed on a confirmed detection
//! - A privileged power-off call
//!
//! Each output is an external command run through an allow-listed,
//! time-bounded [`CommandRunner`]. [`RecordingActuator`] stands in for
//! hardware in tests.

pub mod command;
pub mod runner;
pub mod sink;

pub use command::{ActuatorConfig, CommandActuator};
pub use runner::{CommandOutput, CommandRunner, CommandSpec, RunnerConfig, RunnerError};
pub use sink::{Actuation, ActuatorError, ActuatorSink, RecordingActuator};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
