//! Guarded command runner
//!
//! Every actuation ends up as an external program (`gpioset`, `shutdown`).
//! The runner only starts programs named on its allow-list, refuses
//! arguments carrying shell metacharacters and bounds each run with a
//! timeout. Programs are spawned directly, never through a shell.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Program not on allow-list: {0}")]
    NotAllowed(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Command execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timeout exceeded: {0}s")]
    TimeoutExceeded(u64),

    #[error("Command exited with status {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },
}

const SHELL_METACHARACTERS: [char; 17] = [
    ';', '&', '|', '>', '<', '`', '$', '(', ')', '{', '}', '[', ']', '\\', '\n', '*', '?',
];

/// A program and its arguments, spelled as in config files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Bare file name of the program, used for allow-list checks
    pub fn program_name(&self) -> &str {
        Path::new(&self.program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.program)
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Per-command timeout (seconds)
    pub timeout_secs: u64,

    /// Program file names that may be started
    pub allowed_programs: Vec<String>,

    /// Output kept from each stream (bytes)
    pub max_output_bytes: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            allowed_programs: vec![
                "gpioset".to_string(),
                "sudo".to_string(),
                "shutdown".to_string(),
            ],
            max_output_bytes: 64 * 1024,
        }
    }
}

/// Outcome of a finished command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

pub struct CommandRunner {
    config: RunnerConfig,
}

impl CommandRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Check a command against the allow-list and argument rules
    pub fn validate(&self, spec: &CommandSpec) -> Result<(), RunnerError> {
        let name = spec.program_name();
        if name.is_empty() || !self.config.allowed_programs.iter().any(|p| p == name) {
            return Err(RunnerError::NotAllowed(spec.program.clone()));
        }

        if contains_shell_metacharacters(&spec.program) {
            return Err(RunnerError::InvalidArguments(format!(
                "program contains shell metacharacters: {}",
                spec.program
            )));
        }

        for (i, arg) in spec.args.iter().enumerate() {
            if contains_shell_metacharacters(arg) {
                return Err(RunnerError::InvalidArguments(format!(
                    "argument {} contains shell metacharacters: {}",
                    i, arg
                )));
            }
        }

        Ok(())
    }

    /// Run a command to completion; a non-zero exit is an error
    pub async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, RunnerError> {
        self.validate(spec)?;

        let path = resolve_program(&spec.program);
        debug!("Resolved {} to {}", spec.program, path.display());
        info!("Running: {}", spec);

        let start = Instant::now();
        let output = timeout(
            Duration::from_secs(self.config.timeout_secs),
            Command::new(&path)
                .args(&spec.args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| RunnerError::TimeoutExceeded(self.config.timeout_secs))?
        .map_err(|e| RunnerError::ExecutionFailed(format!("{}: {}", spec.program, e)))?;

        let result = CommandOutput {
            stdout: self.truncate(&output.stdout),
            stderr: self.truncate(&output.stderr),
            exit_code: output.status.code().unwrap_or(-1),
            duration: start.elapsed(),
        };

        debug!(
            "{} exited with {} after {} ms",
            spec.program,
            result.exit_code,
            result.duration.as_millis()
        );

        if !result.success() {
            return Err(RunnerError::NonZeroExit {
                code: result.exit_code,
                stderr: result.stderr.trim().to_string(),
            });
        }

        Ok(result)
    }

    fn truncate(&self, bytes: &[u8]) -> String {
        let end = bytes.len().min(self.config.max_output_bytes);
        String::from_utf8_lossy(&bytes[..end]).into_owned()
    }
}

fn contains_shell_metacharacters(s: &str) -> bool {
    s.chars().any(|c| SHELL_METACHARACTERS.contains(&c))
}

/// Absolute paths are used as-is, bare names are looked up on PATH
fn resolve_program(program: &str) -> PathBuf {
    let path = Path::new(program);
    if path.is_absolute() {
        return path.to_path_buf();
    }

    which::which(program).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn runner_allowing(programs: &[&str]) -> CommandRunner {
        CommandRunner::new(RunnerConfig {
            allowed_programs: programs.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        })
    }

    #[test]
    fn test_default_allow_list() {
        let runner = CommandRunner::new(RunnerConfig::default());
        assert!(runner
            .validate(&CommandSpec::new("sudo", ["/sbin/shutdown", "-h", "now"]))
            .is_ok());
        assert!(runner
            .validate(&CommandSpec::new("gpioset", ["gpiochip0", "17=1"]))
            .is_ok());
    }

    #[test]
    fn test_program_name_from_path() {
        let spec = CommandSpec::new("/usr/bin/gpioset", Vec::<String>::new());
        assert_eq!(spec.program_name(), "gpioset");
    }

    #[test_case("rm" ; "not listed")]
    #[test_case("/bin/rm" ; "absolute path not listed")]
    #[test_case("" ; "empty program")]
    fn test_disallowed_program_rejected(program: &str) {
        let runner = CommandRunner::new(RunnerConfig::default());
        let result = runner.validate(&CommandSpec::new(program, ["-rf", "/"]));
        assert!(matches!(result, Err(RunnerError::NotAllowed(_))));
    }

    #[test_case("17=1; rm -rf /")]
    #[test_case("17=1 && reboot")]
    #[test_case("$(reboot)")]
    #[test_case("`id`")]
    fn test_shell_metacharacters_rejected(arg: &str) {
        let runner = CommandRunner::new(RunnerConfig::default());
        let result = runner.validate(&CommandSpec::new("gpioset", ["gpiochip0", arg]));
        assert!(matches!(result, Err(RunnerError::InvalidArguments(_))));
    }

    #[test]
    fn test_display_joins_args() {
        let spec = CommandSpec::new("sudo", ["/sbin/shutdown", "-h", "now"]);
        assert_eq!(spec.to_string(), "sudo /sbin/shutdown -h now");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_captures_output() {
        let runner = runner_allowing(&["echo"]);
        let output = runner
            .run(&CommandSpec::new("echo", ["alert", "on"]))
            .await
            .unwrap();

        assert!(output.success());
        assert!(output.stdout.contains("alert on"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_error() {
        let runner = runner_allowing(&["false"]);
        let result = runner.run(&CommandSpec::new("false", Vec::<String>::new())).await;
        assert!(matches!(result, Err(RunnerError::NonZeroExit { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_command() {
        let runner = CommandRunner::new(RunnerConfig {
            timeout_secs: 1,
            allowed_programs: vec!["sleep".to_string()],
            ..Default::default()
        });

        let result = runner.run(&CommandSpec::new("sleep", ["5"])).await;
        assert!(matches!(result, Err(RunnerError::TimeoutExceeded(1))));
    }
}
