//! System command port.
//!
//! Every kernel-facing controller (route tables, policy rules, packet filter)
//! and the docker CLI runtime talk to the host through [`CommandRunner`], so they
//! can be exercised against [`fake::FakeHost`] instead of a real network namespace.

pub mod fake;

use crate::error::VpnmuxError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Captured result of one external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Stdout of a successful command, or `CommandFailed` otherwise.
    pub fn into_stdout(self, program: &str, args: &[&str]) -> Result<String, VpnmuxError> {
        if self.success() {
            return Ok(self.stdout);
        }
        Err(VpnmuxError::CommandFailed {
            command: command_line(program, args),
            code: self.code,
            stderr: self.stderr.trim().to_string(),
        })
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion. Only spawn failures and timeouts are errors;
    /// a nonzero exit is reported through [`CommandOutput::code`].
    async fn output(&self, program: &str, args: &[&str]) -> Result<CommandOutput, VpnmuxError>;

    /// Run a command that must exit with status 0 and return its stdout.
    async fn run(&self, program: &str, args: &[&str]) -> Result<String, VpnmuxError> {
        self.output(program, args)
            .await?
            .into_stdout(program, args)
    }
}

/// Runs commands on the host with `tokio::process`.
///
/// Each command is bounded by `timeout`; the child is killed when the timeout
/// fires or when the calling future is dropped.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Duration,
}

impl SystemRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn output(&self, program: &str, args: &[&str]) -> Result<CommandOutput, VpnmuxError> {
        let command = command_line(program, args);
        debug!(%command, "exec");

        let child = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => return Err(VpnmuxError::CommandSpawn { command, source }),
            Err(_) => {
                return Err(VpnmuxError::CommandTimeout {
                    command,
                    timeout: self.timeout,
                });
            }
        };

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

pub fn command_line(program: &str, args: &[&str]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}
