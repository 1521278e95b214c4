//! Broker provisioning.
//!
//! Controllers start and stop a broker instance, usually as Docker
//! containers. Every external command goes through a [`CommandRunner`], so
//! the controllers can be exercised without spawning processes.

mod kafka;
mod nsq;
mod rethinkdb;

pub use kafka::KafkaBroker;
pub use nsq::{NsqBroker, RESERVED_PORTS};
pub use rethinkdb::RethinkDbBroker;

use crate::config::{BrokerConfig, BrokerKind};
use std::fmt;
use std::process::Command;
use std::sync::Arc;

/// Opaque reference to a started broker, such as a container id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionHandle(String);

impl ProvisionHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProvisionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("port {port} is reserved")]
    ReservedPort { port: u16 },
    #[error("`{command}` failed: {reason}")]
    Command {
        command: String,
        output: String,
        reason: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum TeardownError {
    #[error("broker was never started")]
    NotStarted,
    #[error("`{command}` failed: {reason}")]
    Command {
        command: String,
        output: String,
        reason: String,
    },
}

/// A failed external command with whatever it printed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    pub output: String,
    pub reason: String,
}

impl CommandFailure {
    fn into_provision(self, command: &str) -> ProvisionError {
        ProvisionError::Command {
            command: command.to_string(),
            output: self.output,
            reason: self.reason,
        }
    }

    fn into_teardown(self, command: &str) -> TeardownError {
        TeardownError::Command {
            command: command.to_string(),
            output: self.output,
            reason: self.reason,
        }
    }
}

/// Executes shell commands on behalf of the controllers.
pub trait CommandRunner: Send + Sync {
    /// Run `command`, returning its trimmed standard output.
    fn run(&self, command: &str) -> Result<String, CommandFailure>;
}

/// Runs commands through `/bin/sh -c`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str) -> Result<String, CommandFailure> {
        tracing::debug!(command, "running");
        let output = Command::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .output()
            .map_err(|e| CommandFailure {
                output: String::new(),
                reason: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if output.status.success() {
            Ok(stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(CommandFailure {
                output: format!("{stdout}{}", stderr.trim_end()),
                reason: output.status.to_string(),
            })
        }
    }
}

/// Starts and stops one broker instance.
pub trait BrokerController: Send {
    /// Begin provisioning. Readiness is not awaited.
    fn start(&mut self, host: &str, port: u16) -> Result<ProvisionHandle, ProvisionError>;

    /// Tear the broker down, returning the command output.
    fn stop(&mut self) -> Result<String, TeardownError>;
}

/// Controller for brokers that need no provisioning.
#[derive(Debug, Default)]
pub struct NoopBroker {
    started: bool,
}

impl BrokerController for NoopBroker {
    fn start(&mut self, _host: &str, _port: u16) -> Result<ProvisionHandle, ProvisionError> {
        self.started = true;
        Ok(ProvisionHandle::new("noop"))
    }

    fn stop(&mut self) -> Result<String, TeardownError> {
        if !std::mem::take(&mut self.started) {
            return Err(TeardownError::NotStarted);
        }
        Ok(String::new())
    }
}

/// Controller for the configured broker family.
pub fn controller_for(
    config: &BrokerConfig,
    runner: Arc<dyn CommandRunner>,
) -> Box<dyn BrokerController> {
    match config.kind {
        BrokerKind::Kafka => Box::new(KafkaBroker::new(config.compose_dir.clone(), runner)),
        BrokerKind::RethinkDb => Box::new(RethinkDbBroker::new(runner)),
        BrokerKind::Nsq => Box::new(NsqBroker::new(runner)),
        BrokerKind::Mock => Box::new(NoopBroker::default()),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{CommandFailure, CommandRunner};
    use std::sync::Mutex;

    /// Records commands and replays scripted results.
    #[derive(Default)]
    pub struct RecordingRunner {
        pub commands: Mutex<Vec<String>>,
        /// Commands containing one of these substrings fail.
        pub failing: Vec<&'static str>,
    }

    impl RecordingRunner {
        pub fn failing(patterns: &[&'static str]) -> Self {
            Self {
                commands: Mutex::new(Vec::new()),
                failing: patterns.to_vec(),
            }
        }

        pub fn commands(&self) -> Vec<String> {
            self.commands.lock().unwrap().clone()
        }
    }

    impl CommandRunner for RecordingRunner {
        fn run(&self, command: &str) -> Result<String, CommandFailure> {
            let mut commands = self.commands.lock().unwrap();
            commands.push(command.to_string());
            if self.failing.iter().any(|p| command.contains(p)) {
                return Err(CommandFailure {
                    output: "partial output".to_string(),
                    reason: "exit status: 1".to_string(),
                });
            }
            Ok(format!("id{}", commands.len()))
        }
    }
}
