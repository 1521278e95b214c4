use super::{BrokerController, CommandRunner, ProvisionError, ProvisionHandle, TeardownError};
use std::sync::Arc;

const IMAGE: &str = "rethinkdb";
const DRIVER_PORT: u16 = 28015;

/// Runs a single RethinkDB container with the driver port published.
pub struct RethinkDbBroker {
    runner: Arc<dyn CommandRunner>,
    container: Option<String>,
}

impl RethinkDbBroker {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            container: None,
        }
    }
}

impl BrokerController for RethinkDbBroker {
    fn start(&mut self, _host: &str, _port: u16) -> Result<ProvisionHandle, ProvisionError> {
        let command = format!("docker run -d -p {DRIVER_PORT}:{DRIVER_PORT} {IMAGE}");
        let id = self.runner.run(&command).map_err(|e| {
            tracing::error!(output = %e.output, reason = %e.reason, "failed to start rethinkdb");
            e.into_provision(&command)
        })?;
        tracing::info!(container = %id, "started {IMAGE}");
        self.container = Some(id.clone());
        Ok(ProvisionHandle::new(id))
    }

    fn stop(&mut self) -> Result<String, TeardownError> {
        let id = self.container.take().ok_or(TeardownError::NotStarted)?;
        let command = format!("docker kill {id}");
        let output = self.runner.run(&command).map_err(|e| {
            tracing::error!(output = %e.output, reason = %e.reason, "failed to stop rethinkdb");
            e.into_teardown(&command)
        })?;
        tracing::info!(container = %id, "stopped {IMAGE}");
        Ok(output)
    }
}
