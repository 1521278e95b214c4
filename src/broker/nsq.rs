use super::{BrokerController, CommandRunner, ProvisionError, ProvisionHandle, TeardownError};
use std::sync::Arc;

const LOOKUPD_IMAGE: &str = "nsqio/nsqlookupd";
const LOOKUPD_NAME: &str = "nsqlookupd_test";
const LOOKUPD_TCP_PORT: u16 = 4160;
const LOOKUPD_HTTP_PORT: u16 = 4161;
const NSQD_IMAGE: &str = "nsqio/nsqd";
const NSQD_TCP_PORT: u16 = 4150;
const NSQD_HTTP_PORT: u16 = 4151;

/// Host ports claimed by the lookup daemon and the nsqd HTTP listener.
pub const RESERVED_PORTS: [u16; 3] = [LOOKUPD_TCP_PORT, LOOKUPD_HTTP_PORT, NSQD_HTTP_PORT];

/// Runs an `nsqlookupd` container and an `nsqd` container linked to it, with
/// nsqd's TCP listener published on the requested port.
pub struct NsqBroker {
    runner: Arc<dyn CommandRunner>,
    lookupd_started: bool,
    nsqd_container: Option<String>,
}

impl NsqBroker {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            lookupd_started: false,
            nsqd_container: None,
        }
    }
}

impl BrokerController for NsqBroker {
    fn start(&mut self, host: &str, port: u16) -> Result<ProvisionHandle, ProvisionError> {
        if RESERVED_PORTS.contains(&port) {
            return Err(ProvisionError::ReservedPort { port });
        }

        let lookupd = format!(
            "docker run -d --name {LOOKUPD_NAME} -p {LOOKUPD_TCP_PORT}:{LOOKUPD_TCP_PORT} \
             -p {LOOKUPD_HTTP_PORT}:{LOOKUPD_HTTP_PORT} {LOOKUPD_IMAGE}"
        );
        let id = self.runner.run(&lookupd).map_err(|e| {
            tracing::error!(command = %lookupd, output = %e.output, "failed to start nsqlookupd");
            e.into_provision(&lookupd)
        })?;
        self.lookupd_started = true;
        tracing::info!(container = %id, "started {LOOKUPD_IMAGE}");

        let nsqd = format!(
            "docker run --link {LOOKUPD_NAME}:{LOOKUPD_NAME} -d -p {port}:{NSQD_TCP_PORT} \
             -p {NSQD_HTTP_PORT}:{NSQD_HTTP_PORT} {NSQD_IMAGE} --broadcast-address={host} \
             --lookupd-tcp-address={LOOKUPD_NAME}:{LOOKUPD_TCP_PORT}"
        );
        let id = self.runner.run(&nsqd).map_err(|e| {
            tracing::error!(command = %nsqd, output = %e.output, "failed to start nsqd");
            e.into_provision(&nsqd)
        })?;
        tracing::info!(container = %id, "started {NSQD_IMAGE}");
        self.nsqd_container = Some(id.clone());
        Ok(ProvisionHandle::new(id))
    }

    /// Removes the lookup container and kills nsqd. Both are attempted; the
    /// first failure is reported.
    fn stop(&mut self) -> Result<String, TeardownError> {
        let lookupd_started = std::mem::take(&mut self.lookupd_started);
        let nsqd_container = self.nsqd_container.take();
        if !lookupd_started && nsqd_container.is_none() {
            return Err(TeardownError::NotStarted);
        }

        let mut first_error = None;
        if lookupd_started {
            let command = format!("docker rm -f {LOOKUPD_NAME}");
            match self.runner.run(&command) {
                Ok(_) => tracing::info!("stopped {LOOKUPD_IMAGE}"),
                Err(e) => {
                    tracing::error!(output = %e.output, reason = %e.reason, "failed to stop nsqlookupd");
                    first_error = Some(e.into_teardown(&command));
                }
            }
        }

        let mut output = String::new();
        if let Some(id) = nsqd_container {
            let command = format!("docker kill {id}");
            match self.runner.run(&command) {
                Ok(out) => {
                    tracing::info!(container = %id, "stopped {NSQD_IMAGE}");
                    output = out;
                }
                Err(e) => {
                    tracing::error!(output = %e.output, reason = %e.reason, "failed to stop nsqd");
                    if first_error.is_none() {
                        first_error = Some(e.into_teardown(&command));
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(output),
        }
    }
}
