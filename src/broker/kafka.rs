use super::{BrokerController, CommandRunner, ProvisionError, ProvisionHandle, TeardownError};
use std::path::PathBuf;
use std::sync::Arc;

/// Brings up the compose project in `compose_dir` (ZooKeeper plus a broker).
/// The host and port are fixed by the compose file.
pub struct KafkaBroker {
    compose_dir: PathBuf,
    runner: Arc<dyn CommandRunner>,
    started: bool,
}

impl KafkaBroker {
    pub fn new(compose_dir: PathBuf, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            compose_dir,
            runner,
            started: false,
        }
    }

    fn compose(&self, action: &str) -> String {
        format!(
            "cd {} && docker-compose {action}",
            self.compose_dir.display()
        )
    }
}

impl BrokerController for KafkaBroker {
    fn start(&mut self, _host: &str, _port: u16) -> Result<ProvisionHandle, ProvisionError> {
        let command = self.compose("up -d");
        let output = self.runner.run(&command).map_err(|e| {
            tracing::error!(output = %e.output, reason = %e.reason, "failed to start kafka");
            e.into_provision(&command)
        })?;
        self.started = true;
        tracing::info!(dir = %self.compose_dir.display(), "started kafka");
        Ok(ProvisionHandle::new(output))
    }

    fn stop(&mut self) -> Result<String, TeardownError> {
        if !std::mem::take(&mut self.started) {
            return Err(TeardownError::NotStarted);
        }
        let command = self.compose("stop");
        let output = self.runner.run(&command).map_err(|e| {
            tracing::error!(output = %e.output, reason = %e.reason, "failed to stop kafka");
            e.into_teardown(&command)
        })?;
        tracing::info!("stopped kafka");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::testing::RecordingRunner;

    #[test]
    fn compose_up_and_stop() {
        let runner = Arc::new(RecordingRunner::default());
        let mut broker = KafkaBroker::new(PathBuf::from("/opt/kafka"), runner.clone());
        assert!(matches!(broker.stop(), Err(TeardownError::NotStarted)));

        broker.start("localhost", 9092).unwrap();
        broker.stop().unwrap();
        assert_eq!(
            runner.commands(),
            vec![
                "cd /opt/kafka && docker-compose up -d".to_string(),
                "cd /opt/kafka && docker-compose stop".to_string(),
            ]
        );
    }

    #[test]
    fn failed_start_keeps_output() {
        let runner = Arc::new(RecordingRunner::failing(&["up -d"]));
        let mut broker = KafkaBroker::new(PathBuf::from("."), runner);
        match broker.start("localhost", 9092) {
            Err(ProvisionError::Command { output, .. }) => assert_eq!(output, "partial output"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(broker.stop(), Err(TeardownError::NotStarted)));
    }
}
