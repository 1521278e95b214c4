use super::{ResultSender, SharedState, TestMode};
use crate::metrics;
use crate::payload;
use crate::peer::Peer;
use crate::results::{Role, WorkerResult};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;

/// Sends between checks of the stop signal.
const STOP_CHECK_INTERVAL: u64 = 1024;

/// Emits a fixed number of messages through one peer.
pub struct Publisher {
    pub id: usize,
    pub test: TestMode,
    pub num_messages: u64,
    /// Payload size in throughput mode.
    pub message_size: usize,
    pub abort_on_error: bool,
    pub shared: Arc<SharedState>,
    pub results: ResultSender,
}

impl Publisher {
    /// Publish every message, then signal `done` on the peer. The result is
    /// pushed on the results channel and also returned.
    pub async fn run(&self, peer: &mut dyn Peer) -> WorkerResult {
        let outbound = match peer.send() {
            Ok(outbound) => outbound,
            Err(e) => {
                tracing::error!(worker = self.id, error = %e, "publisher has no send loop");
                let mut result = WorkerResult::new(Role::Publisher, self.id, 0, 0.0);
                result.aborted = true;
                return self.finish(result);
            }
        };

        let zeros = Bytes::from(vec![0u8; self.message_size]);
        let mut sent = 0u64;
        let mut errors = 0u64;
        let mut aborted = false;

        let start = Instant::now();
        'send: while sent < self.num_messages {
            if sent.is_multiple_of(STOP_CHECK_INTERVAL) {
                if self.shared.phase().should_stop() {
                    tracing::info!(worker = self.id, sent, "publisher interrupted");
                    aborted = true;
                    break;
                }
                // let the send loop run on a busy runtime
                tokio::task::yield_now().await;
            }

            while let Some(e) = peer.errors().try_recv() {
                errors += 1;
                if self.abort_on_error {
                    tracing::error!(worker = self.id, sent, error = %e, "publish failed, aborting");
                    aborted = true;
                    break 'send;
                }
                tracing::warn!(worker = self.id, error = %e, "publish failed");
            }

            let message = match self.test {
                TestMode::Throughput => zeros.clone(),
                TestMode::Latency => payload::encode_timestamp(payload::unix_nanos()),
            };
            if let Err(e) = outbound.send(message) {
                tracing::error!(worker = self.id, sent, error = %e, "send loop stopped early");
                aborted = true;
                break;
            }
            sent += 1;
            metrics::MESSAGES_SENT.increment();
        }
        let elapsed = start.elapsed();

        peer.done().await;
        errors += peer.errors().drain().len() as u64;

        let mut result = WorkerResult::new(
            Role::Publisher,
            self.id,
            sent,
            elapsed.as_secs_f64() * 1000.0,
        );
        result.errors = errors;
        result.aborted = aborted;

        tracing::info!(
            worker = self.id,
            sent,
            errors,
            duration_ms = result.duration_ms,
            throughput = result.throughput,
            "publisher finished"
        );
        self.finish(result)
    }

    fn finish(&self, result: WorkerResult) -> WorkerResult {
        if self.results.send(result.clone()).is_err() {
            tracing::warn!(worker = self.id, "results channel closed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::MockBroker;
    use crate::worker::Phase;

    fn publisher(test: TestMode, num_messages: u64) -> (Publisher, crossbeam_channel::Receiver<WorkerResult>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let publisher = Publisher {
            id: 3,
            test,
            num_messages,
            message_size: 100,
            abort_on_error: true,
            shared: Arc::new(SharedState::new()),
            results: tx,
        };
        (publisher, rx)
    }

    #[tokio::test]
    async fn sends_exactly_num_messages() {
        let broker = MockBroker::new();
        let mut peer = broker.connect().unwrap();
        peer.setup().unwrap();

        let (publisher, rx) = publisher(TestMode::Throughput, 5000);
        let result = publisher.run(&mut peer).await;
        assert_eq!(result.role, Role::Publisher);
        assert_eq!(result.id, 3);
        assert_eq!(result.messages, 5000);
        assert_eq!(result.errors, 0);
        assert!(!result.aborted);
        assert!(result.duration_ms > 0.0);
        assert_eq!(broker.published(), 5000);

        let pushed = rx.try_recv().unwrap();
        assert_eq!(pushed.messages, 5000);
        peer.teardown().await;
    }

    #[tokio::test]
    async fn latency_payloads_carry_timestamps() {
        let broker = MockBroker::new();
        let mut subscriber = broker.connect().unwrap();
        subscriber.subscribe().await.unwrap();
        let mut peer = broker.connect().unwrap();
        peer.setup().unwrap();

        let before = payload::unix_nanos();
        let (publisher, _rx) = publisher(TestMode::Latency, 10);
        publisher.run(&mut peer).await;
        for _ in 0..10 {
            let message = subscriber.recv().await.unwrap();
            assert_eq!(message.len(), payload::TIMESTAMP_LEN);
            assert!(payload::decode_timestamp(&message).unwrap() >= before);
        }
    }

    #[tokio::test]
    async fn first_publish_error_aborts() {
        let broker = MockBroker::new();
        broker.fail_next_publishes(1);
        let mut peer = broker.connect().unwrap();
        peer.setup().unwrap();

        let (publisher, _rx) = publisher(TestMode::Throughput, 1_000_000);
        let result = publisher.run(&mut peer).await;
        assert!(result.aborted);
        assert!(result.errors >= 1);
        assert!(result.messages < 1_000_000);
        peer.teardown().await;
    }

    #[tokio::test]
    async fn errors_are_counted_when_not_aborting() {
        let broker = MockBroker::new();
        broker.fail_next_publishes(3);
        let mut peer = broker.connect().unwrap();
        peer.setup().unwrap();

        let (mut publisher, _rx) = publisher(TestMode::Throughput, 100);
        publisher.abort_on_error = false;
        let result = publisher.run(&mut peer).await;
        assert!(!result.aborted);
        assert_eq!(result.messages, 100);
        assert_eq!(result.errors, 3);
        assert_eq!(broker.published(), 97);
    }

    #[tokio::test]
    async fn stop_signal_interrupts() {
        let broker = MockBroker::new();
        let mut peer = broker.connect().unwrap();
        peer.setup().unwrap();

        let (publisher, _rx) = publisher(TestMode::Throughput, 10_000);
        publisher.shared.set_phase(Phase::Stop);
        let result = publisher.run(&mut peer).await;
        assert!(result.aborted);
        assert_eq!(result.messages, 0);
    }

    #[tokio::test]
    async fn missing_setup_is_reported() {
        let broker = MockBroker::new();
        let mut peer = broker.connect().unwrap();
        let (publisher, rx) = publisher(TestMode::Throughput, 10);
        let result = publisher.run(&mut peer).await;
        assert!(result.aborted);
        assert_eq!(result.messages, 0);
        assert!(rx.try_recv().unwrap().aborted);
    }
}
