use super::{ResultSender, SharedState, TestMode};
use crate::metrics;
use crate::payload;
use crate::peer::{Peer, PeerError};
use crate::results::{LatencyStats, LatencySummary, Role, WorkerResult};
use metriken::AtomicHistogram;
use std::pin::pin;
use std::sync::Arc;
use std::time::Instant;

/// Consumes messages from one subscribed peer and measures them.
pub struct Subscriber {
    pub id: usize,
    pub test: TestMode,
    /// Messages to receive before finishing.
    pub expected: u64,
    /// Consecutive receive errors tolerated before giving up.
    pub max_receive_errors: u64,
    pub shared: Arc<SharedState>,
    pub results: ResultSender,
}

#[derive(Default)]
struct Tally {
    received: u64,
    receive_errors: u64,
    decode_errors: u64,
    negative: u64,
    first: Option<Instant>,
    last: Option<Instant>,
    stats: LatencyStats,
}

impl Subscriber {
    /// Receive until `expected` messages arrived, the stop signal fires, or
    /// the error budget runs out. The peer must already be subscribed.
    pub async fn run(&self, peer: &mut dyn Peer) -> WorkerResult {
        let histogram = AtomicHistogram::new(7, 64);
        let mut tally = Tally::default();
        let mut consecutive_errors = 0u64;
        let mut stopped = false;
        let mut stop = pin!(self.shared.stopped());

        while tally.received < self.expected {
            let next = tokio::select! {
                biased;
                _ = &mut stop => {
                    stopped = true;
                    break;
                }
                next = peer.recv() => next,
            };

            match next {
                Ok(message) => {
                    let now_ns = payload::unix_nanos();
                    let now = Instant::now();
                    tally.first.get_or_insert(now);
                    tally.last = Some(now);
                    tally.received += 1;
                    consecutive_errors = 0;
                    metrics::MESSAGES_RECEIVED.increment();

                    if self.test == TestMode::Latency {
                        self.record_latency(&message, now_ns, &histogram, &mut tally);
                    }
                }
                Err(PeerError::NotSubscribed) => {
                    tracing::error!(worker = self.id, "subscriber peer was never subscribed");
                    break;
                }
                Err(e) => {
                    tally.receive_errors += 1;
                    consecutive_errors += 1;
                    metrics::RECEIVE_ERRORS.increment();
                    tracing::warn!(worker = self.id, error = %e, "receive failed");
                    if consecutive_errors >= self.max_receive_errors.max(1) {
                        tracing::error!(
                            worker = self.id,
                            consecutive_errors,
                            "too many receive errors, giving up"
                        );
                        break;
                    }
                }
            }
        }

        let duration_ms = match (tally.first, tally.last) {
            (Some(first), Some(last)) => last.duration_since(first).as_secs_f64() * 1000.0,
            _ => 0.0,
        };
        let mut result = WorkerResult::new(Role::Subscriber, self.id, tally.received, duration_ms);
        result.errors = tally.receive_errors;
        result.aborted = tally.received < self.expected;

        if self.test == TestMode::Latency {
            let snapshot = histogram.load();
            result.latency = Some(LatencySummary {
                decode_errors: tally.decode_errors,
                receive_errors: tally.receive_errors,
                negative_samples: tally.negative,
                ..LatencySummary::from_parts(&tally.stats, snapshot.as_ref())
            });
            result.stats = tally.stats;
            result.histogram = snapshot;
        }

        tracing::info!(
            worker = self.id,
            received = tally.received,
            expected = self.expected,
            stopped,
            duration_ms,
            "subscriber finished"
        );
        if self.results.send(result.clone()).is_err() {
            tracing::warn!(worker = self.id, "results channel closed");
        }
        result
    }

    fn record_latency(
        &self,
        message: &[u8],
        now_ns: i64,
        histogram: &AtomicHistogram,
        tally: &mut Tally,
    ) {
        let sent_ns = match payload::decode_timestamp(message) {
            Ok(sent_ns) => sent_ns,
            Err(e) => {
                tally.decode_errors += 1;
                metrics::DECODE_ERRORS.increment();
                tracing::trace!(worker = self.id, error = %e, "undecodable payload");
                return;
            }
        };

        let latency = now_ns.saturating_sub(sent_ns);
        if latency < 0 {
            tally.negative += 1;
            metrics::NEGATIVE_LATENCIES.increment();
            return;
        }
        let latency = latency as u64;
        let _ = histogram.increment(latency);
        let _ = metrics::END_TO_END_LATENCY.increment(latency);
        tally.stats.record(latency);
    }
}
