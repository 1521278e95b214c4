//! Process-wide benchmark metrics.
//!
//! These feed the admin endpoint and live progress only. Results are built
//! from worker-local state.

use metriken::{AtomicHistogram, Counter, Gauge, metric};

// Publish path
#[metric(
    name = "messages_sent",
    description = "Messages handed to a peer's send loop"
)]
pub static MESSAGES_SENT: Counter = Counter::new();

#[metric(
    name = "messages_published",
    description = "Messages acknowledged by the broker"
)]
pub static MESSAGES_PUBLISHED: Counter = Counter::new();

#[metric(name = "publish_errors", description = "Failed publish attempts")]
pub static PUBLISH_ERRORS: Counter = Counter::new();

// Consume path
#[metric(name = "messages_received", description = "Messages received")]
pub static MESSAGES_RECEIVED: Counter = Counter::new();

#[metric(
    name = "decode_errors",
    description = "Received payloads without a readable timestamp"
)]
pub static DECODE_ERRORS: Counter = Counter::new();

#[metric(name = "receive_errors", description = "Failed receive calls")]
pub static RECEIVE_ERRORS: Counter = Counter::new();

#[metric(
    name = "negative_latencies",
    description = "Latency samples dropped because the send time was in the future"
)]
pub static NEGATIVE_LATENCIES: Counter = Counter::new();

// Peers
#[metric(name = "peers_connected", description = "Connected peers")]
pub static PEERS_CONNECTED: Gauge = Gauge::new();

#[metric(name = "connect_failures", description = "Failed peer connections")]
pub static CONNECT_FAILURES: Counter = Counter::new();

#[metric(
    name = "end_to_end_latency",
    description = "Publish to receive latency histogram (nanoseconds)"
)]
pub static END_TO_END_LATENCY: AtomicHistogram = AtomicHistogram::new(7, 64);
