//! Broker-agnostic peers.
//!
//! A [`Peer`] is one participant's connection to a broker. Publishing goes
//! through the peer's [`SendLoop`]; consuming is a direct `recv` on the peer.
//! The measurement workers only ever see this trait.

pub mod kafka;
pub mod mock;
pub mod nsq;
pub mod rethinkdb;
pub mod send_loop;

pub use mock::MockBroker;
pub use send_loop::{ErrorReceiver, Outbound, Publish, SendLoop};

use crate::config::BrokerKind;
use crate::metrics;
use crate::protocol::ProtocolError;
use async_trait::async_trait;
use bytes::Bytes;

/// Topic, table, and database name used for every benchmark run.
pub const BENCH_TOPIC: &str = "test";

#[derive(Debug, Clone, thiserror::Error)]
pub enum PeerError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("subscription failed: {0}")]
    Subscription(String),
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("receive failed: {0}")]
    Receive(String),
    #[error("recv called before subscribe")]
    NotSubscribed,
    #[error("send called before setup")]
    NotSetUp,
    #[error("send loop already started")]
    AlreadySetUp,
    #[error("send loop has stopped")]
    SendLoopClosed,
}

impl PeerError {
    pub(crate) fn connection(e: impl Into<ProtocolError>) -> Self {
        PeerError::Connection(e.into().to_string())
    }

    pub(crate) fn subscription(e: impl Into<ProtocolError>) -> Self {
        PeerError::Subscription(e.into().to_string())
    }

    pub(crate) fn publish(e: impl Into<ProtocolError>) -> Self {
        PeerError::Publish(e.into().to_string())
    }

    pub(crate) fn receive(e: impl Into<ProtocolError>) -> Self {
        PeerError::Receive(e.into().to_string())
    }
}

/// Uniform contract over every broker family.
///
/// Lifecycle: connect, optionally `subscribe`, `setup` before publishing,
/// `done` once the last payload has been queued, and finally `teardown`.
/// `teardown` is safe at any point, including before `setup` or `subscribe`.
#[async_trait]
pub trait Peer: Send {
    /// Arm the peer to consume. Repeated calls are no-ops.
    async fn subscribe(&mut self) -> Result<(), PeerError>;

    /// Wait for the next message. Fails with [`PeerError::NotSubscribed`]
    /// unless `subscribe` succeeded first.
    async fn recv(&mut self) -> Result<Bytes, PeerError>;

    fn send_loop(&self) -> &SendLoop;

    fn send_loop_mut(&mut self) -> &mut SendLoop;

    /// Release broker resources. Must not fail, even if nothing was set up.
    async fn teardown(&mut self);

    /// Handle for queueing payloads to publish.
    fn send(&self) -> Result<Outbound, PeerError> {
        self.send_loop().send()
    }

    fn errors(&mut self) -> &mut ErrorReceiver {
        self.send_loop_mut().errors()
    }

    /// Start the send loop.
    fn setup(&mut self) -> Result<(), PeerError> {
        self.send_loop_mut().setup()
    }

    /// Signal that publishing is complete and wait for queued payloads to be
    /// published.
    async fn done(&mut self) {
        self.send_loop_mut().done().await
    }
}

/// A broker family plus whatever in-process state it needs.
#[derive(Clone)]
pub enum Backend {
    Kafka,
    RethinkDb,
    Nsq,
    Mock(MockBroker),
}

impl Backend {
    pub fn from_kind(kind: BrokerKind) -> Self {
        match kind {
            BrokerKind::Kafka => Backend::Kafka,
            BrokerKind::RethinkDb => Backend::RethinkDb,
            BrokerKind::Nsq => Backend::Nsq,
            BrokerKind::Mock => Backend::Mock(MockBroker::new()),
        }
    }

    pub fn kind(&self) -> BrokerKind {
        match self {
            Backend::Kafka => BrokerKind::Kafka,
            Backend::RethinkDb => BrokerKind::RethinkDb,
            Backend::Nsq => BrokerKind::Nsq,
            Backend::Mock(_) => BrokerKind::Mock,
        }
    }
}

/// Construct a peer bound to `host` (port optional, replaced by the family's
/// conventional port).
pub async fn connect(backend: &Backend, host: &str) -> Result<Box<dyn Peer>, PeerError> {
    let result: Result<Box<dyn Peer>, PeerError> = match backend {
        Backend::Kafka => kafka::KafkaPeer::connect(host)
            .await
            .map(|p| Box::new(p) as Box<dyn Peer>),
        Backend::RethinkDb => rethinkdb::RethinkDbPeer::connect(host)
            .await
            .map(|p| Box::new(p) as Box<dyn Peer>),
        Backend::Nsq => nsq::NsqPeer::connect(host)
            .await
            .map(|p| Box::new(p) as Box<dyn Peer>),
        Backend::Mock(broker) => broker.connect().map(|p| Box::new(p) as Box<dyn Peer>),
    };

    match &result {
        Ok(_) => {
            metrics::PEERS_CONNECTED.increment();
        }
        Err(e) => {
            metrics::CONNECT_FAILURES.increment();
            tracing::warn!(broker = ?backend.kind(), host, error = %e, "peer connect failed");
        }
    }
    result
}

/// One-time broker setup for a run, done before any peer connects. Kafka
/// gets its topic and RethinkDB a fresh table. Peers never touch either, so
/// a late connect cannot disturb a subscriber that is already listening.
pub async fn prepare(backend: &Backend, host: &str) -> Result<(), PeerError> {
    match backend {
        Backend::Kafka => kafka::ensure_topic(host).await,
        Backend::RethinkDb => rethinkdb::reset_table(host).await,
        Backend::Nsq | Backend::Mock(_) => Ok(()),
    }
}

/// Replace any port on `host` with `port`.
pub fn normalize_host(host: &str, port: u16) -> String {
    let host = host.trim();
    let bare = if let Some(rest) = host.strip_prefix('[') {
        match rest.find(']') {
            Some(end) => &host[..end + 2],
            None => host,
        }
    } else {
        host.split(':').next().unwrap_or(host)
    };
    let bare = if bare.is_empty() { "localhost" } else { bare };
    format!("{bare}:{port}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_normalization() {
        assert_eq!(normalize_host("broker", 9092), "broker:9092");
        assert_eq!(normalize_host("broker:1234", 9092), "broker:9092");
        assert_eq!(normalize_host("10.0.0.1:28015", 28015), "10.0.0.1:28015");
        assert_eq!(normalize_host("[::1]:4150", 4150), "[::1]:4150");
        assert_eq!(normalize_host("[::1]", 4150), "[::1]:4150");
        assert_eq!(normalize_host("", 4150), "localhost:4150");
    }

    #[test]
    fn backend_kind_roundtrip() {
        for kind in [
            BrokerKind::Kafka,
            BrokerKind::RethinkDb,
            BrokerKind::Nsq,
            BrokerKind::Mock,
        ] {
            assert_eq!(Backend::from_kind(kind).kind(), kind);
        }
    }

    #[tokio::test]
    async fn connect_refused_is_a_connection_error() {
        // nothing listens on port 1 of the loopback interface
        let err = match rethinkdb::RethinkDbPeer::connect_addr("127.0.0.1:1").await {
            Ok(_) => panic!("connect unexpectedly succeeded"),
            Err(e) => e,
        };
        assert!(matches!(err, PeerError::Connection(_)));
    }

    #[tokio::test]
    async fn connect_failures_are_counted() {
        let broker = MockBroker::new();
        let mut peer = connect(&Backend::Mock(broker.clone()), "ignored")
            .await
            .unwrap();

        broker.refuse_connects(true);
        let failures = metrics::CONNECT_FAILURES.value();
        assert!(connect(&Backend::Mock(broker), "ignored").await.is_err());
        assert!(metrics::CONNECT_FAILURES.value() > failures);
        peer.teardown().await;
    }

    #[tokio::test]
    async fn prepare_is_a_noop_without_setup_state() {
        prepare(&Backend::Mock(MockBroker::new()), "ignored").await.unwrap();
        prepare(&Backend::Nsq, "localhost").await.unwrap();
    }
}
