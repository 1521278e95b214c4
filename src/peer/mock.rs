//! In-process broker for tests and dry runs.
//!
//! Every published payload is delivered, without delay, to every peer that
//! subscribed before the publish.

use super::{Peer, PeerError, Publish, SendLoop};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc};

#[derive(Default)]
struct Inner {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Bytes>>>,
    published: AtomicU64,
    fail_publishes: AtomicU64,
    refuse_connects: AtomicBool,
}

/// Shared handle to an in-process broker. Clones refer to the same broker.
#[derive(Clone, Default)]
pub struct MockBroker {
    inner: Arc<Inner>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of payloads accepted so far.
    pub fn published(&self) -> u64 {
        self.inner.published.load(Ordering::Acquire)
    }

    /// Reject the next `count` publishes.
    pub fn fail_next_publishes(&self, count: u64) {
        self.inner.fail_publishes.store(count, Ordering::Release);
    }

    pub fn refuse_connects(&self, refuse: bool) {
        self.inner.refuse_connects.store(refuse, Ordering::Release);
    }

    pub fn connect(&self) -> Result<MockPeer, PeerError> {
        if self.inner.refuse_connects.load(Ordering::Acquire) {
            return Err(PeerError::Connection("mock broker refused".to_string()));
        }
        Ok(MockPeer {
            broker: self.clone(),
            send_loop: SendLoop::new(Box::new(MockProducer {
                broker: self.clone(),
            })),
            inbox: None,
        })
    }

    async fn subscribe(&self) -> mpsc::UnboundedReceiver<Bytes> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers.lock().await.push(tx);
        rx
    }

    async fn publish(&self, payload: Bytes) -> Result<(), PeerError> {
        let rejected = self
            .inner
            .fail_publishes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(PeerError::Publish("mock broker rejected message".to_string()));
        }

        let mut subscribers = self.inner.subscribers.lock().await;
        subscribers.retain(|tx| tx.send(payload.clone()).is_ok());
        self.inner.published.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

struct MockProducer {
    broker: MockBroker,
}

#[async_trait]
impl Publish for MockProducer {
    async fn publish(&mut self, payload: Bytes) -> Result<(), PeerError> {
        self.broker.publish(payload).await
    }
}

pub struct MockPeer {
    broker: MockBroker,
    send_loop: SendLoop,
    inbox: Option<mpsc::UnboundedReceiver<Bytes>>,
}

#[async_trait]
impl Peer for MockPeer {
    async fn subscribe(&mut self) -> Result<(), PeerError> {
        if self.inbox.is_none() {
            self.inbox = Some(self.broker.subscribe().await);
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Bytes, PeerError> {
        let inbox = self.inbox.as_mut().ok_or(PeerError::NotSubscribed)?;
        inbox
            .recv()
            .await
            .ok_or_else(|| PeerError::Receive("mock broker closed".to_string()))
    }

    fn send_loop(&self) -> &SendLoop {
        &self.send_loop
    }

    fn send_loop_mut(&mut self) -> &mut SendLoop {
        &mut self.send_loop
    }

    async fn teardown(&mut self) {
        self.send_loop.teardown().await;
        self.inbox = None;
    }
}
