//! The per-peer send loop.
//!
//! A spawned task owns the producer half of a broker connection. Workers hand
//! it payloads through an unbounded channel and learn about publish failures
//! on a second unbounded channel. Once `done` fires the loop stops accepting
//! new payloads, publishes everything already queued, and hands the producer
//! back so teardown can close it.

use super::PeerError;
use crate::metrics;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// The broker-specific publish primitive driven by the send loop.
#[async_trait]
pub trait Publish: Send + 'static {
    async fn publish(&mut self, payload: Bytes) -> Result<(), PeerError>;

    /// Release the producer connection.
    async fn close(&mut self) {}
}

/// Cloneable handle for submitting payloads to a peer.
#[derive(Clone)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl Outbound {
    /// Queue a payload. Never blocks; fails only once the loop has finished.
    #[inline]
    pub fn send(&self, payload: Bytes) -> Result<(), PeerError> {
        self.tx
            .send(payload)
            .map_err(|_| PeerError::SendLoopClosed)
    }
}

/// Publish failures reported by the send loop.
pub struct ErrorReceiver {
    rx: mpsc::UnboundedReceiver<PeerError>,
}

impl ErrorReceiver {
    /// Next pending error, if any, without waiting.
    pub fn try_recv(&mut self) -> Option<PeerError> {
        self.rx.try_recv().ok()
    }

    /// Take every error reported so far.
    pub fn drain(&mut self) -> Vec<PeerError> {
        let mut errors = Vec::new();
        while let Ok(e) = self.rx.try_recv() {
            errors.push(e);
        }
        errors
    }
}

struct Running {
    done: oneshot::Sender<()>,
    task: JoinHandle<Box<dyn Publish>>,
}

pub struct SendLoop {
    publisher: Option<Box<dyn Publish>>,
    outbound: Option<Outbound>,
    running: Option<Running>,
    started: bool,
    errors_tx: mpsc::UnboundedSender<PeerError>,
    errors: ErrorReceiver,
}

impl SendLoop {
    pub fn new(publisher: Box<dyn Publish>) -> Self {
        let (errors_tx, rx) = mpsc::unbounded_channel();
        Self {
            publisher: Some(publisher),
            outbound: None,
            running: None,
            started: false,
            errors_tx,
            errors: ErrorReceiver { rx },
        }
    }

    /// Spawn the loop on the current Tokio runtime.
    pub fn setup(&mut self) -> Result<(), PeerError> {
        if self.started {
            return Err(PeerError::AlreadySetUp);
        }
        let publisher = self.publisher.take().ok_or(PeerError::SendLoopClosed)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();
        let task = tokio::spawn(run(publisher, rx, done_rx, self.errors_tx.clone()));

        self.outbound = Some(Outbound { tx });
        self.running = Some(Running {
            done: done_tx,
            task,
        });
        self.started = true;
        Ok(())
    }

    pub fn send(&self) -> Result<Outbound, PeerError> {
        self.outbound.clone().ok_or(PeerError::NotSetUp)
    }

    pub fn errors(&mut self) -> &mut ErrorReceiver {
        &mut self.errors
    }

    /// Stop the loop after it has published everything already queued.
    pub async fn done(&mut self) {
        self.outbound = None;
        let Some(running) = self.running.take() else {
            return;
        };
        let _ = running.done.send(());
        match running.task.await {
            Ok(publisher) => self.publisher = Some(publisher),
            Err(e) => tracing::warn!(error = %e, "send loop task failed"),
        }
    }

    /// Stop the loop if it is running and close the producer.
    pub async fn teardown(&mut self) {
        self.done().await;
        if let Some(mut publisher) = self.publisher.take() {
            publisher.close().await;
        }
    }
}

async fn run(
    mut publisher: Box<dyn Publish>,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    mut done: oneshot::Receiver<()>,
    errors: mpsc::UnboundedSender<PeerError>,
) -> Box<dyn Publish> {
    loop {
        tokio::select! {
            biased;
            _ = &mut done => break,
            payload = rx.recv() => match payload {
                Some(payload) => publish_one(publisher.as_mut(), payload, &errors).await,
                None => return publisher,
            },
        }
    }

    rx.close();
    while let Some(payload) = rx.recv().await {
        publish_one(publisher.as_mut(), payload, &errors).await;
    }
    publisher
}

async fn publish_one(
    publisher: &mut dyn Publish,
    payload: Bytes,
    errors: &mpsc::UnboundedSender<PeerError>,
) {
    match publisher.publish(payload).await {
        Ok(()) => {
            metrics::MESSAGES_PUBLISHED.increment();
        }
        Err(e) => {
            metrics::PUBLISH_ERRORS.increment();
            tracing::debug!(error = %e, "publish failed");
            let _ = errors.send(e);
        }
    }
}
