//! Publisher and subscriber workers.
//!
//! Workers are Tokio tasks driving one [`Peer`](crate::peer::Peer) each. They
//! report a single [`WorkerResult`](crate::results::WorkerResult) on the
//! shared results channel when they finish.

mod publisher;
mod subscriber;

pub use crate::config::TestMode;
pub use publisher::Publisher;
pub use subscriber::Subscriber;

use crate::results::WorkerResult;
use tokio::sync::watch;

/// Run phase, set by the coordinator and observed by workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Provisioning and connecting peers
    Connect,
    /// Subscribers are arming and starting
    Subscribe,
    /// Publishers are sending
    Publish,
    /// Publishers finished; subscribers catch up
    Drain,
    /// Workers should exit
    Stop,
}

impl Phase {
    #[inline]
    pub fn is_measuring(self) -> bool {
        matches!(self, Phase::Publish | Phase::Drain)
    }

    #[inline]
    pub fn should_stop(self) -> bool {
        self == Phase::Stop
    }
}

/// Shared state between workers and the coordinator.
pub struct SharedState {
    phase: watch::Sender<Phase>,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            phase: watch::Sender::new(Phase::Connect),
        }
    }

    /// Get the current phase.
    #[inline]
    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Set the phase. Safe to call from any thread, including signal
    /// handlers.
    pub fn set_phase(&self, phase: Phase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            tracing::debug!(from = ?previous, to = ?phase, "phase change");
        }
    }

    /// Request that every worker stop.
    pub fn stop(&self) {
        self.set_phase(Phase::Stop);
    }

    /// Resolve once the phase reaches [`Phase::Stop`].
    pub async fn stopped(&self) {
        let mut rx = self.phase.subscribe();
        // the sender lives in self, so the channel cannot close here
        let _ = rx.wait_for(|phase| phase.should_stop()).await;
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

/// Where workers deliver their results.
pub type ResultSender = crossbeam_channel::Sender<WorkerResult>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn phase_predicates() {
        assert!(!Phase::Connect.is_measuring());
        assert!(Phase::Publish.is_measuring());
        assert!(Phase::Drain.is_measuring());
        assert!(Phase::Stop.should_stop());
        assert!(!Phase::Drain.should_stop());
    }

    #[tokio::test]
    async fn stopped_wakes_on_stop() {
        let shared = Arc::new(SharedState::new());
        let waiter = {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move { shared.stopped().await })
        };
        shared.set_phase(Phase::Publish);
        assert_eq!(shared.phase(), Phase::Publish);

        // set from another thread, like the ctrl-c handler does
        let from_thread = Arc::clone(&shared);
        std::thread::spawn(move || from_thread.stop())
            .join()
            .unwrap();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(shared.phase().should_stop());
    }

    #[tokio::test]
    async fn stopped_returns_immediately_when_already_stopped() {
        let shared = SharedState::new();
        shared.stop();
        shared.stopped().await;
    }
}
