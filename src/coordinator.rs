//! Run orchestration: provision, connect, subscribe, publish, drain, tear
//! down, aggregate.

use crate::broker::{BrokerController, ProvisionError};
use crate::config::Config;
use crate::metrics;
use crate::output::OutputFormatter;
use crate::peer::{self, Backend, Peer, PeerError};
use crate::results::{Report, WorkerResult};
use crate::worker::{Phase, Publisher, SharedState, Subscriber};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to provision broker: {0}")]
    Provision(#[from] ProvisionError),
    #[error("failed to prepare broker: {0}")]
    Prepare(PeerError),
    #[error("failed to connect {role} {id}: {source}")]
    Connect {
        role: &'static str,
        id: usize,
        source: PeerError,
    },
    #[error("subscriber {id} failed to subscribe: {source}")]
    Subscribe { id: usize, source: PeerError },
    #[error("publisher {id} failed to start: {source}")]
    Setup { id: usize, source: PeerError },
    #[error("failed to create runtime: {0}")]
    Runtime(#[from] io::Error),
    #[error("interrupted before any worker started")]
    Interrupted,
}

type WorkerTask = JoinHandle<Box<dyn Peer>>;

/// Run a complete benchmark. Builds its own Tokio runtime, so it must not be
/// called from within one.
pub fn run(
    config: &Config,
    backend: Backend,
    controller: &mut dyn BrokerController,
    shared: Arc<SharedState>,
    formatter: &dyn OutputFormatter,
) -> Result<Report, RunError> {
    let broker = &config.broker;
    if broker.provision {
        formatter.print_phase(Phase::Connect, &format!("provisioning {}", broker.kind));
        let handle = controller.start(&broker.host, broker.port)?;
        tracing::info!(broker = %broker.kind, handle = %handle, "broker provisioned");
        wait_interruptibly(&shared, broker.startup_delay);
    }

    let measured = if shared.phase().should_stop() {
        Err(RunError::Interrupted)
    } else {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(RunError::from)
            .and_then(|runtime| {
                runtime.block_on(measure(config, &backend, Arc::clone(&shared), formatter))
            })
    };

    let teardown_error = if broker.provision {
        match controller.stop() {
            Ok(output) => {
                tracing::info!(broker = %broker.kind, output = %output, "broker stopped");
                None
            }
            Err(e) => {
                tracing::error!(broker = %broker.kind, error = %e, "failed to stop broker");
                Some(e.to_string())
            }
        }
    } else {
        None
    };

    let workers = measured?;
    let mut report = Report::aggregate(config.general.test, backend.kind(), workers);
    report.teardown_error = teardown_error;
    Ok(report)
}

/// Sleep for `delay`, returning early once a stop is requested.
fn wait_interruptibly(shared: &SharedState, delay: Duration) {
    let deadline = std::time::Instant::now() + delay;
    loop {
        let now = std::time::Instant::now();
        if now >= deadline || shared.phase().should_stop() {
            return;
        }
        std::thread::sleep((deadline - now).min(Duration::from_millis(100)));
    }
}

/// The measured part of a run, on an existing runtime. Every connected peer
/// is torn down before this returns, on success or failure.
pub async fn measure(
    config: &Config,
    backend: &Backend,
    shared: Arc<SharedState>,
    formatter: &dyn OutputFormatter,
) -> Result<Vec<WorkerResult>, RunError> {
    let general = &config.general;
    let host = config.broker.host.as_str();
    let (results_tx, results_rx) = crossbeam_channel::unbounded();

    peer::prepare(backend, host)
        .await
        .map_err(RunError::Prepare)?;

    shared.set_phase(Phase::Subscribe);
    formatter.print_phase(
        Phase::Subscribe,
        &format!("{} subscribers", general.subscribers),
    );
    let mut subscribers: Vec<Box<dyn Peer>> = Vec::with_capacity(general.subscribers);
    for id in 0..general.subscribers {
        let armed = match peer::connect(backend, host).await {
            Ok(mut peer) => match peer.subscribe().await {
                Ok(()) => Ok(peer),
                Err(source) => {
                    subscribers.push(peer);
                    Err(RunError::Subscribe { id, source })
                }
            },
            Err(source) => Err(RunError::Connect {
                role: "subscriber",
                id,
                source,
            }),
        };
        match armed {
            Ok(peer) => subscribers.push(peer),
            Err(e) => {
                teardown_all(subscribers).await;
                return Err(e);
            }
        }
    }

    let expected = general.expected_per_subscriber();
    let subscriber_tasks: Vec<WorkerTask> = subscribers
        .into_iter()
        .enumerate()
        .map(|(id, mut peer)| {
            let subscriber = Subscriber {
                id,
                test: general.test,
                expected,
                max_receive_errors: general.max_receive_errors,
                shared: Arc::clone(&shared),
                results: results_tx.clone(),
            };
            tokio::spawn(async move {
                subscriber.run(peer.as_mut()).await;
                peer
            })
        })
        .collect();

    shared.set_phase(Phase::Publish);
    formatter.print_phase(
        Phase::Publish,
        &format!(
            "{} publishers x {} messages",
            general.publishers, general.num_messages
        ),
    );
    let mut publishers: Vec<Box<dyn Peer>> = Vec::with_capacity(general.publishers);
    for id in 0..general.publishers {
        let ready = match peer::connect(backend, host).await {
            Ok(mut peer) => match peer.setup() {
                Ok(()) => Ok(peer),
                Err(source) => {
                    publishers.push(peer);
                    Err(RunError::Setup { id, source })
                }
            },
            Err(source) => Err(RunError::Connect {
                role: "publisher",
                id,
                source,
            }),
        };
        match ready {
            Ok(peer) => publishers.push(peer),
            Err(e) => {
                shared.stop();
                let mut peers = publishers;
                peers.extend(join_all(subscriber_tasks).await);
                teardown_all(peers).await;
                return Err(e);
            }
        }
    }

    let publisher_tasks: Vec<WorkerTask> = publishers
        .into_iter()
        .enumerate()
        .map(|(id, mut peer)| {
            let publisher = Publisher {
                id,
                test: general.test,
                num_messages: general.num_messages,
                message_size: general.effective_message_size(),
                abort_on_error: general.abort_on_publish_error,
                shared: Arc::clone(&shared),
                results: results_tx.clone(),
            };
            tokio::spawn(async move {
                publisher.run(peer.as_mut()).await;
                peer
            })
        })
        .collect();
    drop(results_tx);

    let mut peers = join_all(publisher_tasks).await;

    if !shared.phase().should_stop() {
        shared.set_phase(Phase::Drain);
    }
    formatter.print_phase(
        Phase::Drain,
        &format!("up to {:.1}s", general.drain_timeout.as_secs_f64()),
    );
    let deadline = Instant::now() + general.drain_timeout;
    for mut task in subscriber_tasks {
        match tokio::time::timeout_at(deadline, &mut task).await {
            Ok(joined) => peers.extend(joined_peer(joined)),
            Err(_) => {
                if !shared.phase().should_stop() {
                    tracing::warn!(
                        timeout_ms = general.drain_timeout.as_millis() as u64,
                        "drain timeout elapsed, stopping subscribers"
                    );
                    shared.stop();
                }
                peers.extend(joined_peer(task.await));
            }
        }
    }
    shared.stop();

    teardown_all(peers).await;
    Ok(results_rx.try_iter().collect())
}

async fn join_all(tasks: Vec<WorkerTask>) -> Vec<Box<dyn Peer>> {
    let mut peers = Vec::with_capacity(tasks.len());
    for task in tasks {
        peers.extend(joined_peer(task.await));
    }
    peers
}

fn joined_peer(joined: Result<Box<dyn Peer>, tokio::task::JoinError>) -> Option<Box<dyn Peer>> {
    match joined {
        Ok(peer) => Some(peer),
        Err(e) => {
            tracing::error!(error = %e, "worker task failed");
            None
        }
    }
}

async fn teardown_all(peers: Vec<Box<dyn Peer>>) {
    let count = peers.len();
    for mut peer in peers {
        peer.teardown().await;
        metrics::PEERS_CONNECTED.decrement();
    }
    tracing::debug!(peers = count, "peers torn down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::NoopBroker;
    use crate::config::{BrokerKind, TestMode};
    use crate::output::QuietFormatter;
    use crate::peer::MockBroker;

    fn mock_config(test: TestMode) -> Config {
        let mut config = Config::default();
        config.general.test = test;
        config.general.num_messages = 200;
        config.general.publishers = 2;
        config.general.subscribers = 3;
        config.general.drain_timeout = Duration::from_secs(5);
        config.broker.kind = BrokerKind::Mock;
        config
    }

    #[test]
    fn mock_throughput_run() {
        let config = mock_config(TestMode::Throughput);
        let broker = MockBroker::new();
        let report = run(
            &config,
            Backend::Mock(broker.clone()),
            &mut NoopBroker::default(),
            Arc::new(SharedState::new()),
            &QuietFormatter::new(),
        )
        .unwrap();

        assert_eq!(broker.published(), 400);
        assert_eq!(report.broker, BrokerKind::Mock);
        assert_eq!(report.publishers.workers, 2);
        assert_eq!(report.publishers.messages, 400);
        assert_eq!(report.subscribers.workers, 3);
        assert_eq!(report.subscribers.messages, 1200);
        assert!(!report.incomplete());
        assert!(report.latency.is_none());
        assert!(report.teardown_error.is_none());
    }

    #[test]
    fn publish_failure_produces_partial_result() {
        let mut config = mock_config(TestMode::Latency);
        config.general.drain_timeout = Duration::from_millis(200);
        let broker = MockBroker::new();
        broker.fail_next_publishes(1);
        let report = run(
            &config,
            Backend::Mock(broker),
            &mut NoopBroker::default(),
            Arc::new(SharedState::new()),
            &QuietFormatter::new(),
        )
        .unwrap();

        assert_eq!(report.publishers.errors, 1);
        // subscribers come up one short and are released by the drain timeout
        assert_eq!(report.subscribers.aborted, 3);
        assert!(report.subscribers.messages < 3 * 400);
        assert!(report.incomplete());
    }

    #[test]
    fn connect_failure_is_an_error() {
        let config = mock_config(TestMode::Latency);
        let broker = MockBroker::new();
        broker.refuse_connects(true);
        let err = run(
            &config,
            Backend::Mock(broker),
            &mut NoopBroker::default(),
            Arc::new(SharedState::new()),
            &QuietFormatter::new(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            RunError::Connect {
                role: "subscriber",
                id: 0,
                ..
            }
        ));
    }

    #[test]
    fn interrupted_before_start() {
        let config = mock_config(TestMode::Latency);
        let shared = Arc::new(SharedState::new());
        shared.stop();
        let err = run(
            &config,
            Backend::Mock(MockBroker::new()),
            &mut NoopBroker::default(),
            shared,
            &QuietFormatter::new(),
        )
        .unwrap_err();
        assert!(matches!(err, RunError::Interrupted));
    }

    #[test]
    fn provisioning_starts_and_stops_the_broker() {
        let mut config = mock_config(TestMode::Throughput);
        config.broker.provision = true;
        config.broker.startup_delay = Duration::from_millis(1);
        let mut controller = NoopBroker::default();
        run(
            &config,
            Backend::Mock(MockBroker::new()),
            &mut controller,
            Arc::new(SharedState::new()),
            &QuietFormatter::new(),
        )
        .unwrap();
        // stopped by the run, so a second stop finds nothing
        assert!(controller.stop().is_err());
    }
}
