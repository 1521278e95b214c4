//! Full runs against the in-process broker through the public API.

use brokerbench::broker::NoopBroker;
use brokerbench::output::QuietFormatter;
use brokerbench::results::Role;
use brokerbench::{Backend, BrokerKind, Config, MockBroker, SharedState, TestMode, coordinator};
use std::sync::Arc;
use std::time::Duration;

fn mock_config(test: TestMode, messages: u64) -> Config {
    let mut config = Config::default();
    config.general.test = test;
    config.general.num_messages = messages;
    config.general.publishers = 1;
    config.general.subscribers = 1;
    config.general.drain_timeout = Duration::from_secs(10);
    config.broker.kind = BrokerKind::Mock;
    config.validate().unwrap();
    config
}

#[test]
fn latency_run_measures_every_message() {
    let config = mock_config(TestMode::Latency, 1000);
    let broker = MockBroker::new();
    let report = coordinator::run(
        &config,
        Backend::Mock(broker.clone()),
        &mut NoopBroker::default(),
        Arc::new(SharedState::new()),
        &QuietFormatter::new(),
    )
    .unwrap();

    assert_eq!(broker.published(), 1000);
    assert!(!report.incomplete());
    assert_eq!(report.publishers.messages, 1000);
    assert_eq!(report.subscribers.messages, 1000);

    let latency = report.latency.expect("latency summary");
    assert_eq!(latency.count + latency.negative_samples, 1000);
    assert_eq!(latency.decode_errors, 0);
    assert_eq!(latency.receive_errors, 0);
    assert!(latency.mean_us >= 0.0);
    assert!(latency.min_us <= latency.p50_us);
    assert!(latency.p50_us <= latency.p99_us);
    assert!(latency.p99_us <= latency.max_us);

    let roles: Vec<_> = report.workers.iter().map(|w| w.role).collect();
    assert_eq!(roles, vec![Role::Publisher, Role::Subscriber]);
}

#[test]
fn throughput_run_fans_out_to_every_subscriber() {
    let mut config = mock_config(TestMode::Throughput, 500);
    config.general.publishers = 2;
    config.general.subscribers = 2;
    config.general.message_size = 64;
    let report = coordinator::run(
        &config,
        Backend::from_kind(BrokerKind::Mock),
        &mut NoopBroker::default(),
        Arc::new(SharedState::new()),
        &QuietFormatter::new(),
    )
    .unwrap();

    assert!(report.latency.is_none());
    assert_eq!(report.publishers.messages, 1000);
    assert_eq!(report.subscribers.messages, 2000);
    assert!(report.publishers.throughput > 0.0);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["test"], "throughput");
    assert_eq!(json["broker"], "mock");
}
