//! JSON (NDJSON) formatter for machine-readable output.

use super::{OutputFormatter, phase_name};
use crate::config::{BrokerKind, Config, TestMode};
use crate::results::Report;
use crate::worker::Phase;
use serde::Serialize;

/// JSON formatter outputting NDJSON (newline-delimited JSON).
pub struct JsonFormatter;

impl JsonFormatter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for JsonFormatter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct ConfigOutput {
    #[serde(rename = "type")]
    msg_type: &'static str,
    test: TestMode,
    broker: BrokerKind,
    host: String,
    provision: bool,
    num_messages: u64,
    message_size: usize,
    publishers: usize,
    subscribers: usize,
    drain_timeout_ms: u64,
}

#[derive(Serialize)]
struct PhaseOutput<'a> {
    #[serde(rename = "type")]
    msg_type: &'static str,
    ts: String,
    phase: &'static str,
    detail: &'a str,
}

#[derive(Serialize)]
struct ResultsOutput<'a> {
    #[serde(rename = "type")]
    msg_type: &'static str,
    incomplete: bool,
    #[serde(flatten)]
    report: &'a Report,
}

#[derive(Serialize)]
struct FailureOutput<'a> {
    #[serde(rename = "type")]
    msg_type: &'static str,
    error: &'a str,
}

fn emit<T: Serialize>(output: &T) {
    if let Ok(json) = serde_json::to_string(output) {
        println!("{}", json);
    }
}

fn config_output(config: &Config) -> ConfigOutput {
    ConfigOutput {
        msg_type: "config",
        test: config.general.test,
        broker: config.broker.kind,
        host: config.broker.host.clone(),
        provision: config.broker.provision,
        num_messages: config.general.num_messages,
        message_size: config.general.effective_message_size(),
        publishers: config.general.publishers,
        subscribers: config.general.subscribers,
        drain_timeout_ms: config.general.drain_timeout.as_millis() as u64,
    }
}

impl OutputFormatter for JsonFormatter {
    fn print_config(&self, config: &Config) {
        emit(&config_output(config));
    }

    fn print_phase(&self, phase: Phase, detail: &str) {
        emit(&PhaseOutput {
            msg_type: "phase",
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            phase: phase_name(phase),
            detail,
        });
    }

    fn print_results(&self, report: &Report) {
        emit(&ResultsOutput {
            msg_type: "results",
            incomplete: report.incomplete(),
            report,
        });
    }

    fn print_failure(&self, error: &str) {
        emit(&FailureOutput {
            msg_type: "error",
            error,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::{Role, WorkerResult};

    #[test]
    fn config_line() {
        let mut config = Config::default();
        config.general.test = TestMode::Throughput;
        config.broker.kind = BrokerKind::RethinkDb;
        let value = serde_json::to_value(config_output(&config)).unwrap();
        assert_eq!(value["type"], "config");
        assert_eq!(value["test"], "throughput");
        assert_eq!(value["broker"], "rethinkdb");
        assert_eq!(value["message_size"], 1000);
        assert_eq!(value["drain_timeout_ms"], 10_000);
    }

    #[test]
    fn results_line_flattens_report() {
        let mut publisher = WorkerResult::new(Role::Publisher, 0, 100, 10.0);
        publisher.aborted = true;
        let report = Report::aggregate(
            TestMode::Throughput,
            BrokerKind::Nsq,
            vec![publisher, WorkerResult::new(Role::Subscriber, 0, 100, 20.0)],
        );
        let value = serde_json::to_value(ResultsOutput {
            msg_type: "results",
            incomplete: report.incomplete(),
            report: &report,
        })
        .unwrap();

        assert_eq!(value["type"], "results");
        assert_eq!(value["incomplete"], true);
        assert_eq!(value["broker"], "nsq");
        assert_eq!(value["publishers"]["aborted"], 1);
        assert_eq!(value["subscribers"]["throughput"], 5000.0);
        assert_eq!(value["workers"][1]["role"], "subscriber");
        assert!(value.get("latency").is_none());
        assert!(value["workers"][0].get("histogram").is_none());
    }
}
