//! Quiet formatter with minimal single-line output.

use super::OutputFormatter;
use super::format::{format_count, format_latency_us, format_rate};
use crate::config::Config;
use crate::results::Report;
use crate::worker::Phase;

/// Quiet formatter that only outputs final results on a single line.
pub struct QuietFormatter;

impl QuietFormatter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for QuietFormatter {
    fn default() -> Self {
        Self::new()
    }
}

fn summary_line(report: &Report) -> String {
    let mut line = format!(
        "{} {}: pub {} msg/s, sub {} msg/s, {} received",
        report.broker,
        report.test,
        format_rate(report.publishers.throughput),
        format_rate(report.subscribers.throughput),
        format_count(report.subscribers.messages),
    );
    if let Some(latency) = &report.latency {
        line.push_str(&format!(
            ", p50 {}, p99 {}",
            format_latency_us(latency.p50_us),
            format_latency_us(latency.p99_us)
        ));
    }
    if report.incomplete() {
        line.push_str(", incomplete");
    }
    line
}

impl OutputFormatter for QuietFormatter {
    fn print_config(&self, _config: &Config) {
        // Quiet mode doesn't print config
    }

    fn print_phase(&self, _phase: Phase, _detail: &str) {
        // Quiet mode doesn't print phases
    }

    fn print_results(&self, report: &Report) {
        println!("{}", summary_line(report));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BrokerKind, TestMode};
    use crate::results::{Role, WorkerResult};

    #[test]
    fn single_line_summary() {
        let report = Report::aggregate(
            TestMode::Throughput,
            BrokerKind::Kafka,
            vec![
                WorkerResult::new(Role::Publisher, 0, 10_000, 500.0),
                WorkerResult::new(Role::Subscriber, 0, 10_000, 1_000.0),
            ],
        );
        assert_eq!(
            summary_line(&report),
            "kafka throughput: pub 20.0K msg/s, sub 10.0K msg/s, 10.0K received"
        );
    }
}
