//! Verbose tracing-style formatter.

use super::format::format_rate;
use super::{OutputFormatter, phase_name};
use crate::config::Config;
use crate::results::Report;
use crate::worker::Phase;

/// Verbose formatter using tracing-style output.
pub struct VerboseFormatter;

impl VerboseFormatter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for VerboseFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputFormatter for VerboseFormatter {
    fn print_config(&self, config: &Config) {
        tracing::info!("starting brokerbench");
        tracing::info!("broker: {} @ {}", config.broker.kind, config.broker.host);
        tracing::info!("provision: {}", config.broker.provision);
        tracing::info!("test: {}", config.general.test);
        tracing::info!("messages per publisher: {}", config.general.num_messages);
        tracing::info!(
            "message size: {} bytes",
            config.general.effective_message_size()
        );
        tracing::info!(
            "workers: {} publishers, {} subscribers",
            config.general.publishers,
            config.general.subscribers
        );
        tracing::info!(
            "drain timeout: {:.1}s",
            config.general.drain_timeout.as_secs_f64()
        );
    }

    fn print_phase(&self, phase: Phase, detail: &str) {
        tracing::info!("{}: {}", phase_name(phase), detail);
    }

    fn print_results(&self, report: &Report) {
        for worker in &report.workers {
            tracing::info!(
                "{:?} {}: {} msgs in {:.1}ms ({} msg/s), {} errors{}",
                worker.role,
                worker.id,
                worker.messages,
                worker.duration_ms,
                format_rate(worker.throughput),
                worker.errors,
                if worker.aborted { ", aborted" } else { "" }
            );
        }
        tracing::info!(
            "publish: {} msgs, {} msg/s total, {} msg/s mean",
            report.publishers.messages,
            format_rate(report.publishers.throughput),
            format_rate(report.publishers.mean_throughput)
        );
        tracing::info!(
            "receive: {} msgs, {} msg/s total, {} msg/s mean",
            report.subscribers.messages,
            format_rate(report.subscribers.throughput),
            format_rate(report.subscribers.mean_throughput)
        );
        if let Some(latency) = &report.latency {
            tracing::info!(
                "latency: {} samples, mean {:.1}us, min {:.1}us, max {:.1}us",
                latency.count,
                latency.mean_us,
                latency.min_us,
                latency.max_us
            );
            tracing::info!(
                "latency: p50={:.1}us p90={:.1}us p99={:.1}us p99.9={:.1}us p99.99={:.1}us",
                latency.p50_us,
                latency.p90_us,
                latency.p99_us,
                latency.p999_us,
                latency.p9999_us
            );
            if latency.negative_samples > 0 {
                tracing::warn!(
                    "{} samples had a send time after their receive time",
                    latency.negative_samples
                );
            }
        }
        if let Some(error) = &report.teardown_error {
            tracing::error!("broker teardown failed: {}", error);
        }
    }

    fn print_failure(&self, error: &str) {
        tracing::error!("run failed: {}", error);
    }
}
