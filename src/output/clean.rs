//! Clean table formatter with optional color output.

use super::format::{
    format_bytes, format_count, format_duration_ms, format_latency_padded, format_latency_us,
    format_rate,
};
use super::{ColorMode, OutputFormatter, phase_name};
use crate::config::{Config, TestMode};
use crate::results::{LatencySummary, Report, RoleTotals};
use crate::worker::Phase;
use std::io::{self, IsTerminal, Write};

const RULE: &str = "─────────────────────────────────────────────────────────────────────";

/// ANSI escape codes for colors.
mod ansi {
    pub const RED: &str = "\x1b[31m";
    pub const RESET: &str = "\x1b[0m";
}

/// Clean table formatter with optional color support.
pub struct CleanFormatter {
    use_color: bool,
}

impl CleanFormatter {
    pub fn new(color_mode: ColorMode) -> Self {
        let use_color = match color_mode {
            ColorMode::Always => true,
            ColorMode::Never => false,
            ColorMode::Auto => {
                // Check if stdout is a TTY and NO_COLOR is not set
                io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err()
            }
        };
        Self { use_color }
    }

    fn red(&self, s: &str) -> String {
        if self.use_color {
            format!("{}{}{}", ansi::RED, s, ansi::RESET)
        } else {
            s.to_string()
        }
    }

    fn maybe_red(&self, s: &str, condition: bool) -> String {
        if condition {
            self.red(s)
        } else {
            s.to_string()
        }
    }

    fn role_line(&self, name: &str, totals: &RoleTotals) -> String {
        let errors = format!("{} errors", format_count(totals.errors));
        let mut line = format!(
            "{:<12} {} msg/s ({} msgs, {} workers, {}), {}",
            name,
            format_rate(totals.throughput),
            format_count(totals.messages),
            totals.workers,
            format_duration_ms(totals.duration_ms),
            self.maybe_red(&errors, totals.errors > 0),
        );
        if totals.aborted > 0 {
            line.push_str(&format!(", {}", self.red(&format!("{} aborted", totals.aborted))));
        }
        line
    }
}

fn latency_row(latency: &LatencySummary) -> String {
    format!(
        "{:<12} {}  {}  {}  {}  {}  {}",
        "end-to-end",
        format_latency_padded(latency.p50_us, 6),
        format_latency_padded(latency.p90_us, 6),
        format_latency_padded(latency.p99_us, 6),
        format_latency_padded(latency.p999_us, 6),
        format_latency_padded(latency.p9999_us, 6),
        format_latency_padded(latency.max_us, 6),
    )
}

impl OutputFormatter for CleanFormatter {
    fn print_config(&self, config: &Config) {
        let general = &config.general;
        let broker = &config.broker;

        println!("brokerbench");
        println!("──────────────────");
        let provision = if broker.provision { ", provisioned" } else { "" };
        println!("broker     {} @ {}{}", broker.kind, broker.host, provision);
        let size = match general.test {
            TestMode::Throughput => format_bytes(general.message_size as u64),
            TestMode::Latency => format!("{}B timestamp", general.effective_message_size()),
        };
        println!(
            "test       {}, {} msgs/publisher, {}",
            general.test,
            format_count(general.num_messages),
            size
        );
        println!(
            "workers    {} publishers, {} subscribers",
            general.publishers, general.subscribers
        );
        println!("drain      {:.1}s", general.drain_timeout.as_secs_f64());
        println!();
    }

    fn print_phase(&self, phase: Phase, detail: &str) {
        println!("[{} {}]", phase_name(phase), detail);
        let _ = io::stdout().flush();
    }

    fn print_results(&self, report: &Report) {
        println!();
        println!("{}", RULE);
        let title = format!("RESULTS ({}, {})", report.test, report.broker);
        println!("{}", self.maybe_red(&title, report.incomplete()));
        println!("{}", RULE);

        println!("{}", self.role_line("publish", &report.publishers));
        println!("{}", self.role_line("receive", &report.subscribers));

        if let Some(latency) = &report.latency {
            println!();
            println!(
                "latency      {:>6}  {:>6}  {:>6}  {:>6}  {:>6}  {:>6}",
                "p50", "p90", "p99", "p99.9", "p99.99", "max"
            );
            println!("{}", latency_row(latency));
            println!(
                "             mean {}, min {}, {} samples",
                format_latency_us(latency.mean_us),
                format_latency_us(latency.min_us),
                format_count(latency.count)
            );

            let problems = latency.decode_errors + latency.receive_errors + latency.negative_samples;
            let line = format!(
                "samples      {} decode errors, {} receive errors, {} negative",
                latency.decode_errors, latency.receive_errors, latency.negative_samples
            );
            println!("{}", self.maybe_red(&line, problems > 0));
        }

        if let Some(error) = &report.teardown_error {
            println!();
            println!("teardown     {}", self.red(error));
        }
        let _ = io::stdout().flush();
    }

    fn print_failure(&self, error: &str) {
        println!();
        println!("{}", self.red(RULE));
        println!("{}", self.red("RUN FAILED"));
        println!("{}", self.red(RULE));
        println!("{}", self.red(error));
        let _ = io::stdout().flush();
    }
}
