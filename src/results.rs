//! Worker results and their aggregation into a run report.

use crate::config::{BrokerKind, TestMode};
use metriken::histogram::Histogram;
use serde::Serialize;

/// Percentiles reported for every latency summary.
pub const PERCENTILES: [f64; 5] = [50.0, 90.0, 99.0, 99.9, 99.99];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Publisher,
    Subscriber,
}

/// Messages per second for `messages` over `duration_ms`. Zero when no time
/// elapsed.
pub fn throughput(messages: u64, duration_ms: f64) -> f64 {
    if duration_ms > 0.0 {
        1000.0 * messages as f64 / duration_ms
    } else {
        0.0
    }
}

/// One worker's measurement.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerResult {
    pub role: Role,
    pub id: usize,
    pub duration_ms: f64,
    pub throughput: f64,
    /// Messages submitted (publishers) or received (subscribers).
    pub messages: u64,
    /// Publish errors (publishers) or receive errors (subscribers).
    pub errors: u64,
    /// The worker stopped before reaching its message count.
    pub aborted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<LatencySummary>,
    /// Exact latency totals, merged across subscribers without rounding.
    #[serde(skip)]
    pub stats: LatencyStats,
    #[serde(skip)]
    pub histogram: Option<Histogram>,
}

impl WorkerResult {
    pub fn new(role: Role, id: usize, messages: u64, duration_ms: f64) -> Self {
        Self {
            role,
            id,
            duration_ms,
            throughput: throughput(messages, duration_ms),
            messages,
            errors: 0,
            aborted: false,
            latency: None,
            stats: LatencyStats::default(),
            histogram: None,
        }
    }
}

/// End-to-end latency statistics, in microseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    /// Samples recorded in the histogram.
    pub count: u64,
    pub mean_us: f64,
    pub min_us: f64,
    pub max_us: f64,
    pub p50_us: f64,
    pub p90_us: f64,
    pub p99_us: f64,
    pub p999_us: f64,
    pub p9999_us: f64,
    pub decode_errors: u64,
    pub receive_errors: u64,
    /// Samples whose send time was later than the receive time.
    pub negative_samples: u64,
}

/// Exact running statistics kept beside the histogram.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatencyStats {
    pub count: u64,
    pub sum_ns: u128,
    pub min_ns: u64,
    pub max_ns: u64,
}

impl LatencyStats {
    pub fn record(&mut self, latency_ns: u64) {
        if self.count == 0 || latency_ns < self.min_ns {
            self.min_ns = latency_ns;
        }
        self.max_ns = self.max_ns.max(latency_ns);
        self.sum_ns += latency_ns as u128;
        self.count += 1;
    }

    pub fn merge(&mut self, other: &LatencyStats) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 || other.min_ns < self.min_ns {
            self.min_ns = other.min_ns;
        }
        self.max_ns = self.max_ns.max(other.max_ns);
        self.sum_ns += other.sum_ns;
        self.count += other.count;
    }

    pub fn mean_ns(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_ns as f64 / self.count as f64
        }
    }
}

impl LatencySummary {
    /// Build a summary from exact stats and the histogram for percentiles.
    pub fn from_parts(stats: &LatencyStats, histogram: Option<&Histogram>) -> Self {
        let mut summary = LatencySummary {
            count: stats.count,
            mean_us: stats.mean_ns() / 1000.0,
            min_us: stats.min_ns as f64 / 1000.0,
            max_us: stats.max_ns as f64 / 1000.0,
            ..Default::default()
        };
        if let Some(histogram) = histogram
            && let Ok(Some(results)) = histogram.percentiles(&PERCENTILES)
        {
            for (pct, bucket) in results {
                // bucket upper bound, capped by the exact maximum
                let us = (bucket.end().min(stats.max_ns)) as f64 / 1000.0;
                match pct {
                    p if p == 50.0 => summary.p50_us = us,
                    p if p == 90.0 => summary.p90_us = us,
                    p if p == 99.0 => summary.p99_us = us,
                    p if p == 99.9 => summary.p999_us = us,
                    _ => summary.p9999_us = us,
                }
            }
        }
        summary
    }
}

/// Totals for one side of the run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RoleTotals {
    pub workers: usize,
    pub messages: u64,
    pub errors: u64,
    pub aborted: usize,
    /// Sum of per-worker rates.
    pub throughput: f64,
    /// Mean of per-worker rates.
    pub mean_throughput: f64,
    /// Longest worker duration.
    pub duration_ms: f64,
}

impl RoleTotals {
    fn add(&mut self, result: &WorkerResult) {
        self.workers += 1;
        self.messages += result.messages;
        self.errors += result.errors;
        self.throughput += result.throughput;
        self.duration_ms = self.duration_ms.max(result.duration_ms);
        if result.aborted {
            self.aborted += 1;
        }
        self.mean_throughput = self.throughput / self.workers as f64;
    }
}

/// The aggregated outcome of a run.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub test: TestMode,
    pub broker: BrokerKind,
    pub publishers: RoleTotals,
    pub subscribers: RoleTotals,
    /// Latency across every subscriber.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<LatencySummary>,
    pub workers: Vec<WorkerResult>,
    /// Set when the broker could not be stopped after the run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teardown_error: Option<String>,
}

impl Report {
    /// Fold worker results into a report. Subscriber histograms are merged
    /// so percentiles cover every sample.
    pub fn aggregate(test: TestMode, broker: BrokerKind, mut workers: Vec<WorkerResult>) -> Self {
        workers.sort_by_key(|w| (w.role == Role::Subscriber, w.id));

        let mut publishers = RoleTotals::default();
        let mut subscribers = RoleTotals::default();
        let mut stats = LatencyStats::default();
        let mut merged: Option<Histogram> = None;
        let mut decode_errors = 0;
        let mut receive_errors = 0;
        let mut negative_samples = 0;
        let mut any_latency = false;

        for worker in &workers {
            match worker.role {
                Role::Publisher => publishers.add(worker),
                Role::Subscriber => subscribers.add(worker),
            }
            let Some(latency) = &worker.latency else {
                continue;
            };
            any_latency = true;
            stats.merge(&worker.stats);
            decode_errors += latency.decode_errors;
            receive_errors += latency.receive_errors;
            negative_samples += latency.negative_samples;
            if let Some(histogram) = &worker.histogram {
                merged = match merged {
                    None => Some(histogram.clone()),
                    Some(acc) => match acc.wrapping_add(histogram) {
                        Ok(sum) => Some(sum),
                        Err(e) => {
                            tracing::warn!(worker = worker.id, error = %e, "failed to merge histogram");
                            Some(acc)
                        }
                    },
                };
            }
        }

        let latency = any_latency.then(|| LatencySummary {
            decode_errors,
            receive_errors,
            negative_samples,
            ..LatencySummary::from_parts(&stats, merged.as_ref())
        });

        Self {
            test,
            broker,
            publishers,
            subscribers,
            latency,
            workers,
            teardown_error: None,
        }
    }

    /// True when any worker ended early.
    pub fn incomplete(&self) -> bool {
        self.publishers.aborted > 0 || self.subscribers.aborted > 0
    }
}
