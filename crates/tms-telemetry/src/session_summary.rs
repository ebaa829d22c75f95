//! End-of-run order summary.
//!
//! Reads the order counters and the ack latency histogram back from the
//! Prometheus registry and logs a short report at shutdown.

use crate::metrics::{ACK_LATENCY_MS, ORDERS_TOTAL, ORDER_ATTEMPTS_TOTAL};
use chrono::{DateTime, Local};
use prometheus::core::Collector;
use serde::Serialize;
use tracing::info;

const STATUSES: [&str; 3] = ["SUCCESS", "FAILED", "FORM_FILLED"];
const MODES: [&str; 3] = ["BOUNDARY", "CONTINUOUS", "FORM_ONLY"];

/// Totals for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSummary {
    pub successful: u64,
    pub failed: u64,
    pub form_filled: u64,
    pub attempts: u64,
    pub ack_latency_p50_ms: f64,
    pub ack_latency_p95_ms: f64,
}

/// Session summary reporter.
///
/// Counters are process-wide, so the reporter snapshots them on creation and
/// reports the difference.
pub struct SessionSummaryReporter {
    baseline: SessionSummary,
    start_time: DateTime<Local>,
}

impl Default for SessionSummaryReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionSummaryReporter {
    pub fn new() -> Self {
        Self {
            baseline: Self::totals(),
            start_time: Local::now(),
        }
    }

    fn status_total(status: &str) -> u64 {
        MODES
            .iter()
            .map(|mode| ORDERS_TOTAL.with_label_values(&[status, mode]).get() as u64)
            .sum()
    }

    fn totals() -> SessionSummary {
        let attempts = ["BOUNDARY", "CONTINUOUS"]
            .iter()
            .map(|mode| ORDER_ATTEMPTS_TOTAL.with_label_values(&[mode]).get() as u64)
            .sum();
        let (p50, p95) = ack_latency_percentiles();
        SessionSummary {
            successful: Self::status_total(STATUSES[0]),
            failed: Self::status_total(STATUSES[1]),
            form_filled: Self::status_total(STATUSES[2]),
            attempts,
            ack_latency_p50_ms: p50,
            ack_latency_p95_ms: p95,
        }
    }

    /// Totals since this reporter was created. Latency percentiles cover the
    /// whole process.
    pub fn summary(&self) -> SessionSummary {
        let now = Self::totals();
        SessionSummary {
            successful: now.successful.saturating_sub(self.baseline.successful),
            failed: now.failed.saturating_sub(self.baseline.failed),
            form_filled: now.form_filled.saturating_sub(self.baseline.form_filled),
            attempts: now.attempts.saturating_sub(self.baseline.attempts),
            ack_latency_p50_ms: now.ack_latency_p50_ms,
            ack_latency_p95_ms: now.ack_latency_p95_ms,
        }
    }

    /// Log the summary.
    pub fn output_summary(&self) -> SessionSummary {
        let s = self.summary();
        let duration = Local::now() - self.start_time;

        info!("========== Session Summary ==========");
        info!(
            "Period: {} ({} hours {} minutes)",
            self.start_time.format("%Y-%m-%d %H:%M:%S"),
            duration.num_hours(),
            duration.num_minutes() % 60
        );
        info!("  Successful orders: {}", s.successful);
        info!("  Failed orders: {}", s.failed);
        info!("  Forms filled: {}", s.form_filled);
        info!("  Submit attempts: {}", s.attempts);
        info!(
            "  Ack latency (ms): P50={:.1}, P95={:.1}",
            s.ack_latency_p50_ms, s.ack_latency_p95_ms
        );
        info!("=====================================");
        s
    }
}

/// (p50, p95) across every label of the ack latency histogram.
fn ack_latency_percentiles() -> (f64, f64) {
    let mut merged: Vec<(f64, u64)> = Vec::new();
    let mut total = 0u64;

    for mf in ACK_LATENCY_MS.collect() {
        for m in mf.get_metric() {
            let h = m.get_histogram();
            total += h.get_sample_count();
            for (i, bucket) in h.get_bucket().iter().enumerate() {
                match merged.get_mut(i) {
                    Some(slot) => slot.1 += bucket.get_cumulative_count(),
                    None => merged.push((bucket.get_upper_bound(), bucket.get_cumulative_count())),
                }
            }
        }
    }

    if total == 0 {
        return (0.0, 0.0);
    }
    (
        percentile_from_buckets(&merged, total, 0.50),
        percentile_from_buckets(&merged, total, 0.95),
    )
}

/// Linear interpolation inside the first bucket that covers `percentile`.
fn percentile_from_buckets(buckets: &[(f64, u64)], total_count: u64, percentile: f64) -> f64 {
    let target = (total_count as f64 * percentile).ceil() as u64;
    let mut prev_bound = 0.0;
    let mut prev_count = 0u64;

    for &(upper_bound, cumulative_count) in buckets {
        if cumulative_count >= target {
            let bucket_count = cumulative_count - prev_count;
            if bucket_count == 0 {
                return upper_bound;
            }
            let position = (target - prev_count) as f64 / bucket_count as f64;
            return prev_bound + position * (upper_bound - prev_bound);
        }
        prev_bound = upper_bound;
        prev_count = cumulative_count;
    }

    buckets.last().map(|b| b.0).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;

    #[test]
    fn test_summary_counts_since_creation() {
        Metrics::order_outcome("SUCCESS", "BOUNDARY");
        let reporter = SessionSummaryReporter::new();

        Metrics::order_outcome("SUCCESS", "CONTINUOUS");
        Metrics::order_outcome("FORM_FILLED", "FORM_ONLY");
        Metrics::order_attempt("CONTINUOUS");

        // Other tests share the registry, so only lower bounds are exact.
        let s = reporter.output_summary();
        assert!(s.successful >= 1);
        assert!(s.form_filled >= 1);
        assert!(s.attempts >= 1);
    }

    #[test]
    fn test_percentile_from_buckets() {
        let buckets = [(10.0, 50), (20.0, 100)];
        assert_eq!(percentile_from_buckets(&buckets, 100, 0.50), 10.0);
        assert_eq!(percentile_from_buckets(&buckets, 100, 0.75), 15.0);
        assert_eq!(percentile_from_buckets(&[], 0, 0.5), 0.0);
    }
}
