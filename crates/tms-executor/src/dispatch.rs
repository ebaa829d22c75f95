//! Paced dispatch/retry loop.
//!
//! Attempt times come from a [`PacingSchedule`] anchored at the loop start,
//! so a slow attempt does not shift the cadence of the ones after it. Every
//! driver error is transient here; only stop or an exhausted budget ends
//! the loop early. At most one success is reported per call.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tms_core::OrderMode;
use tms_driver::{BoxFuture, DriverResult};
use tms_telemetry::{LatencyProfiler, Metrics};
use tracing::{debug, info, warn};

use crate::signals::{Signals, WaitScope};

/// Below this the wait spins instead of sleeping.
const SPIN_THRESHOLD: Duration = Duration::from_millis(1);

fn default_max_attempts() -> u32 {
    32_768
}

fn default_interval_us() -> u64 {
    250
}

fn default_confirm_timeout_ms() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Pacing interval between attempt start times.
    #[serde(default = "default_interval_us")]
    pub interval_us: u64,
    /// How long to poll for a confirmation after each attempt.
    #[serde(default = "default_confirm_timeout_ms")]
    pub confirm_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval_us: default_interval_us(),
            confirm_timeout_ms: default_confirm_timeout_ms(),
        }
    }
}

impl DispatchConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_micros(self.interval_us)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }
}

/// Attempt instants `start + i * interval`.
#[derive(Debug, Clone)]
pub struct PacingSchedule {
    start: Instant,
    interval: Duration,
    index: u32,
}

impl PacingSchedule {
    pub fn new(start: Instant, interval: Duration) -> Self {
        Self {
            start,
            interval,
            index: 0,
        }
    }
}

impl Iterator for PacingSchedule {
    type Item = Instant;

    fn next(&mut self) -> Option<Instant> {
        let at = self.start.checked_add(self.interval.checked_mul(self.index)?)?;
        self.index = self.index.checked_add(1)?;
        Some(at)
    }
}

/// The order-entry side of the loop.
pub trait DispatchTarget: Send + Sync {
    /// One submission (the buy click).
    fn attempt(&self) -> BoxFuture<'_, DriverResult<()>>;

    /// Whether the server acknowledged the order within `timeout`.
    fn confirmed(&self, timeout: Duration) -> BoxFuture<'_, DriverResult<bool>>;

    /// Best-effort dismissal of confirmation dialogs.
    fn dismiss_dialogs(&self) -> BoxFuture<'_, ()>;
}

/// Result of one dispatch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub attempts: u32,
    pub success: bool,
    /// Stop was observed before success or budget exhaustion.
    pub cancelled: bool,
}

/// Wait until `at`, sleeping for the bulk and spinning the last stretch.
/// Returns false if stop was requested.
async fn wait_until(at: Instant, signals: &Signals) -> bool {
    let now = Instant::now();
    if at > now {
        let remaining = at - now;
        if remaining > SPIN_THRESHOLD
            && signals
                .sleep(remaining - SPIN_THRESHOLD, WaitScope::StopOnly)
                .await
                .is_some()
        {
            return false;
        }
        while Instant::now() < at {
            if signals.is_stopped() {
                return false;
            }
            std::hint::spin_loop();
        }
    }
    !signals.is_stopped()
}

/// Run the paced attempt loop against `target`.
///
/// The latency start mark is set on the first attempt and the end mark on
/// confirmation; a sample left half-set by a failed loop is discarded.
pub async fn dispatch<T: DispatchTarget + ?Sized>(
    target: &T,
    config: &DispatchConfig,
    signals: &Signals,
    profiler: &mut LatencyProfiler,
    mode: OrderMode,
) -> DispatchReport {
    let label = mode.as_str();
    let schedule = PacingSchedule::new(Instant::now(), config.interval());
    let mut report = DispatchReport {
        attempts: 0,
        success: false,
        cancelled: false,
    };

    for at in schedule.take(config.max_attempts as usize) {
        if !wait_until(at, signals).await {
            report.cancelled = true;
            break;
        }

        if report.attempts == 0 {
            profiler.mark_start();
        }
        report.attempts += 1;
        Metrics::order_attempt(label);

        if let Err(e) = target.attempt().await {
            if e.is_transient() {
                debug!(attempt = report.attempts, error = %e, "Transient submit error");
            } else {
                warn!(attempt = report.attempts, error = %e, "Submit error, retrying");
            }
            continue;
        }

        match target.confirmed(config.confirm_timeout()).await {
            Ok(true) => {
                profiler.mark_end();
                profiler.flush(label);
                report.success = true;
                info!(attempts = report.attempts, mode = label, "Order confirmed");
                return report;
            }
            Ok(false) => {}
            Err(e) => debug!(attempt = report.attempts, error = %e, "Confirmation check failed"),
        }

        target.dismiss_dialogs().await;
    }

    // Drop a start mark with no matching end.
    profiler.flush(label);

    if report.cancelled {
        info!(attempts = report.attempts, mode = label, "Dispatch stopped");
    } else {
        warn!(attempts = report.attempts, mode = label, "Attempt budget exhausted");
    }
    report
}
