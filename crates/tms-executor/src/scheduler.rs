//! Boundary scheduler.
//!
//! Aligns a prepare-then-fire action to a wall-clock boundary:
//!
//! 1. Coarse wait in short interruptible steps until the boundary is within
//!    the preparation margin.
//! 2. `prepare`: refresh, re-validate the session, fill the form and price.
//! 3. Fine wait, sleeping `min(fine_step, remaining)` so a single sleep can
//!    never overshoot the boundary by more than timer resolution.
//! 4. `fire`.
//!
//! A failed preparation aborts without firing.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tms_core::{BoundaryKind, Clock};
use tms_driver::BoxFuture;
use tms_telemetry::Metrics;
use tracing::{debug, info, warn};

use crate::signals::{Interrupt, Signals, WaitScope};

fn default_prepare_margin_ms() -> u64 {
    2_000
}

fn default_coarse_step_ms() -> u64 {
    100
}

fn default_fine_step_ms() -> u64 {
    10
}

/// Scheduler timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Time reserved before the boundary for preparation (measured refresh
    /// plus form time, plus a pad).
    #[serde(default = "default_prepare_margin_ms")]
    pub prepare_margin_ms: u64,
    #[serde(default = "default_coarse_step_ms")]
    pub coarse_step_ms: u64,
    #[serde(default = "default_fine_step_ms")]
    pub fine_step_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            prepare_margin_ms: default_prepare_margin_ms(),
            coarse_step_ms: default_coarse_step_ms(),
            fine_step_ms: default_fine_step_ms(),
        }
    }
}

impl SchedulerConfig {
    pub fn prepare_margin(&self) -> Duration {
        Duration::from_millis(self.prepare_margin_ms)
    }

    pub fn coarse_step(&self) -> Duration {
        Duration::from_millis(self.coarse_step_ms.max(1))
    }

    pub fn fine_step(&self) -> Duration {
        Duration::from_millis(self.fine_step_ms.max(1))
    }
}

/// The two halves of a boundary action.
pub trait BoundaryTask: Send {
    type Prepared: Send;
    type Fired: Send;
    type Error: Send + std::fmt::Display;

    fn prepare(&mut self) -> BoxFuture<'_, Result<Self::Prepared, Self::Error>>;

    fn fire(&mut self, prepared: Self::Prepared) -> BoxFuture<'_, Self::Fired>;
}

/// How a scheduled boundary ended.
#[derive(Debug)]
pub enum BoundaryOutcome<F, E> {
    Fired(F),
    Interrupted(Interrupt),
    PreparationFailed(E),
}

#[derive(Clone)]
pub struct BoundaryScheduler {
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
}

impl BoundaryScheduler {
    pub fn new(config: SchedulerConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn remaining(&self, target: NaiveDateTime) -> Duration {
        (target - self.clock.now()).to_std().unwrap_or(Duration::ZERO)
    }

    /// Run `task` against the boundary at `target`.
    pub async fn run<T: BoundaryTask>(
        &self,
        target: NaiveDateTime,
        kind: BoundaryKind,
        task: &mut T,
        signals: &Signals,
    ) -> BoundaryOutcome<T::Fired, T::Error> {
        let margin = self.config.prepare_margin();
        info!(
            boundary = %kind,
            target = %target.format("%H:%M:%S%.3f"),
            "Scheduling boundary order"
        );

        // Coarse wait. Refresh also interrupts: the caller handles it and
        // reschedules if the boundary is still ahead.
        loop {
            let remaining = self.remaining(target);
            if remaining <= margin {
                break;
            }
            let step = (remaining - margin).min(self.config.coarse_step());
            if let Some(interrupt) = signals.sleep(step, WaitScope::StopOrRefresh).await {
                info!(?interrupt, boundary = %kind, "Boundary wait interrupted");
                return BoundaryOutcome::Interrupted(interrupt);
            }
        }

        debug!(boundary = %kind, "Within preparation margin");
        let prepared = match task.prepare().await {
            Ok(p) => p,
            Err(e) => {
                warn!(boundary = %kind, error = %e, "Preparation failed, not firing");
                return BoundaryOutcome::PreparationFailed(e);
            }
        };

        // Fine wait. Preparation is done, so only stop aborts from here.
        loop {
            let remaining = self.remaining(target);
            if remaining.is_zero() {
                break;
            }
            let step = remaining.min(self.config.fine_step());
            if let Some(interrupt) = signals.sleep(step, WaitScope::StopOnly).await {
                info!(?interrupt, boundary = %kind, "Stopped before boundary");
                return BoundaryOutcome::Interrupted(interrupt);
            }
        }

        let lateness_ms = (self.clock.now() - target)
            .to_std()
            .map(|d| d.as_secs_f64() * 1000.0)
            .unwrap_or(0.0);
        Metrics::boundary_lateness(&kind.to_string(), lateness_ms);
        info!(boundary = %kind, lateness_ms, "Boundary crossed, firing");

        BoundaryOutcome::Fired(task.fire(prepared).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::{StopReason, MAX_SLEEP_STEP};
    use chrono::NaiveDate;
    use tokio::time::Instant;

    /// Wall clock that follows tokio's (pausable) time.
    struct TokioClock {
        base: NaiveDateTime,
        start: Instant,
    }

    impl TokioClock {
        fn at(h: u32, m: u32, s: u32) -> Arc<Self> {
            Arc::new(Self {
                base: NaiveDate::from_ymd_opt(2026, 2, 9)
                    .unwrap()
                    .and_hms_opt(h, m, s)
                    .unwrap(),
                start: Instant::now(),
            })
        }
    }

    impl Clock for TokioClock {
        fn now(&self) -> NaiveDateTime {
            let elapsed = chrono::Duration::from_std(self.start.elapsed()).unwrap();
            self.base + elapsed
        }
    }

    #[derive(Default)]
    struct RecordingTask {
        clock: Option<Arc<TokioClock>>,
        prepared_at: Option<NaiveDateTime>,
        fired_at: Option<NaiveDateTime>,
        fail_prepare: bool,
    }

    impl BoundaryTask for RecordingTask {
        type Prepared = ();
        type Fired = NaiveDateTime;
        type Error = String;

        fn prepare(&mut self) -> BoxFuture<'_, Result<(), String>> {
            Box::pin(async move {
                let now = self.clock.as_ref().unwrap().now();
                self.prepared_at = Some(now);
                if self.fail_prepare {
                    Err("order form missing".to_string())
                } else {
                    Ok(())
                }
            })
        }

        fn fire(&mut self, _prepared: ()) -> BoxFuture<'_, NaiveDateTime> {
            Box::pin(async move {
                let now = self.clock.as_ref().unwrap().now();
                self.fired_at = Some(now);
                now
            })
        }
    }

    fn boundary() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 2, 9)
            .unwrap()
            .and_hms_opt(11, 0, 0)
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_prepares_within_margin_and_fires_at_boundary() {
        let clock = TokioClock::at(10, 59, 50);
        let scheduler = BoundaryScheduler::new(SchedulerConfig::default(), clock.clone());
        let mut task = RecordingTask {
            clock: Some(clock),
            ..Default::default()
        };

        let outcome = scheduler
            .run(boundary(), BoundaryKind::Continuous, &mut task, &Signals::new())
            .await;

        let fired_at = match outcome {
            BoundaryOutcome::Fired(at) => at,
            other => panic!("unexpected outcome: {other:?}"),
        };
        let prepared_at = task.prepared_at.unwrap();
        let lead = boundary() - prepared_at;
        assert!(lead <= chrono::Duration::milliseconds(2_000));
        assert!(lead > chrono::Duration::milliseconds(1_800));

        // Never early, and late by at most timer resolution.
        assert!(fired_at >= boundary());
        assert!(fired_at - boundary() <= chrono::Duration::milliseconds(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_preparation_never_fires() {
        let clock = TokioClock::at(10, 59, 59);
        let scheduler = BoundaryScheduler::new(SchedulerConfig::default(), clock.clone());
        let mut task = RecordingTask {
            clock: Some(clock),
            fail_prepare: true,
            ..Default::default()
        };

        let outcome = scheduler
            .run(boundary(), BoundaryKind::Continuous, &mut task, &Signals::new())
            .await;

        assert!(matches!(outcome, BoundaryOutcome::PreparationFailed(_)));
        assert!(task.prepared_at.is_some());
        assert!(task.fired_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_coarse_wait_returns_within_one_step() {
        let clock = TokioClock::at(10, 50, 0);
        let scheduler = BoundaryScheduler::new(SchedulerConfig::default(), clock.clone());
        let mut task = RecordingTask {
            clock: Some(clock),
            ..Default::default()
        };
        let signals = Signals::new();
        let setter = signals.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            setter.request_stop(StopReason::Operator);
        });

        let start = Instant::now();
        let outcome = scheduler
            .run(boundary(), BoundaryKind::Continuous, &mut task, &signals)
            .await;

        assert!(matches!(outcome, BoundaryOutcome::Interrupted(Interrupt::Stop)));
        assert!(start.elapsed() <= Duration::from_secs(30) + MAX_SLEEP_STEP);
        assert!(task.prepared_at.is_none());
        assert!(task.fired_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_interrupts_coarse_wait() {
        let clock = TokioClock::at(10, 59, 0);
        let scheduler = BoundaryScheduler::new(SchedulerConfig::default(), clock.clone());
        let mut task = RecordingTask {
            clock: Some(clock),
            ..Default::default()
        };
        let signals = Signals::new();
        signals.request_refresh();

        let outcome = scheduler
            .run(boundary(), BoundaryKind::Continuous, &mut task, &signals)
            .await;
        assert!(matches!(
            outcome,
            BoundaryOutcome::Interrupted(Interrupt::Refresh)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_boundary_fires_immediately() {
        let clock = TokioClock::at(11, 0, 1);
        let scheduler = BoundaryScheduler::new(SchedulerConfig::default(), clock.clone());
        let mut task = RecordingTask {
            clock: Some(clock),
            ..Default::default()
        };

        let start = Instant::now();
        let outcome = scheduler
            .run(boundary(), BoundaryKind::Continuous, &mut task, &Signals::new())
            .await;
        assert!(matches!(outcome, BoundaryOutcome::Fired(_)));
        assert!(start.elapsed() < Duration::from_millis(1));
    }
}
