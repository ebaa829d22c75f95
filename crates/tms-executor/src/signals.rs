//! Stop and refresh signals shared between the control loop and the
//! interrupt listener.
//!
//! The listener only ever sets flags. Every wait in the executor goes through
//! [`Signals::sleep`], which re-checks the flags at least every
//! [`MAX_SLEEP_STEP`] and wakes immediately when the stop token fires.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Upper bound on any single uninterrupted sleep.
pub const MAX_SLEEP_STEP: Duration = Duration::from_millis(100);

/// Why the stop flag was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The configured run duration elapsed.
    Deadline,
    /// Operator interrupt (Ctrl+C).
    Operator,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deadline => write!(f, "deadline"),
            Self::Operator => write!(f, "operator"),
        }
    }
}

/// What cut a wait short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Stop,
    Refresh,
}

/// Which flags a wait honours. Waits past the boundary ignore refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitScope {
    StopOnly,
    StopOrRefresh,
}

#[derive(Debug)]
struct Inner {
    stop: CancellationToken,
    stop_reason: Mutex<Option<StopReason>>,
    refresh: AtomicBool,
}

/// Cloneable handle to the shared flags.
#[derive(Debug, Clone)]
pub struct Signals {
    inner: Arc<Inner>,
}

impl Default for Signals {
    fn default() -> Self {
        Self::new()
    }
}

impl Signals {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                stop: CancellationToken::new(),
                stop_reason: Mutex::new(None),
                refresh: AtomicBool::new(false),
            }),
        }
    }

    /// Raise the stop flag. The first reason wins; later calls are no-ops.
    pub fn request_stop(&self, reason: StopReason) {
        let mut guard = self.inner.stop_reason.lock();
        if guard.is_some() {
            return;
        }
        *guard = Some(reason);
        drop(guard);

        warn!(reason = %reason, "Stop requested");
        self.inner.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stop.is_cancelled()
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        *self.inner.stop_reason.lock()
    }

    pub fn request_refresh(&self) {
        if !self.inner.refresh.swap(true, Ordering::SeqCst) {
            info!("Refresh requested");
        }
    }

    pub fn is_refresh_requested(&self) -> bool {
        self.inner.refresh.load(Ordering::SeqCst)
    }

    /// Start a new refresh episode.
    pub fn clear_refresh(&self) {
        self.inner.refresh.store(false, Ordering::SeqCst);
    }

    /// Pending interrupt under `scope`, stop taking precedence.
    pub fn check(&self, scope: WaitScope) -> Option<Interrupt> {
        if self.is_stopped() {
            Some(Interrupt::Stop)
        } else if scope == WaitScope::StopOrRefresh && self.is_refresh_requested() {
            Some(Interrupt::Refresh)
        } else {
            None
        }
    }

    /// The process-wide stop token.
    pub fn stop_token(&self) -> &CancellationToken {
        &self.inner.stop
    }

    /// A token cancelled with stop, or earlier by its owner.
    pub fn child_token(&self) -> CancellationToken {
        self.inner.stop.child_token()
    }

    /// Sleep for `duration` unless interrupted.
    pub async fn sleep(&self, duration: Duration, scope: WaitScope) -> Option<Interrupt> {
        self.sleep_until(Instant::now() + duration, scope).await
    }

    /// Sleep until `deadline` unless interrupted. Returns `None` when the
    /// deadline was reached.
    pub async fn sleep_until(&self, deadline: Instant, scope: WaitScope) -> Option<Interrupt> {
        loop {
            if let Some(interrupt) = self.check(scope) {
                return Some(interrupt);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let step = (deadline - now).min(MAX_SLEEP_STEP);

            tokio::select! {
                _ = self.inner.stop.cancelled() => return Some(Interrupt::Stop),
                _ = tokio::time::sleep(step) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_stop_reason_wins() {
        let signals = Signals::new();
        assert!(signals.stop_reason().is_none());

        signals.request_stop(StopReason::Deadline);
        signals.request_stop(StopReason::Operator);

        assert!(signals.is_stopped());
        assert_eq!(signals.stop_reason(), Some(StopReason::Deadline));
    }

    #[test]
    fn test_check_scopes() {
        let signals = Signals::new();
        signals.request_refresh();
        assert_eq!(signals.check(WaitScope::StopOnly), None);
        assert_eq!(
            signals.check(WaitScope::StopOrRefresh),
            Some(Interrupt::Refresh)
        );

        signals.clear_refresh();
        assert_eq!(signals.check(WaitScope::StopOrRefresh), None);

        signals.request_refresh();
        signals.request_stop(StopReason::Operator);
        assert_eq!(signals.check(WaitScope::StopOrRefresh), Some(Interrupt::Stop));
    }

    #[test]
    fn test_child_token_follows_stop() {
        let signals = Signals::new();
        let child = signals.child_token();
        child.cancel();
        assert!(!signals.is_stopped());

        let child = signals.child_token();
        signals.request_stop(StopReason::Operator);
        assert!(child.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_runs_to_deadline() {
        let signals = Signals::new();
        let start = Instant::now();
        let result = signals
            .sleep(Duration::from_millis(450), WaitScope::StopOrRefresh)
            .await;
        assert_eq!(result, None);
        assert!(start.elapsed() >= Duration::from_millis(450));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_wakes_sleep_within_one_step() {
        let signals = Signals::new();
        let setter = signals.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1_230)).await;
            setter.request_stop(StopReason::Operator);
        });

        let start = Instant::now();
        let result = signals
            .sleep(Duration::from_secs(60), WaitScope::StopOnly)
            .await;
        assert_eq!(result, Some(Interrupt::Stop));
        assert!(start.elapsed() < Duration::from_millis(1_230) + MAX_SLEEP_STEP);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_only_interrupts_refresh_scope() {
        let signals = Signals::new();
        let setter = signals.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            setter.request_refresh();
        });

        let result = signals
            .sleep(Duration::from_secs(1), WaitScope::StopOnly)
            .await;
        assert_eq!(result, None);
        assert!(signals.is_refresh_requested());

        let result = signals
            .sleep(Duration::from_secs(1), WaitScope::StopOrRefresh)
            .await;
        assert_eq!(result, Some(Interrupt::Refresh));
    }
}
