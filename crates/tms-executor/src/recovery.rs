//! Session recovery state machine.
//!
//! ```text
//!            probe ok                    probe fails
//!   AUTHENTICATED_ON_ORDER_PAGE ───────────────────────► EXPIRED
//!            ▲                                             │ refresh, login,
//!            └─────────────── recovered ◄──────────────────┘ navigate
//!                                                          ▲
//!   DRIVER_UNAVAILABLE ── recreate browser ────────────────┘
//! ```
//!
//! A browser that keeps disappearing after `max_driver_restarts` consecutive
//! recreations is fatal. Everything else is reported as `NotReady` and the
//! caller retries after [`SessionRecovery::backoff`].

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tms_driver::{
    wait_for_element, AuthError, Authenticator, BoxFuture, DriverError, DriverResult, Locator,
    UiDriver,
};
use tms_telemetry::Metrics;
use tracing::{debug, info, warn};

use crate::error::{RecoveryError, RecoveryResult};
use crate::signals::Signals;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AuthenticatedOnOrderPage,
    Expired,
    DriverUnavailable,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthenticatedOnOrderPage => "authenticated_on_order_page",
            Self::Expired => "expired",
            Self::DriverUnavailable => "driver_unavailable",
        }
    }
}

fn default_probe_timeout_ms() -> u64 {
    500
}

fn default_order_page_timeout_ms() -> u64 {
    10_000
}

fn default_max_driver_restarts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    1_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Liveness probe timeout for the session marker.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// How long to wait for the order page after navigating.
    #[serde(default = "default_order_page_timeout_ms")]
    pub order_page_timeout_ms: u64,
    #[serde(default = "default_max_driver_restarts")]
    pub max_driver_restarts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: default_probe_timeout_ms(),
            order_page_timeout_ms: default_order_page_timeout_ms(),
            max_driver_restarts: default_max_driver_restarts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

/// Where a recovery step failed.
enum StepError {
    Driver(DriverError),
    Auth(AuthError),
    OrderPage,
    Stopped,
}

impl From<DriverError> for StepError {
    fn from(e: DriverError) -> Self {
        Self::Driver(e)
    }
}

impl StepError {
    fn is_unavailable(&self) -> bool {
        match self {
            Self::Driver(e) | Self::Auth(AuthError::Driver(e)) => e.is_unavailable(),
            _ => false,
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Driver(e) => e.to_string(),
            Self::Auth(e) => e.to_string(),
            Self::OrderPage => "order page did not load".to_string(),
            Self::Stopped => "stop requested".to_string(),
        }
    }
}

/// Page markers the probe looks for.
#[derive(Debug, Clone)]
pub struct SessionMarkers {
    /// Present in any authenticated page.
    pub session: Locator,
    /// Present on the order entry page.
    pub order_page: Locator,
}

pub struct SessionRecovery {
    driver: Arc<dyn UiDriver>,
    auth: Arc<dyn Authenticator>,
    markers: SessionMarkers,
    order_url: String,
    config: RecoveryConfig,
    state: SessionState,
    consecutive_restarts: u32,
}

impl SessionRecovery {
    pub fn new(
        driver: Arc<dyn UiDriver>,
        auth: Arc<dyn Authenticator>,
        markers: SessionMarkers,
        order_url: impl Into<String>,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            driver,
            auth,
            markers,
            order_url: order_url.into(),
            config,
            // Nothing is known about a fresh browser.
            state: SessionState::Expired,
            consecutive_restarts: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.config.backoff_ms)
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!(from = self.state.as_str(), to = state.as_str(), "Session state change");
        }
        self.state = state;
        Metrics::session_state_set(state.as_str());
    }

    /// Record a driver loss seen outside recovery.
    pub fn mark_driver_unavailable(&mut self) {
        self.set_state(SessionState::DriverUnavailable);
    }

    /// Record a driver error seen outside recovery; only a lost browser
    /// changes state.
    pub fn observe_driver_error(&mut self, error: &DriverError) {
        if error.is_unavailable() {
            self.mark_driver_unavailable();
        }
    }

    /// Bring the session to `AUTHENTICATED_ON_ORDER_PAGE`, or explain why not.
    pub async fn ensure_ready(&mut self, signals: &Signals) -> RecoveryResult<()> {
        if signals.is_stopped() {
            return Err(RecoveryError::Cancelled);
        }

        let was = self.state;
        match self.recover(signals).await {
            Ok(()) => {
                if was != SessionState::AuthenticatedOnOrderPage {
                    info!(from = was.as_str(), "Session recovered");
                    Metrics::recovery("recovered");
                }
                self.consecutive_restarts = 0;
                self.set_state(SessionState::AuthenticatedOnOrderPage);
                Ok(())
            }
            Err(StepError::Auth(AuthError::Cancelled) | StepError::Stopped) => {
                Err(RecoveryError::Cancelled)
            }
            Err(e) if e.is_unavailable() => {
                self.set_state(SessionState::DriverUnavailable);
                if self.consecutive_restarts >= self.config.max_driver_restarts {
                    warn!(restarts = self.consecutive_restarts, "Browser unrecoverable");
                    Metrics::recovery("driver_lost");
                    return Err(RecoveryError::DriverLost {
                        restarts: self.consecutive_restarts,
                    });
                }
                warn!(error = %e.describe(), "Browser unavailable, will recreate");
                Metrics::recovery("failed");
                Err(RecoveryError::NotReady(e.describe()))
            }
            Err(e) => {
                self.set_state(SessionState::Expired);
                warn!(error = %e.describe(), backoff_ms = self.config.backoff_ms, "Session recovery failed");
                Metrics::recovery("failed");
                Err(RecoveryError::NotReady(e.describe()))
            }
        }
    }

    async fn recover(&mut self, signals: &Signals) -> Result<(), StepError> {
        let probe = Duration::from_millis(self.config.probe_timeout_ms);

        if self.state == SessionState::DriverUnavailable {
            self.consecutive_restarts += 1;
            info!(attempt = self.consecutive_restarts, "Recreating browser session");
            until_stopped(signals, self.driver.recreate_session()).await?;
            self.set_state(SessionState::Expired);
        }

        if self.wait_for(&self.markers.session, probe, signals).await? {
            if self.wait_for(&self.markers.order_page, probe, signals).await? {
                return Ok(());
            }
            debug!("Authenticated but off the order page");
            return self.open_order_page(signals).await;
        }

        if self.state == SessionState::AuthenticatedOnOrderPage {
            warn!("Session marker missing, session expired");
        }
        self.set_state(SessionState::Expired);

        // A refresh alone sometimes restores a stale view.
        until_stopped(signals, self.driver.refresh_page()).await?;
        if !self.wait_for(&self.markers.session, probe, signals).await? {
            info!("Re-authenticating");
            self.auth
                .login(self.driver.as_ref(), signals.stop_token())
                .await
                .map_err(StepError::Auth)?;
        }
        self.open_order_page(signals).await
    }

    async fn open_order_page(&self, signals: &Signals) -> Result<(), StepError> {
        until_stopped(signals, self.driver.navigate(&self.order_url)).await?;
        let timeout = Duration::from_millis(self.config.order_page_timeout_ms);
        if self.wait_for(&self.markers.order_page, timeout, signals).await? {
            Ok(())
        } else {
            Err(StepError::OrderPage)
        }
    }

    async fn wait_for(
        &self,
        locator: &Locator,
        timeout: Duration,
        signals: &Signals,
    ) -> Result<bool, StepError> {
        wait_for_element(self.driver.as_ref(), locator, timeout, signals.stop_token())
            .await?
            .ok_or(StepError::Stopped)
    }
}

/// Run one driver call, abandoning it if a stop arrives first.
async fn until_stopped<T>(
    signals: &Signals,
    step: BoxFuture<'_, DriverResult<T>>,
) -> Result<T, StepError> {
    tokio::select! {
        _ = signals.stop_token().cancelled() => Err(StepError::Stopped),
        result = step => Ok(result?),
    }
}
