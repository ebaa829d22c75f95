//! Application wiring and the automation loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use tms_core::{Clock, ExchangeClock, OrderMode, SessionClock, TradingPhase};
use tms_driver::{
    Authenticator, CaptchaMode, CaptchaSolver, Credentials, Diagnostics, FileDiagnostics,
    FormLogin, TwoCaptchaSolver, UiDriver, W3cDriver,
};
use tms_executor::{
    BoundaryScheduler, OrderError, OrderPage, OrderTrader, PriceEngine, SessionRecovery, Signals,
    TraderParts, WaitScope,
};
use tms_persistence::{JsonFileStateStore, JsonlOrderLog, OrderLog, StateStore};
use tms_telemetry::{LatencyProfiler, SessionSummaryReporter};
use tracing::{debug, info, warn};

use crate::config::{AppConfig, RefreshMode};
use crate::error::{AppError, AppResult};
use crate::listener;

/// How `run_automation` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutomationExit {
    /// The run duration elapsed.
    Completed,
    /// Operator stop.
    Stopped,
}

/// Everything the application talks to outside its own process.
pub struct Collaborators {
    pub driver: Arc<dyn UiDriver>,
    pub auth: Arc<dyn Authenticator>,
    pub clock: Arc<dyn Clock>,
    pub state_store: Arc<dyn StateStore>,
    pub order_log: Arc<dyn OrderLog>,
    pub diagnostics: Arc<dyn Diagnostics>,
    pub profiler: LatencyProfiler,
}

pub struct Application {
    config: AppConfig,
    clock: Arc<dyn Clock>,
    session: SessionClock,
    driver: Arc<dyn UiDriver>,
    trader: OrderTrader,
    signals: Signals,
    summary: SessionSummaryReporter,
    last_idle_target: Option<NaiveDateTime>,
}

impl Application {
    /// Connect to the browser and build the production collaborators.
    pub async fn connect(config: AppConfig) -> AppResult<Self> {
        let clock: Arc<dyn Clock> = Arc::new(ExchangeClock::with_offset_minutes(
            config.session.utc_offset_minutes,
        ));
        let credentials = Credentials::from_env().ok_or_else(|| {
            AppError::Config("TMS_USERNAME and TMS_PASSWORD must be set".to_string())
        })?;

        info!(url = %config.driver.webdriver.webdriver_url, "Connecting to WebDriver");
        let driver: Arc<dyn UiDriver> =
            Arc::new(W3cDriver::connect(config.driver.webdriver.clone()).await?);
        let diagnostics: Arc<dyn Diagnostics> =
            Arc::new(FileDiagnostics::new(&config.persistence.screenshot_dir));

        let solver: Option<Arc<dyn CaptchaSolver>> = match config.auth.captcha_mode {
            CaptchaMode::Manual => None,
            CaptchaMode::Auto => match TwoCaptchaSolver::from_env() {
                Some(Ok(solver)) => Some(Arc::new(solver) as Arc<dyn CaptchaSolver>),
                Some(Err(e)) => {
                    warn!(error = %e, "Captcha solver unavailable, falling back to manual");
                    None
                }
                None => {
                    warn!("TWO_CAPTCHA_API_KEY not set, captcha will be manual");
                    None
                }
            },
        };
        let auth = FormLogin::new(
            &config.driver.login_url,
            config.locators.login_locators(),
            credentials,
            diagnostics.clone(),
        )
        .with_captcha(config.auth.captcha_mode, solver)
        .with_captcha_wait(Duration::from_secs(config.auth.captcha_wait_secs))
        .with_probe_timeout(Duration::from_millis(config.recovery.probe_timeout_ms));

        let collaborators = Collaborators {
            driver,
            auth: Arc::new(auth),
            clock: clock.clone(),
            state_store: Arc::new(JsonFileStateStore::new(&config.persistence.state_dir)?),
            order_log: Arc::new(JsonlOrderLog::new(&config.persistence.order_log_dir)),
            diagnostics,
            profiler: LatencyProfiler::new(&config.persistence.latency_log_dir, clock),
        };
        Self::with_collaborators(config, collaborators)
    }

    /// Build the application around the given collaborators.
    pub fn with_collaborators(config: AppConfig, c: Collaborators) -> AppResult<Self> {
        config.validate()?;
        let session = SessionClock::new(config.session.clone())?;
        let today = c.clock.now().date();

        let engine = PriceEngine::load(
            c.state_store,
            config.order.symbol.clone(),
            config.pricing.clone(),
            today,
        )?;
        let page = OrderPage::new(
            c.driver.clone(),
            config.locators.order_locators(),
            config.order.symbol.clone(),
            config.order.quantity,
        );
        let recovery = SessionRecovery::new(
            c.driver.clone(),
            c.auth,
            config.locators.session_markers(),
            config.driver.order_url.clone(),
            config.recovery.clone(),
        );
        let trader = OrderTrader::new(TraderParts {
            driver: c.driver.clone(),
            page,
            engine,
            recovery,
            scheduler: BoundaryScheduler::new(config.scheduler.clone(), c.clock.clone()),
            dispatch: config.dispatch.clone(),
            profiler: c.profiler,
            order_log: c.order_log,
            diagnostics: c.diagnostics,
            clock: c.clock.clone(),
            session: session.clone(),
        });

        info!(
            symbol = %config.order.symbol,
            quantity = %config.order.quantity,
            circuit_pct = %config.pricing.circuit_pct,
            form_filling = config.automation.form_filling,
            refresh_mode = ?config.automation.refresh_mode,
            "Application initialized"
        );

        Ok(Self {
            config,
            clock: c.clock,
            session,
            driver: c.driver,
            trader,
            signals: Signals::new(),
            summary: SessionSummaryReporter::new(),
            last_idle_target: None,
        })
    }

    /// Handle for the interrupt listener.
    pub fn signals(&self) -> Signals {
        self.signals.clone()
    }

    pub fn trader(&self) -> &OrderTrader {
        &self.trader
    }

    /// Run until `duration` elapses or a stop is requested, then release
    /// the browser.
    pub async fn run_automation(&mut self, duration: Duration) -> AppResult<AutomationExit> {
        info!(hours = duration.as_secs_f64() / 3600.0, "Starting automation");
        let deadline = listener::spawn_deadline(self.signals.clone(), duration);

        let result = self.automation_loop().await;

        deadline.abort();
        if let Err(e) = self.driver.quit().await {
            warn!(error = %e, "Browser quit failed");
        }
        self.summary.output_summary();
        info!(
            successful_orders = self.trader.successful_orders(),
            "Automation finished"
        );

        result?;
        Ok(match self.signals.stop_reason() {
            Some(tms_executor::StopReason::Operator) => AutomationExit::Stopped,
            _ => AutomationExit::Completed,
        })
    }

    async fn automation_loop(&mut self) -> AppResult<()> {
        while !self.signals.is_stopped() {
            if self.signals.is_refresh_requested() {
                self.signals.clear_refresh();
                self.handle_refresh().await?;
                continue;
            }

            let now = self.clock.now();
            let done = self.trader.done_for_today();

            if !done {
                if let Some((target, kind)) = self.session.pending_boundary(now) {
                    self.last_idle_target = None;
                    match self.trader.run_boundary(target, kind, &self.signals).await {
                        Ok(Some(outcome)) => info!(
                            boundary = %kind,
                            success = outcome.success,
                            attempts = outcome.attempt_count,
                            "Boundary order finished"
                        ),
                        Ok(None) => {}
                        Err(e) => self.absorb(e).await?,
                    }
                    continue;
                }
            }

            match self.trader.ensure_session(&self.signals).await {
                Ok(()) => {}
                Err(e) => {
                    self.absorb(e).await?;
                    continue;
                }
            }

            let phase = self.session.current_phase(now);
            if phase.is_trading() && !done {
                self.last_idle_target = None;
                self.back_to_back(phase).await?;
                continue;
            }

            if self.config.automation.form_filling && !phase.is_trading() {
                match self.trader.place_order(OrderMode::FormOnly, &self.signals).await {
                    Ok(_) => {}
                    Err(e) => self.absorb(e).await?,
                }
            }
            self.idle(now).await;
        }
        Ok(())
    }

    /// Orders one after another while `phase` lasts.
    async fn back_to_back(&mut self, phase: TradingPhase) -> AppResult<()> {
        info!(phase = %phase, "Back-to-back ordering");
        loop {
            if self.signals.check(WaitScope::StopOrRefresh).is_some() {
                return Ok(());
            }
            let now = self.clock.now();
            if self.session.current_phase(now) != phase {
                info!(phase = %phase, "Trading window ended");
                return Ok(());
            }

            match self
                .trader
                .place_order(OrderMode::Continuous, &self.signals)
                .await
            {
                Ok(outcome) if outcome.success && outcome.at_circuit => {
                    info!(price = ?outcome.price_used.map(|p| p.to_string()), "Circuit-level order placed");
                    return Ok(());
                }
                Ok(_) => {}
                Err(OrderError::Preparation(_)) => {
                    // Row written; try again after a short pause.
                    self.back_off().await;
                }
                Err(e) => {
                    self.absorb(e).await?;
                    return Ok(());
                }
            }

            let wait = self.config.automation.next_order_wait();
            if !wait.is_zero() {
                self.signals.sleep(wait, WaitScope::StopOrRefresh).await;
            }
        }
    }

    async fn handle_refresh(&mut self) -> AppResult<()> {
        info!(mode = ?self.config.automation.refresh_mode, "Refreshing");
        if let Err(e) = self.trader.refresh_and_revalidate(&self.signals).await {
            return self.absorb(e).await;
        }

        let now = self.clock.now();
        let triggers = self.config.automation.refresh_mode == RefreshMode::TriggersAction
            && self.session.is_trading_hours(now)
            && self.session.pending_boundary(now).is_none();
        if !triggers {
            return Ok(());
        }

        match self
            .trader
            .place_order(OrderMode::Continuous, &self.signals)
            .await
        {
            Ok(outcome) => {
                info!(success = outcome.success, attempts = outcome.attempt_count, "Refresh-triggered order finished");
                Ok(())
            }
            Err(e) => self.absorb(e).await,
        }
    }

    /// Absorb recoverable order errors; fatal ones end the run.
    async fn absorb(&mut self, e: OrderError) -> AppResult<()> {
        match e {
            fatal @ OrderError::Fatal(_) => Err(fatal.into()),
            OrderError::Stopped => Ok(()),
            OrderError::CircuitOrderPlaced => {
                debug!("Circuit-level order already placed today");
                Ok(())
            }
            OrderError::SessionNotReady(reason) => {
                warn!(reason = %reason, "Session not ready, backing off");
                self.back_off().await;
                Ok(())
            }
            OrderError::Preparation(reason) => {
                warn!(reason = %reason, "Order preparation failed, backing off");
                self.back_off().await;
                Ok(())
            }
        }
    }

    async fn back_off(&self) {
        self.signals
            .sleep(self.trader.recovery().backoff(), WaitScope::StopOrRefresh)
            .await;
    }

    async fn idle(&mut self, now: NaiveDateTime) {
        let (next, kind) = self.session.next_boundary(now);
        if self.last_idle_target != Some(next) {
            info!(next_boundary = %next, boundary = %kind, "Waiting for the next trading window");
            self.last_idle_target = Some(next);
        }
        self.signals
            .sleep(self.config.automation.idle_poll(), WaitScope::StopOrRefresh)
            .await;
    }
}
