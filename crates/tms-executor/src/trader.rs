//! Order placement workflow.
//!
//! `OrderTrader` owns everything that touches the browser session: the
//! order page, session recovery, the price engine and the latency profiler.
//! It is driven from a single control loop, so the session is never used
//! concurrently. Every terminal outcome, including preparation failures,
//! produces one audit row.

use std::sync::Arc;

use chrono::NaiveDateTime;
use tms_core::{
    BoundaryKind, Clock, OrderAttemptOutcome, OrderMode, OrderStatus, Price, SessionClock,
    TradingPhase,
};
use tms_driver::{BoxFuture, Diagnostics, UiDriver};
use tms_persistence::{OrderLog, OrderRecord};
use tms_telemetry::{LatencyProfiler, Metrics};
use tracing::{info, warn};

use crate::dispatch::{dispatch, DispatchConfig};
use crate::error::{OrderError, OrderResult};
use crate::order_page::OrderPage;
use crate::pricing::{PriceDecision, PriceEngine};
use crate::recovery::SessionRecovery;
use crate::scheduler::{BoundaryOutcome, BoundaryScheduler, BoundaryTask};
use crate::signals::Signals;

/// A filled form waiting to be submitted.
#[derive(Debug, Clone, Copy)]
pub struct PreparedOrder {
    pub mode: OrderMode,
    pub decision: PriceDecision,
}

/// Collaborators for [`OrderTrader`].
pub struct TraderParts {
    pub driver: Arc<dyn UiDriver>,
    pub page: OrderPage,
    pub engine: PriceEngine,
    pub recovery: SessionRecovery,
    pub scheduler: BoundaryScheduler,
    pub dispatch: DispatchConfig,
    pub profiler: LatencyProfiler,
    pub order_log: Arc<dyn OrderLog>,
    pub diagnostics: Arc<dyn Diagnostics>,
    pub clock: Arc<dyn Clock>,
    pub session: SessionClock,
}

pub struct OrderTrader {
    driver: Arc<dyn UiDriver>,
    page: OrderPage,
    engine: PriceEngine,
    recovery: SessionRecovery,
    scheduler: BoundaryScheduler,
    dispatch: DispatchConfig,
    profiler: LatencyProfiler,
    order_log: Arc<dyn OrderLog>,
    diagnostics: Arc<dyn Diagnostics>,
    clock: Arc<dyn Clock>,
    session: SessionClock,
    successful_orders: u32,
}

impl OrderTrader {
    pub fn new(parts: TraderParts) -> Self {
        Self {
            driver: parts.driver,
            page: parts.page,
            engine: parts.engine,
            recovery: parts.recovery,
            scheduler: parts.scheduler,
            dispatch: parts.dispatch,
            profiler: parts.profiler,
            order_log: parts.order_log,
            diagnostics: parts.diagnostics,
            clock: parts.clock,
            session: parts.session,
            successful_orders: 0,
        }
    }

    pub fn successful_orders(&self) -> u32 {
        self.successful_orders
    }

    pub fn engine(&self) -> &PriceEngine {
        &self.engine
    }

    pub fn recovery(&self) -> &SessionRecovery {
        &self.recovery
    }

    /// Check-and-recover the session.
    pub async fn ensure_session(&mut self, signals: &Signals) -> OrderResult<()> {
        self.recovery.ensure_ready(signals).await?;
        Ok(())
    }

    /// Refresh the page, then re-validate the session.
    pub async fn refresh_and_revalidate(&mut self, signals: &Signals) -> OrderResult<()> {
        self.refresh_page().await;
        self.ensure_session(signals).await
    }

    async fn refresh_page(&mut self) {
        if let Err(e) = self.driver.refresh_page().await {
            // Recovery sorts out the session state.
            warn!(error = %e, "Page refresh failed");
            self.recovery.observe_driver_error(&e);
        }
    }

    /// Roll the daily state if needed and report whether today's
    /// circuit-level order has already been placed.
    pub fn done_for_today(&mut self) -> bool {
        let today = self.clock.now().date();
        match self.engine.roll_date(today) {
            Ok(true) => self.page.clear_market_cache(),
            Ok(false) => {}
            Err(e) => warn!(date = %today, error = %e, "Daily state rollover failed"),
        }
        self.engine.circuit_order_placed()
    }

    /// Place one order now. `FormOnly` fills the form without submitting.
    pub async fn place_order(
        &mut self,
        mode: OrderMode,
        signals: &Signals,
    ) -> OrderResult<OrderAttemptOutcome> {
        if signals.is_stopped() {
            return Err(OrderError::Stopped);
        }
        self.ensure_session(signals).await?;
        if mode != OrderMode::FormOnly && self.done_for_today() {
            return Err(OrderError::CircuitOrderPlaced);
        }

        let phase = self.session.current_phase(self.clock.now());
        let prepared = self.prepare(mode, phase).await?;

        if mode == OrderMode::FormOnly {
            let outcome =
                OrderAttemptOutcome::not_submitted(mode, Some(prepared.decision.price));
            info!(price = %prepared.decision.price, "Form filled, not submitting");
            self.record(&outcome, OrderStatus::FormFilled);
            return Ok(outcome);
        }
        Ok(self.submit(prepared, signals).await)
    }

    /// Schedule, prepare and fire an order at the boundary at `target`.
    ///
    /// `Ok(None)` means the wait was interrupted before firing.
    pub async fn run_boundary(
        &mut self,
        target: NaiveDateTime,
        kind: BoundaryKind,
        signals: &Signals,
    ) -> OrderResult<Option<OrderAttemptOutcome>> {
        let scheduler = self.scheduler.clone();
        let mut task = BoundaryOrder {
            trader: self,
            signals,
            kind,
        };
        match scheduler.run(target, kind, &mut task, signals).await {
            BoundaryOutcome::Fired(outcome) => Ok(Some(outcome)),
            BoundaryOutcome::Interrupted(_) => Ok(None),
            BoundaryOutcome::PreparationFailed(e) => Err(e),
        }
    }

    /// Fill symbol, quantity, side and price.
    async fn prepare(&mut self, mode: OrderMode, phase: TradingPhase) -> OrderResult<PreparedOrder> {
        if let Err(e) = self.page.prepare_form().await {
            self.recovery.observe_driver_error(&e);
            return Err(self.fail_preparation(mode, phase, None, "form", &e.to_string()).await);
        }

        let today = self.clock.now().date();
        let priced = match phase {
            TradingPhase::Continuous => self.engine.continuous_price(today, &self.page).await,
            TradingPhase::PreOpen | TradingPhase::Closed => {
                self.engine.pre_open_price(today, &self.page).await
            }
        };
        let decision = match priced {
            Ok(d) => d,
            Err(e) => {
                return Err(self.fail_preparation(mode, phase, None, "price", &e.to_string()).await)
            }
        };

        if let Err(e) = self.page.fill_price(decision.price).await {
            self.recovery.observe_driver_error(&e);
            return Err(self
                .fail_preparation(mode, phase, Some(decision.price), "price_fill", &e.to_string())
                .await);
        }

        Ok(PreparedOrder { mode, decision })
    }

    async fn fail_preparation(
        &mut self,
        mode: OrderMode,
        phase: TradingPhase,
        price: Option<Price>,
        stage: &str,
        error: &str,
    ) -> OrderError {
        let now = self.clock.now();
        warn!(
            phase = %phase,
            date = %now.date(),
            price = ?price.map(|p| p.to_string()),
            mode = %mode,
            stage,
            error,
            "Order preparation failed"
        );
        self.diagnostics
            .capture_screenshot(self.driver.as_ref(), &format!("{stage}_failed"))
            .await;
        self.record(&OrderAttemptOutcome::not_submitted(mode, price), OrderStatus::Failed);
        OrderError::Preparation(format!("{stage}: {error}"))
    }

    /// Run the dispatch loop for a prepared order and record the outcome.
    async fn submit(&mut self, prepared: PreparedOrder, signals: &Signals) -> OrderAttemptOutcome {
        let PreparedOrder { mode, decision } = prepared;
        let report = dispatch(&self.page, &self.dispatch, signals, &mut self.profiler, mode).await;

        let outcome = OrderAttemptOutcome {
            success: report.success,
            attempt_count: report.attempts,
            price_used: Some(decision.price),
            at_circuit: decision.at_circuit,
            mode,
        };

        if outcome.success {
            self.successful_orders += 1;
            if let Err(e) = self.engine.record_order_success(decision.at_circuit) {
                warn!(error = %e, "Failed to persist circuit order flag");
            }
        } else {
            let now = self.clock.now();
            warn!(
                phase = %self.session.current_phase(now),
                date = %now.date(),
                price = %decision.price,
                attempts = report.attempts,
                cancelled = report.cancelled,
                mode = %mode,
                "Order not confirmed"
            );
        }
        self.record(&outcome, outcome.status());
        outcome
    }

    fn record(&self, outcome: &OrderAttemptOutcome, status: OrderStatus) {
        let record = OrderRecord {
            timestamp: self.clock.now(),
            symbol: self.page.symbol().to_string(),
            quantity: self.page.quantity(),
            price: outcome.price_used,
            status,
            mode: outcome.mode,
            attempt_count: outcome.attempt_count,
        };
        Metrics::order_outcome(status.as_str(), outcome.mode.as_str());
        if let Err(e) = self.order_log.append(&record) {
            warn!(error = %e, status = %status, "Failed to append order record");
        }
    }
}

/// Boundary order: refresh and prepare ahead of the boundary, submit on it.
struct BoundaryOrder<'a> {
    trader: &'a mut OrderTrader,
    signals: &'a Signals,
    kind: BoundaryKind,
}

impl BoundaryTask for BoundaryOrder<'_> {
    type Prepared = PreparedOrder;
    type Fired = OrderAttemptOutcome;
    type Error = OrderError;

    fn prepare(&mut self) -> BoxFuture<'_, OrderResult<PreparedOrder>> {
        Box::pin(async move {
            self.trader.refresh_page().await;
            self.trader.ensure_session(self.signals).await?;
            if self.trader.done_for_today() {
                return Err(OrderError::CircuitOrderPlaced);
            }
            self.trader
                .prepare(OrderMode::Boundary, self.kind.phase())
                .await
        })
    }

    fn fire(&mut self, prepared: PreparedOrder) -> BoxFuture<'_, OrderAttemptOutcome> {
        Box::pin(async move { self.trader.submit(prepared, self.signals).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order_page::OrderLocators;
    use crate::pricing::PriceConfig;
    use crate::recovery::{RecoveryConfig, SessionMarkers};
    use crate::scheduler::SchedulerConfig;
    use crate::signals::StopReason;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use tms_core::{DailyPriceState, ManualClock, Quantity, SessionConfig};
    use tms_driver::{AuthResult, Authenticator, Locator, MockDriver, NullDiagnostics};
    use tms_persistence::{MemoryOrderLog, MemoryStateStore, StateStore};
    use tokio_util::sync::CancellationToken;

    const ORDER_URL: &str = "https://tms.example/order";
    const SESSION: &str = "//span[contains(text(), 'Dashboard')]";

    struct NoLogin;

    impl Authenticator for NoLogin {
        fn login<'a>(
            &'a self,
            _: &'a dyn UiDriver,
            _: &'a CancellationToken,
        ) -> BoxFuture<'a, AuthResult<()>> {
            Box::pin(async { Err(tms_driver::AuthError::LoginFailed("not scripted".into())) })
        }
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 2, 9)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    /// An authenticated order page with market data and a buy button whose
    /// `confirm_after`-th click shows the success alert.
    fn order_page_driver(confirm_after: u32) -> Arc<MockDriver> {
        let l = OrderLocators::default();
        let driver = Arc::new(MockDriver::new().with_present(&[
            SESSION,
            l.buy_sell_tab.value.as_str(),
            l.symbol.value.as_str(),
            l.body.value.as_str(),
            l.quantity.value.as_str(),
            l.buy_toggle.value.as_str(),
            l.price.value.as_str(),
            l.buy_button.value.as_str(),
        ]));
        driver.set_text(&l.pre_close.value, "100.0");
        driver.set_text(&l.high.value, "95.0");
        driver.reveal_after_clicks(&l.buy_button.value, &l.success_markers[0].value, confirm_after);
        driver
    }

    struct Harness {
        trader: OrderTrader,
        driver: Arc<MockDriver>,
        log: Arc<MemoryOrderLog>,
        clock: Arc<ManualClock>,
    }

    fn harness(driver: Arc<MockDriver>, now: NaiveDateTime, store: Arc<dyn StateStore>) -> Harness {
        let clock = Arc::new(ManualClock::new(now));
        let log = Arc::new(MemoryOrderLog::new());
        let l = OrderLocators::default();
        let recovery = SessionRecovery::new(
            driver.clone(),
            Arc::new(NoLogin),
            SessionMarkers {
                session: Locator::xpath(SESSION),
                order_page: l.symbol.clone(),
            },
            ORDER_URL,
            RecoveryConfig::default(),
        );
        let trader = OrderTrader::new(TraderParts {
            driver: driver.clone(),
            page: OrderPage::new(driver.clone(), l, "NABIL", Quantity::new(dec!(10))),
            engine: PriceEngine::load(store, "NABIL", PriceConfig::default(), now.date()).unwrap(),
            recovery,
            scheduler: BoundaryScheduler::new(SchedulerConfig::default(), clock.clone()),
            dispatch: DispatchConfig::default(),
            profiler: LatencyProfiler::in_memory(clock.clone()),
            order_log: log.clone(),
            diagnostics: Arc::new(NullDiagnostics),
            clock: clock.clone(),
            session: SessionClock::new(SessionConfig::default()).unwrap(),
        });
        Harness {
            trader,
            driver,
            log,
            clock,
        }
    }

    #[tokio::test]
    async fn test_continuous_order_records_success() {
        let mut h = harness(order_page_driver(3), at(11, 30, 0), Arc::new(MemoryStateStore::new()));

        let outcome = h
            .trader
            .place_order(OrderMode::Continuous, &Signals::new())
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.attempt_count, 3);
        assert_eq!(outcome.price_used, Some(Price::new(dec!(96.9))));
        assert!(!outcome.at_circuit);
        assert_eq!(h.trader.successful_orders(), 1);

        let rows = h.log.records();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, OrderStatus::Success);
        assert_eq!(rows[0].mode, OrderMode::Continuous);
        assert_eq!(rows[0].attempt_count, 3);
        assert_eq!(
            h.driver.field_value(&OrderLocators::default().price.value).as_deref(),
            Some("96.9")
        );
    }

    #[tokio::test]
    async fn test_circuit_order_closes_the_day() {
        let driver = order_page_driver(1);
        driver.set_text(&OrderLocators::default().high.value, "108.0");
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let mut h = harness(driver, at(11, 30, 0), store.clone());

        let outcome = h
            .trader
            .place_order(OrderMode::Continuous, &Signals::new())
            .await
            .unwrap();
        assert!(outcome.success);
        assert!(outcome.at_circuit);
        assert_eq!(outcome.price_used, Some(Price::new(dec!(110.0))));

        let err = h
            .trader
            .place_order(OrderMode::Continuous, &Signals::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::CircuitOrderPlaced));
        assert!(store.load("NABIL").unwrap().unwrap().circuit_order_placed);

        // Next trading day starts fresh.
        h.clock.set(at(11, 30, 0) + chrono::Duration::days(1));
        assert!(!h.trader.done_for_today());
    }

    #[tokio::test]
    async fn test_form_only_fills_without_submitting() {
        let mut h = harness(order_page_driver(1), at(9, 0, 0), Arc::new(MemoryStateStore::new()));

        let outcome = h
            .trader
            .place_order(OrderMode::FormOnly, &Signals::new())
            .await
            .unwrap();

        assert_eq!(outcome.attempt_count, 0);
        assert_eq!(outcome.price_used, Some(Price::new(dec!(102.0))));
        assert_eq!(h.driver.click_count(&OrderLocators::default().buy_button.value), 0);
        let rows = h.log.records();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, OrderStatus::FormFilled);
        assert_eq!(rows[0].mode, OrderMode::FormOnly);
        // Outside trading hours the circuit state is untouched.
        assert!(h.trader.engine().state().circuit_limit_price.is_none());
    }

    #[tokio::test]
    async fn test_missing_market_data_writes_failed_row() {
        let driver = order_page_driver(1);
        driver.hide(&OrderLocators::default().pre_close.value);
        let mut h = harness(driver, at(11, 30, 0), Arc::new(MemoryStateStore::new()));

        let err = h
            .trader
            .place_order(OrderMode::Continuous, &Signals::new())
            .await
            .unwrap_err();

        assert!(matches!(err, OrderError::Preparation(_)));
        assert!(!err.is_fatal());
        let rows = h.log.records();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, OrderStatus::Failed);
        assert_eq!(rows[0].attempt_count, 0);
        assert_eq!(h.driver.click_count(&OrderLocators::default().buy_button.value), 0);
    }

    #[tokio::test]
    async fn test_session_not_ready_places_nothing() {
        let driver = order_page_driver(1);
        driver.hide(SESSION);
        let mut h = harness(driver, at(11, 30, 0), Arc::new(MemoryStateStore::new()));

        let err = h
            .trader
            .place_order(OrderMode::Continuous, &Signals::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::SessionNotReady(_)));
        assert!(h.log.records().is_empty());
    }

    #[tokio::test]
    async fn test_boundary_order_refreshes_then_fires() {
        let mut h = harness(order_page_driver(2), at(11, 0, 0), Arc::new(MemoryStateStore::new()));

        let outcome = h
            .trader
            .run_boundary(at(11, 0, 0), BoundaryKind::Continuous, &Signals::new())
            .await
            .unwrap()
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.mode, OrderMode::Boundary);
        assert_eq!(outcome.attempt_count, 2);
        assert_eq!(h.driver.refresh_count(), 1);
        assert_eq!(h.log.records()[0].mode, OrderMode::Boundary);
    }

    #[tokio::test]
    async fn test_boundary_skipped_after_circuit_order() {
        let mut state = DailyPriceState::new(at(11, 0, 0).date());
        state.set_circuit_limit(Price::new(dec!(110))).unwrap();
        state.mark_circuit_reached();
        state.circuit_order_placed = true;
        let store = Arc::new(MemoryStateStore::new().with_state("NABIL", state));
        let mut h = harness(order_page_driver(1), at(11, 0, 0), store);

        let err = h
            .trader
            .run_boundary(at(11, 0, 0), BoundaryKind::Continuous, &Signals::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::CircuitOrderPlaced));
        assert!(h.log.records().is_empty());
    }

    #[tokio::test]
    async fn test_stopped_trader_does_nothing() {
        let mut h = harness(order_page_driver(1), at(11, 30, 0), Arc::new(MemoryStateStore::new()));
        let signals = Signals::new();
        signals.request_stop(StopReason::Operator);

        let err = h
            .trader
            .place_order(OrderMode::Continuous, &signals)
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::Stopped));
        assert_eq!(h.driver.clicks().len(), 0);
    }
}
