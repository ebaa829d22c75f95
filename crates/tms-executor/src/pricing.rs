//! Price/circuit engine.
//!
//! Computes the submit price for the current phase and tracks the per-day
//! circuit state. Every mutation is read-modify-persist on a working copy:
//! the in-memory state only changes once the store has accepted the new
//! record, so a failed save never leaves memory ahead of disk.

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tms_core::{DailyPriceState, Price};
use tms_driver::BoxFuture;
use tms_persistence::StateStore;
use tms_telemetry::Metrics;
use tracing::{info, warn};

use crate::error::PricingResult;

/// Reads market values from the order page.
pub trait MarketReader: Send + Sync {
    /// Previous session close.
    fn pre_close(&self) -> BoxFuture<'_, PricingResult<Price>>;

    /// Current session high.
    fn session_high(&self) -> BoxFuture<'_, PricingResult<Price>>;
}

fn default_circuit_pct() -> Decimal {
    Decimal::TEN
}

fn default_premium_pct() -> Decimal {
    Decimal::TWO
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceConfig {
    /// Daily ceiling above the previous close, in percent.
    #[serde(default = "default_circuit_pct")]
    pub circuit_pct: Decimal,
    /// Markup applied to pre-close (pre-open) or session high (continuous).
    #[serde(default = "default_premium_pct")]
    pub premium_pct: Decimal,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            circuit_pct: default_circuit_pct(),
            premium_pct: default_premium_pct(),
        }
    }
}

/// Price to submit and whether it is the circuit limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceDecision {
    pub price: Price,
    pub at_circuit: bool,
}

pub struct PriceEngine {
    store: Arc<dyn StateStore>,
    key: String,
    config: PriceConfig,
    state: DailyPriceState,
}

impl PriceEngine {
    /// Load the persisted state for `key`, rolling it to `today` if stale.
    pub fn load(
        store: Arc<dyn StateStore>,
        key: impl Into<String>,
        config: PriceConfig,
        today: NaiveDate,
    ) -> PricingResult<Self> {
        let key = key.into();
        let state = store
            .load(&key)?
            .unwrap_or_else(|| DailyPriceState::new(today));
        info!(
            key = %key,
            date = %state.trading_date,
            circuit_limit = ?state.circuit_limit_price.map(|p| p.to_string()),
            circuit_reached = state.circuit_reached,
            circuit_order_placed = state.circuit_order_placed,
            "Loaded daily price state"
        );

        let mut engine = Self {
            store,
            key,
            config,
            state,
        };
        engine.roll_date(today)?;
        Ok(engine)
    }

    pub fn state(&self) -> &DailyPriceState {
        &self.state
    }

    pub fn config(&self) -> &PriceConfig {
        &self.config
    }

    pub fn circuit_order_placed(&self) -> bool {
        self.state.circuit_order_placed
    }

    fn commit(&mut self, next: DailyPriceState) -> PricingResult<()> {
        self.store.save(&self.key, &next)?;
        self.state = next;
        Metrics::circuit_state(self.state.circuit_reached, self.state.circuit_order_placed);
        Ok(())
    }

    /// Reset the state if the date changed. True on the first call for a
    /// new date only.
    pub fn roll_date(&mut self, today: NaiveDate) -> PricingResult<bool> {
        let mut next = self.state.clone();
        if !next.reset_for(today) {
            return Ok(false);
        }
        info!(
            from = %self.state.trading_date,
            to = %today,
            "Trading date changed, resetting daily state"
        );
        self.commit(next)?;
        Ok(true)
    }

    /// Pre-open price: pre-close plus the premium. No circuit tracking.
    pub async fn pre_open_price(
        &mut self,
        today: NaiveDate,
        reader: &dyn MarketReader,
    ) -> PricingResult<PriceDecision> {
        self.roll_date(today)?;
        let pre_close = reader.pre_close().await?;
        let price = pre_close.markup_pct(self.config.premium_pct);
        info!(
            phase = "PRE_OPEN",
            date = %today,
            pre_close = %pre_close,
            price = %price,
            "Pre-open price computed"
        );
        Ok(PriceDecision {
            price,
            at_circuit: false,
        })
    }

    /// Continuous price under the daily circuit state.
    pub async fn continuous_price(
        &mut self,
        today: NaiveDate,
        reader: &dyn MarketReader,
    ) -> PricingResult<PriceDecision> {
        self.roll_date(today)?;
        let mut next = self.state.clone();

        let limit = match next.circuit_limit_price {
            Some(limit) => limit,
            None => {
                let pre_close = reader.pre_close().await?;
                let limit = pre_close.markup_pct(self.config.circuit_pct);
                next.set_circuit_limit(limit)?;
                info!(
                    date = %today,
                    pre_close = %pre_close,
                    circuit_limit = %limit,
                    "Circuit limit fixed for the day"
                );
                limit
            }
        };

        if !next.circuit_reached {
            let candidate = match reader.session_high().await {
                Ok(high) => high.markup_pct(self.config.premium_pct),
                Err(e) => {
                    warn!(
                        phase = "CONTINUOUS",
                        date = %today,
                        error = %e,
                        fallback = %limit,
                        "Session high unavailable, using circuit limit"
                    );
                    limit
                }
            };

            if candidate >= limit {
                next.mark_circuit_reached();
                info!(date = %today, candidate = %candidate, circuit_limit = %limit, "Circuit reached");
            } else {
                next.record_submit_price(candidate);
            }
        } else {
            next.mark_circuit_reached();
        }

        self.commit(next)?;

        let decision = PriceDecision {
            price: self.state.current_submit_price.unwrap_or(limit),
            at_circuit: self.state.circuit_reached,
        };
        info!(
            phase = "CONTINUOUS",
            date = %today,
            price = %decision.price,
            at_circuit = decision.at_circuit,
            "Continuous price computed"
        );
        Ok(decision)
    }

    /// Record a successful order. An order at the circuit limit closes the
    /// day for further orders.
    pub fn record_order_success(&mut self, at_circuit: bool) -> PricingResult<()> {
        if !at_circuit || self.state.circuit_order_placed {
            return Ok(());
        }
        let mut next = self.state.clone();
        next.circuit_order_placed = true;
        self.commit(next)?;
        info!(date = %self.state.trading_date, "Circuit-level order placed, done for the day");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PricingError;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;
    use tms_persistence::{JsonFileStateStore, MemoryStateStore};

    struct FakeReader {
        pre_close: Price,
        high: Option<Price>,
        pre_close_reads: AtomicU32,
        high_reads: AtomicU32,
    }

    impl FakeReader {
        fn new(pre_close: Decimal, high: Option<Decimal>) -> Self {
            Self {
                pre_close: Price::new(pre_close),
                high: high.map(Price::new),
                pre_close_reads: AtomicU32::new(0),
                high_reads: AtomicU32::new(0),
            }
        }
    }

    impl MarketReader for FakeReader {
        fn pre_close(&self) -> BoxFuture<'_, PricingResult<Price>> {
            Box::pin(async move {
                self.pre_close_reads.fetch_add(1, Ordering::SeqCst);
                Ok(self.pre_close)
            })
        }

        fn session_high(&self) -> BoxFuture<'_, PricingResult<Price>> {
            Box::pin(async move {
                self.high_reads.fetch_add(1, Ordering::SeqCst);
                self.high
                    .ok_or_else(|| PricingError::MarketData("high not shown".to_string()))
            })
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, d).unwrap()
    }

    fn engine(store: Arc<dyn StateStore>, today: NaiveDate) -> PriceEngine {
        PriceEngine::load(store, "NABIL", PriceConfig::default(), today).unwrap()
    }

    #[tokio::test]
    async fn test_circuit_limit_from_pre_close() {
        let mut engine = engine(Arc::new(MemoryStateStore::new()), day(9));
        let reader = FakeReader::new(dec!(100.0), Some(dec!(95.0)));

        engine.continuous_price(day(9), &reader).await.unwrap();
        assert_eq!(
            engine.state().circuit_limit_price,
            Some(Price::new(dec!(110.0)))
        );

        // Fixed for the day.
        engine.continuous_price(day(9), &reader).await.unwrap();
        assert_eq!(reader.pre_close_reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_high_above_limit_reaches_circuit() {
        let mut engine = engine(Arc::new(MemoryStateStore::new()), day(9));
        let reader = FakeReader::new(dec!(100.0), Some(dec!(108.0)));

        let decision = engine.continuous_price(day(9), &reader).await.unwrap();
        assert_eq!(decision.price, Price::new(dec!(110.0)));
        assert!(decision.at_circuit);
        assert!(engine.state().circuit_reached);
    }

    #[tokio::test]
    async fn test_high_below_limit_uses_candidate() {
        let mut engine = engine(Arc::new(MemoryStateStore::new()), day(9));
        let reader = FakeReader::new(dec!(100.0), Some(dec!(95.0)));

        let decision = engine.continuous_price(day(9), &reader).await.unwrap();
        assert_eq!(decision.price, Price::new(dec!(96.9)));
        assert!(!decision.at_circuit);
        assert!(!engine.state().circuit_reached);
    }

    #[tokio::test]
    async fn test_restart_after_circuit_skips_high() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn StateStore> = Arc::new(JsonFileStateStore::new(dir.path()).unwrap());
        {
            let mut engine = engine(store.clone(), day(9));
            let reader = FakeReader::new(dec!(100.0), Some(dec!(108.0)));
            engine.continuous_price(day(9), &reader).await.unwrap();
        }

        let mut restarted = engine(store, day(9));
        let reader = FakeReader::new(dec!(100.0), Some(dec!(50.0)));
        let decision = restarted.continuous_price(day(9), &reader).await.unwrap();

        assert_eq!(decision.price, Price::new(dec!(110.0)));
        assert!(decision.at_circuit);
        assert_eq!(reader.high_reads.load(Ordering::SeqCst), 0);
        assert_eq!(reader.pre_close_reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_circuit_never_reverts_within_day() {
        let mut engine = engine(Arc::new(MemoryStateStore::new()), day(9));
        let high = FakeReader::new(dec!(100.0), Some(dec!(108.0)));
        engine.continuous_price(day(9), &high).await.unwrap();

        let low = FakeReader::new(dec!(100.0), Some(dec!(80.0)));
        for _ in 0..3 {
            let decision = engine.continuous_price(day(9), &low).await.unwrap();
            assert!(decision.at_circuit);
            assert_eq!(decision.price, Price::new(dec!(110.0)));
        }
    }

    #[tokio::test]
    async fn test_missing_high_falls_back_to_limit() {
        let mut engine = engine(Arc::new(MemoryStateStore::new()), day(9));
        let reader = FakeReader::new(dec!(100.0), None);

        let decision = engine.continuous_price(day(9), &reader).await.unwrap();
        assert_eq!(decision.price, Price::new(dec!(110.0)));
        assert!(decision.at_circuit);
    }

    #[tokio::test]
    async fn test_pre_open_price_has_no_circuit_tracking() {
        let store = Arc::new(MemoryStateStore::new());
        let mut engine = engine(store.clone(), day(9));
        let saves = store.save_count();
        let reader = FakeReader::new(dec!(100.0), None);

        let decision = engine.pre_open_price(day(9), &reader).await.unwrap();
        assert_eq!(decision.price, Price::new(dec!(102.0)));
        assert!(!decision.at_circuit);
        assert!(engine.state().circuit_limit_price.is_none());
        assert_eq!(store.save_count(), saves);
    }

    #[tokio::test]
    async fn test_rollover_resets_once() {
        let store = Arc::new(MemoryStateStore::new());
        let mut engine = engine(store.clone(), day(9));
        let reader = FakeReader::new(dec!(100.0), Some(dec!(108.0)));
        engine.continuous_price(day(9), &reader).await.unwrap();
        engine.record_order_success(true).unwrap();
        assert!(engine.circuit_order_placed());

        let saves = store.save_count();
        assert!(engine.roll_date(day(10)).unwrap());
        assert!(!engine.roll_date(day(10)).unwrap());
        assert!(!engine.roll_date(day(10)).unwrap());
        assert_eq!(store.save_count(), saves + 1);

        assert_eq!(*engine.state(), DailyPriceState::new(day(10)));
        assert!(!engine.circuit_order_placed());
    }

    #[tokio::test]
    async fn test_stale_state_rolled_on_load() {
        let mut stale = DailyPriceState::new(day(6));
        stale.circuit_limit_price = Some(Price::new(dec!(110.0)));
        stale.circuit_reached = true;
        let store = Arc::new(MemoryStateStore::new().with_state("NABIL", stale));

        let engine = engine(store, day(9));
        assert_eq!(*engine.state(), DailyPriceState::new(day(9)));
    }

    #[test]
    fn test_non_circuit_success_keeps_trading() {
        let mut engine = engine(Arc::new(MemoryStateStore::new()), day(9));
        engine.record_order_success(false).unwrap();
        assert!(!engine.circuit_order_placed());
    }
}
