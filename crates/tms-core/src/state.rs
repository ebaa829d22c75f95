//! Per-day circuit state.
//!
//! One record per symbol, persisted after every mutation. The circuit limit is
//! fixed once per trading day and never changed until the date rolls.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::decimal::Price;
use crate::error::{CoreError, Result};

/// Price and circuit state for one trading day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyPriceState {
    pub trading_date: NaiveDate,
    /// Ceiling computed from the first pre-close read of the day.
    pub circuit_limit_price: Option<Price>,
    /// Last price written into the form.
    pub current_submit_price: Option<Price>,
    /// Set once the submit price reaches the circuit limit.
    pub circuit_reached: bool,
    /// Set once an order at the circuit limit succeeded.
    #[serde(default)]
    pub circuit_order_placed: bool,
}

impl DailyPriceState {
    /// Fresh state for `date`.
    #[must_use]
    pub fn new(trading_date: NaiveDate) -> Self {
        Self {
            trading_date,
            circuit_limit_price: None,
            current_submit_price: None,
            circuit_reached: false,
            circuit_order_placed: false,
        }
    }

    /// Reset every field if `today` differs from the stored date.
    ///
    /// Returns `true` if a reset happened.
    pub fn reset_for(&mut self, today: NaiveDate) -> bool {
        if self.trading_date == today {
            return false;
        }
        *self = Self::new(today);
        true
    }

    /// Fix today's circuit limit. Fails if one is already set.
    pub fn set_circuit_limit(&mut self, limit: Price) -> Result<()> {
        if let Some(existing) = self.circuit_limit_price {
            return Err(CoreError::CircuitLimitFixed {
                date: self.trading_date,
                existing: existing.to_string(),
            });
        }
        self.circuit_limit_price = Some(limit);
        Ok(())
    }

    /// Record a submit price, latching `circuit_reached` when it hits the limit.
    pub fn record_submit_price(&mut self, price: Price) {
        self.current_submit_price = Some(price);
        if let Some(limit) = self.circuit_limit_price {
            if price >= limit {
                self.circuit_reached = true;
            }
        }
    }

    /// Submit price pinned at the circuit limit.
    pub fn mark_circuit_reached(&mut self) {
        self.circuit_reached = true;
        self.current_submit_price = self.circuit_limit_price;
    }
}
