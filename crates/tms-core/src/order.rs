//! Order result vocabulary shared by the executor and the audit log.

use serde::{Deserialize, Serialize};

use crate::decimal::Price;

/// How an order was placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderMode {
    /// Fired at a session boundary after preparation.
    Boundary,
    /// Back-to-back order during a trading window.
    Continuous,
    /// Form filled outside trading hours, never submitted.
    FormOnly,
}

impl OrderMode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Boundary => "BOUNDARY",
            Self::Continuous => "CONTINUOUS",
            Self::FormOnly => "FORM_ONLY",
        }
    }
}

impl std::fmt::Display for OrderMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit status of an order row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Success,
    Failed,
    FormFilled,
}

impl OrderStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::FormFilled => "FORM_FILLED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one order placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAttemptOutcome {
    /// Whether a confirmation was observed.
    pub success: bool,
    /// Submit attempts made (0 when no submission happened).
    pub attempt_count: u32,
    /// Price written into the form, if any.
    pub price_used: Option<Price>,
    /// Whether `price_used` equals the day's circuit limit.
    pub at_circuit: bool,
    pub mode: OrderMode,
}

impl OrderAttemptOutcome {
    /// Outcome for an order that never reached submission.
    #[must_use]
    pub fn not_submitted(mode: OrderMode, price_used: Option<Price>) -> Self {
        Self {
            success: false,
            attempt_count: 0,
            price_used,
            at_circuit: false,
            mode,
        }
    }

    /// Audit status for this outcome.
    #[must_use]
    pub fn status(&self) -> OrderStatus {
        match (self.mode, self.success) {
            (OrderMode::FormOnly, _) => OrderStatus::FormFilled,
            (_, true) => OrderStatus::Success,
            (_, false) => OrderStatus::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_outcome_status() {
        let mut outcome = OrderAttemptOutcome {
            success: true,
            attempt_count: 3,
            price_used: Some(Price::new(dec!(110))),
            at_circuit: true,
            mode: OrderMode::Boundary,
        };
        assert_eq!(outcome.status(), OrderStatus::Success);

        outcome.success = false;
        assert_eq!(outcome.status(), OrderStatus::Failed);

        let form = OrderAttemptOutcome::not_submitted(OrderMode::FormOnly, None);
        assert_eq!(form.status(), OrderStatus::FormFilled);
        assert_eq!(form.attempt_count, 0);
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(
            serde_json::to_string(&OrderStatus::FormFilled).unwrap(),
            "\"FORM_FILLED\""
        );
        assert_eq!(serde_json::to_string(&OrderMode::FormOnly).unwrap(), "\"FORM_ONLY\"");
        assert_eq!(OrderMode::Continuous.to_string(), "CONTINUOUS");
    }
}
