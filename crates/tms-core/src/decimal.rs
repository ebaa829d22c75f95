//! Precision-safe decimal types for order entry.
//!
//! Uses `rust_decimal` for exact decimal arithmetic. Every price the bot
//! submits is floored to the exchange tick, never rounded half-up, so a
//! computed price can never exceed the ceiling it was derived from.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};

/// Price with exact decimal precision.
///
/// Wraps `Decimal` to keep prices from being mixed with quantities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(pub Decimal);

impl Price {
    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Floor to one decimal place (the form's price resolution).
    #[inline]
    pub fn floor_tenth(&self) -> Self {
        Self(
            self.0
                .round_dp_with_strategy(1, RoundingStrategy::ToNegativeInfinity)
                .normalize(),
        )
    }

    /// `self * (1 + pct / 100)`, floored to one decimal place.
    #[inline]
    pub fn markup_pct(&self, pct: Decimal) -> Self {
        Self(self.0 * (Decimal::ONE + pct / Decimal::ONE_HUNDRED)).floor_tenth()
    }

    /// Parse a price as rendered by the order page (`"1,234.5"`).
    pub fn parse_display(text: &str) -> Result<Self> {
        let cleaned: String = text.trim().chars().filter(|c| *c != ',').collect();
        if cleaned.is_empty() {
            return Err(CoreError::InvalidPrice("empty price text".to_string()));
        }
        let value = Decimal::from_str(&cleaned)?;
        if value.is_sign_negative() {
            return Err(CoreError::InvalidPrice(format!("negative price: {text}")));
        }
        Ok(Self(value))
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order quantity (shares) with exact decimal precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(pub Decimal);

impl Quantity {
    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Quantity {
    fn from(n: u64) -> Self {
        Self(Decimal::from(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_floor_tenth_never_rounds_up() {
        assert_eq!(Price::new(dec!(110.16)).floor_tenth(), Price::new(dec!(110.1)));
        assert_eq!(Price::new(dec!(96.99)).floor_tenth(), Price::new(dec!(96.9)));
        assert_eq!(Price::new(dec!(110.0)).floor_tenth(), Price::new(dec!(110)));
    }

    #[test]
    fn test_markup_pct() {
        // 100 * 1.10 = 110.0 (circuit limit)
        assert_eq!(Price::new(dec!(100)).markup_pct(dec!(10)), Price::new(dec!(110)));
        // 108 * 1.02 = 110.16 -> 110.1
        assert_eq!(Price::new(dec!(108)).markup_pct(dec!(2)), Price::new(dec!(110.1)));
        // 95 * 1.02 = 96.9
        assert_eq!(Price::new(dec!(95)).markup_pct(dec!(2)), Price::new(dec!(96.9)));
    }

    #[test]
    fn test_parse_display() {
        assert_eq!(
            Price::parse_display(" 1,234.5 ").unwrap(),
            Price::new(dec!(1234.5))
        );
        assert!(Price::parse_display("").is_err());
        assert!(Price::parse_display("n/a").is_err());
        assert!(Price::parse_display("-3").is_err());
    }

    proptest! {
        #[test]
        fn prop_floor_tenth_idempotent_and_bounded(millis in 0u64..100_000_000u64) {
            let price = Price::new(Decimal::new(millis as i64, 3));
            let once = price.floor_tenth();
            prop_assert_eq!(once.floor_tenth(), once);
            prop_assert!(once <= price);
            prop_assert!(price.inner() - once.inner() < Decimal::new(1, 1));
        }
    }
}
