//! Exchange-local time source.
//!
//! Schedule math is done in exchange wall-clock time (`NaiveDateTime`), so the
//! clock is injectable: production reads the system clock shifted to the
//! exchange offset, tests drive a `ManualClock`.

use chrono::{Duration, FixedOffset, Local, NaiveDateTime, Utc};
use parking_lot::Mutex;

/// Trait for obtaining the current exchange-local time.
pub trait Clock: Send + Sync {
    /// Current exchange-local wall-clock time.
    fn now(&self) -> NaiveDateTime;
}

/// System clock shifted to the exchange's UTC offset.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExchangeClock {
    offset: Option<FixedOffset>,
}

impl ExchangeClock {
    /// Clock at a fixed offset from UTC, in minutes. `None` uses the host zone.
    ///
    /// Offsets outside ±24h fall back to the host zone.
    #[must_use]
    pub fn with_offset_minutes(minutes: Option<i32>) -> Self {
        Self {
            offset: minutes
                .and_then(|m| m.checked_mul(60))
                .and_then(FixedOffset::east_opt),
        }
    }

    /// Clock in the host's local zone.
    #[must_use]
    pub fn local() -> Self {
        Self { offset: None }
    }
}

impl Clock for ExchangeClock {
    fn now(&self) -> NaiveDateTime {
        match self.offset {
            Some(offset) => Utc::now().with_timezone(&offset).naive_local(),
            None => Local::now().naive_local(),
        }
    }
}

/// Manually driven clock for tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    #[must_use]
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_manual_clock_advance() {
        let start = NaiveDate::from_ymd_opt(2026, 2, 9)
            .unwrap()
            .and_hms_opt(10, 29, 58)
            .unwrap();
        let clock = ManualClock::new(start);
        clock.advance(Duration::seconds(2));
        assert_eq!(clock.now(), start + Duration::seconds(2));

        clock.set(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn test_exchange_clock_offset() {
        let kathmandu = ExchangeClock::with_offset_minutes(Some(345));
        let utc = ExchangeClock::with_offset_minutes(Some(0));
        let diff = kathmandu.now() - utc.now();
        // Two reads a few microseconds apart.
        assert!((diff - Duration::minutes(345)).num_seconds().abs() <= 1);
    }

    #[test]
    fn test_out_of_range_offset_falls_back_to_local() {
        let clock = ExchangeClock::with_offset_minutes(Some(100_000));
        let diff = clock.now() - ExchangeClock::local().now();
        assert!(diff.num_seconds().abs() <= 1);
    }

    #[test]
    fn test_overflowing_offset_falls_back_to_local() {
        for minutes in [40_000_000, i32::MIN, i32::MAX] {
            let clock = ExchangeClock::with_offset_minutes(Some(minutes));
            assert!(clock.offset.is_none());
        }
    }
}
