//! Trading session clock.
//!
//! Maps exchange-local wall-clock time to a trading phase and to the next
//! zero-jitter boundary instant. Pure and deterministic: every function takes
//! `now` explicitly so the schedule can be tested with fixed instants.
//!
//! Two windows are configured, each with a boundary inside it:
//! - Pre-open: 10:29 – 10:45, boundary 10:30:00.000
//! - Continuous: 10:59 – 15:00, boundary 11:00:00.000

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Trading phase classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradingPhase {
    /// Outside both windows.
    Closed,
    /// Pre-open auction window.
    PreOpen,
    /// Continuous trading window.
    Continuous,
}

impl TradingPhase {
    /// Whether orders can be placed in this phase.
    #[must_use]
    pub fn is_trading(&self) -> bool {
        !matches!(self, Self::Closed)
    }
}

impl std::fmt::Display for TradingPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::PreOpen => write!(f, "PRE_OPEN"),
            Self::Continuous => write!(f, "CONTINUOUS"),
        }
    }
}

/// Which boundary an instant belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BoundaryKind {
    PreOpen,
    Continuous,
}

impl BoundaryKind {
    /// Phase whose window contains this boundary.
    #[must_use]
    pub fn phase(&self) -> TradingPhase {
        match self {
            Self::PreOpen => TradingPhase::PreOpen,
            Self::Continuous => TradingPhase::Continuous,
        }
    }
}

impl std::fmt::Display for BoundaryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PreOpen => write!(f, "PRE_OPEN"),
            Self::Continuous => write!(f, "CONTINUOUS"),
        }
    }
}

/// A phase window with its boundary instant. Both ends are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseWindow {
    pub start: NaiveTime,
    pub boundary: NaiveTime,
    pub end: NaiveTime,
}

impl PhaseWindow {
    #[must_use]
    pub fn contains(&self, t: NaiveTime) -> bool {
        self.start <= t && t <= self.end
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.start > self.end {
            return Err(CoreError::InvalidSession(format!(
                "{name} window starts after it ends ({} > {})",
                self.start, self.end
            )));
        }
        if !self.contains(self.boundary) {
            return Err(CoreError::InvalidSession(format!(
                "{name} boundary {} outside window {} – {}",
                self.boundary, self.start, self.end
            )));
        }
        Ok(())
    }
}

fn hms(h: u32, m: u32, s: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, s).unwrap_or(NaiveTime::MIN)
}

const MINUTES_PER_DAY: u32 = 24 * 60;

fn default_utc_offset_minutes() -> Option<i32> {
    Some(5 * 60 + 45)
}

/// Session schedule configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub pre_open: PhaseWindow,
    pub continuous: PhaseWindow,
    /// Exchange offset from UTC in minutes. `None` uses the host's local zone.
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: Option<i32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pre_open: PhaseWindow {
                start: hms(10, 29, 0),
                boundary: hms(10, 30, 0),
                end: hms(10, 45, 0),
            },
            continuous: PhaseWindow {
                start: hms(10, 59, 0),
                boundary: hms(11, 0, 0),
                end: hms(15, 0, 0),
            },
            utc_offset_minutes: default_utc_offset_minutes(),
        }
    }
}

impl SessionConfig {
    /// Check that both windows are well formed and do not overlap, and that
    /// the UTC offset is under a day.
    pub fn validate(&self) -> Result<()> {
        if let Some(minutes) = self.utc_offset_minutes {
            if minutes.unsigned_abs() >= MINUTES_PER_DAY {
                return Err(CoreError::InvalidSession(format!(
                    "utc_offset_minutes must be within ±{MINUTES_PER_DAY}, got {minutes}"
                )));
            }
        }
        self.pre_open.validate("pre-open")?;
        self.continuous.validate("continuous")?;
        if self.pre_open.end >= self.continuous.start {
            return Err(CoreError::InvalidSession(format!(
                "pre-open window (ends {}) overlaps continuous window (starts {})",
                self.pre_open.end, self.continuous.start
            )));
        }
        Ok(())
    }
}

/// Pure wall-clock -> phase mapping over a validated `SessionConfig`.
#[derive(Debug, Clone)]
pub struct SessionClock {
    config: SessionConfig,
}

impl SessionClock {
    /// Create a session clock, rejecting overlapping or malformed windows.
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub fn window(&self, kind: BoundaryKind) -> &PhaseWindow {
        match kind {
            BoundaryKind::PreOpen => &self.config.pre_open,
            BoundaryKind::Continuous => &self.config.continuous,
        }
    }

    /// Trading phase at `now`.
    #[must_use]
    pub fn current_phase(&self, now: NaiveDateTime) -> TradingPhase {
        let t = now.time();
        if self.config.pre_open.contains(t) {
            TradingPhase::PreOpen
        } else if self.config.continuous.contains(t) {
            TradingPhase::Continuous
        } else {
            TradingPhase::Closed
        }
    }

    /// Whether `now` falls in either trading window.
    #[must_use]
    pub fn is_trading_hours(&self, now: NaiveDateTime) -> bool {
        self.current_phase(now).is_trading()
    }

    /// Boundary instant of `kind` on `date`.
    #[must_use]
    pub fn boundary_on(&self, date: NaiveDate, kind: BoundaryKind) -> NaiveDateTime {
        date.and_time(self.window(kind).boundary)
    }

    /// The nearer of the two boundaries, each rolled to tomorrow if already
    /// passed today. A boundary equal to `now` is still "today".
    #[must_use]
    pub fn next_boundary(&self, now: NaiveDateTime) -> (NaiveDateTime, BoundaryKind) {
        let roll = |kind| {
            let today = self.boundary_on(now.date(), kind);
            if now > today {
                today + Duration::days(1)
            } else {
                today
            }
        };
        let pre_open = roll(BoundaryKind::PreOpen);
        let continuous = roll(BoundaryKind::Continuous);
        if pre_open <= continuous {
            (pre_open, BoundaryKind::PreOpen)
        } else {
            (continuous, BoundaryKind::Continuous)
        }
    }

    /// Today's boundary of the current phase, if it has not passed yet.
    ///
    /// Returns `None` when closed, or when the phase's boundary is behind us
    /// (the window is then in back-to-back mode rather than boundary mode).
    #[must_use]
    pub fn pending_boundary(&self, now: NaiveDateTime) -> Option<(NaiveDateTime, BoundaryKind)> {
        let kind = match self.current_phase(now) {
            TradingPhase::Closed => return None,
            TradingPhase::PreOpen => BoundaryKind::PreOpen,
            TradingPhase::Continuous => BoundaryKind::Continuous,
        };
        let boundary = self.boundary_on(now.date(), kind);
        (now < boundary).then_some((boundary, kind))
    }
}
