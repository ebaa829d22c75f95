//! Core domain types for the TMS boundary order bot.
//!
//! This crate provides the pieces every other crate agrees on:
//! - `Price`, `Quantity`: precision-safe numeric types, prices floored to one decimal
//! - `SessionClock`: pure wall-clock -> trading phase / next boundary mapping
//! - `Clock`: injectable exchange-local time source
//! - `DailyPriceState`: the per-day circuit state record that gets persisted
//! - `OrderAttemptOutcome`, `OrderMode`, `OrderStatus`: order result vocabulary

pub mod clock;
pub mod decimal;
pub mod error;
pub mod order;
pub mod session;
pub mod state;

pub use clock::{Clock, ExchangeClock, ManualClock};
pub use decimal::{Price, Quantity};
pub use error::{CoreError, Result};
pub use order::{OrderAttemptOutcome, OrderMode, OrderStatus};
pub use session::{BoundaryKind, PhaseWindow, SessionClock, SessionConfig, TradingPhase};
pub use state::DailyPriceState;
