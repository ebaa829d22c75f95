//! Durable storage for the TMS bot.
//!
//! - `StateStore`: per-symbol `DailyPriceState`, written atomically
//! - `JsonLinesWriter`: append-only, daily-rotating JSON Lines files
//! - `OrderLog`: audit trail of every terminal order outcome

pub mod error;
pub mod order_log;
pub mod state_store;
pub mod writer;

pub use error::{PersistenceError, PersistenceResult};
pub use order_log::{JsonlOrderLog, MemoryOrderLog, OrderLog, OrderRecord};
pub use state_store::{JsonFileStateStore, MemoryStateStore, StateStore};
pub use writer::JsonLinesWriter;
