//! TMS boundary buy-order bot.
//!
//! Wires the executor to a real browser and runs the automation loop:
//! - boundary orders at the pre-open and continuous boundaries
//! - back-to-back orders inside the trading windows
//! - form filling outside trading hours, when enabled
//! - refresh and stop requests from the interrupt listener

pub mod app;
pub mod config;
pub mod error;
pub mod listener;

pub use app::{Application, AutomationExit, Collaborators};
pub use config::{AppConfig, RefreshMode};
pub use error::{AppError, AppResult};
