//! Executor error types.

use thiserror::Error;
use tms_core::CoreError;
use tms_persistence::PersistenceError;

/// Price computation failure.
#[derive(Debug, Error)]
pub enum PricingError {
    /// A value could not be read from the order page.
    #[error("Market data unavailable: {0}")]
    MarketData(String),

    #[error("State persistence failed: {0}")]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type PricingResult<T> = Result<T, PricingError>;

/// Session recovery failure.
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// Recovery failed this time; retry after a backoff.
    #[error("Session not ready: {0}")]
    NotReady(String),

    /// The browser could not be brought back.
    #[error("Driver lost after {restarts} restart attempts")]
    DriverLost { restarts: u32 },

    #[error("Recovery cancelled")]
    Cancelled,
}

impl RecoveryError {
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DriverLost { .. })
    }
}

pub type RecoveryResult<T> = Result<T, RecoveryError>;

/// Why an order was not placed.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Stop requested")]
    Stopped,

    #[error("Session not ready: {0}")]
    SessionNotReady(String),

    #[error("Circuit-level order already placed today")]
    CircuitOrderPlaced,

    /// Form, price or field failure. A FAILED row has been written.
    #[error("Order preparation failed: {0}")]
    Preparation(String),

    #[error("Fatal: {0}")]
    Fatal(RecoveryError),
}

impl OrderError {
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

impl From<RecoveryError> for OrderError {
    fn from(e: RecoveryError) -> Self {
        match e {
            RecoveryError::NotReady(reason) => Self::SessionNotReady(reason),
            RecoveryError::Cancelled => Self::Stopped,
            fatal @ RecoveryError::DriverLost { .. } => Self::Fatal(fatal),
        }
    }
}

pub type OrderResult<T> = Result<T, OrderError>;
