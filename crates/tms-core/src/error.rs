//! Error types for tms-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Decimal parse error: {0}")]
    DecimalParse(#[from] rust_decimal::Error),

    #[error("Invalid session configuration: {0}")]
    InvalidSession(String),

    #[error("Circuit limit already fixed for {date}: {existing}")]
    CircuitLimitFixed { date: chrono::NaiveDate, existing: String },
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
