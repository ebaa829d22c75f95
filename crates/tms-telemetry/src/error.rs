//! Telemetry error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Logging initialization failed: {0}")]
    LoggingInit(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] tms_persistence::PersistenceError),
}

pub type TelemetryResult<T> = Result<T, TelemetryError>;
