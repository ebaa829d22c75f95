//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Core error: {0}")]
    Core(#[from] tms_core::CoreError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] tms_persistence::PersistenceError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] tms_telemetry::TelemetryError),

    #[error("Driver error: {0}")]
    Driver(#[from] tms_driver::DriverError),

    #[error("Pricing error: {0}")]
    Pricing(#[from] tms_executor::PricingError),

    #[error("Order placement failed: {0}")]
    Order(#[from] tms_executor::OrderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
