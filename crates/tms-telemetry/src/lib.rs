//! Observability for the TMS bot.
//!
//! - Structured logging via `tracing` (pretty in development, JSON in production)
//! - Prometheus metrics for attempts, outcomes, latency and session state
//! - `LatencyProfiler`: action-to-acknowledgement timing written as JSON Lines
//! - `SessionSummaryReporter`: end-of-run order totals read back from the counters

pub mod error;
pub mod latency;
pub mod logging;
pub mod metrics;
pub mod session_summary;

pub use error::{TelemetryError, TelemetryResult};
pub use latency::{LatencyProfiler, LatencyRecord};
pub use logging::init_logging;
pub use metrics::Metrics;
pub use session_summary::{SessionSummary, SessionSummaryReporter};
