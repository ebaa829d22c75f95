//! Prometheus metrics for the TMS bot.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration failure
//! (duplicate metric name) is a fatal startup error, and can only happen
//! during static initialization.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, register_int_gauge,
    CounterVec, GaugeVec, HistogramVec, IntGauge,
};

/// Submit attempts made by the dispatch loop.
/// Labels: mode (BOUNDARY/CONTINUOUS)
pub static ORDER_ATTEMPTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tms_order_attempts_total",
        "Total submit attempts made by the dispatch loop",
        &["mode"]
    )
    .unwrap()
});

/// Terminal order outcomes.
/// Labels: status (SUCCESS/FAILED/FORM_FILLED), mode
pub static ORDERS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tms_orders_total",
        "Terminal order outcomes by status and mode",
        &["status", "mode"]
    )
    .unwrap()
});

/// First attempt to confirmation, in milliseconds.
pub static ACK_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "tms_ack_latency_ms",
        "Latency from first submit attempt to confirmation in milliseconds",
        &["label"],
        vec![1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0, 1000.0, 5000.0]
    )
    .unwrap()
});

/// How far past the boundary the first attempt fired, in milliseconds.
pub static BOUNDARY_LATENESS_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "tms_boundary_lateness_ms",
        "Delay between the boundary instant and firing in milliseconds",
        &["boundary"],
        vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 500.0]
    )
    .unwrap()
});

/// Session recovery outcomes.
/// Labels: outcome (healthy/recovered/failed/driver_recreated)
pub static RECOVERY_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tms_recovery_total",
        "Session recovery outcomes",
        &["outcome"]
    )
    .unwrap()
});

/// Session recovery state (1=active, 0=inactive).
pub static SESSION_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "tms_session_state",
        "Session recovery state machine current state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Circuit limit reached today (1=yes).
pub static CIRCUIT_REACHED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "tms_circuit_reached",
        "Whether today's submit price has reached the circuit limit"
    )
    .unwrap()
});

/// Circuit-level order placed today (1=yes).
pub static CIRCUIT_ORDER_PLACED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "tms_circuit_order_placed",
        "Whether an order at the circuit limit succeeded today"
    )
    .unwrap()
});

/// Session states exported by `SESSION_STATE`.
pub const SESSION_STATES: [&str; 3] = ["authenticated_on_order_page", "expired", "driver_unavailable"];

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Record one submit attempt.
    pub fn order_attempt(mode: &str) {
        ORDER_ATTEMPTS_TOTAL.with_label_values(&[mode]).inc();
    }

    /// Record a terminal order outcome.
    pub fn order_outcome(status: &str, mode: &str) {
        ORDERS_TOTAL.with_label_values(&[status, mode]).inc();
    }

    pub fn ack_latency(label: &str, latency_ms: f64) {
        ACK_LATENCY_MS.with_label_values(&[label]).observe(latency_ms);
    }

    pub fn boundary_lateness(boundary: &str, lateness_ms: f64) {
        BOUNDARY_LATENESS_MS
            .with_label_values(&[boundary])
            .observe(lateness_ms);
    }

    pub fn recovery(outcome: &str) {
        RECOVERY_TOTAL.with_label_values(&[outcome]).inc();
    }

    /// Set the session state. Only the active state is 1.
    pub fn session_state_set(state: &str) {
        for s in &SESSION_STATES {
            SESSION_STATE.with_label_values(&[s]).set(0.0);
        }
        SESSION_STATE.with_label_values(&[state]).set(1.0);
    }

    pub fn circuit_state(reached: bool, order_placed: bool) {
        CIRCUIT_REACHED.set(i64::from(reached));
        CIRCUIT_ORDER_PLACED.set(i64::from(order_placed));
    }
}
