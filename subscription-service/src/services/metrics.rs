//! Prometheus metrics for subscription-service.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "subscription_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Subscription lifecycle transitions counter
pub static SUBSCRIPTION_OPERATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Gateway payment events counter
pub static PAYMENT_EVENTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    SUBSCRIPTION_OPERATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "subscription_operations_total",
                "Total subscription lifecycle transitions by operation"
            ),
            &["operation"]
        )
        .expect("Failed to register SUBSCRIPTION_OPERATIONS_TOTAL")
    });

    PAYMENT_EVENTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "subscription_payment_events_total",
                "Total gateway payment events by status and reconciliation outcome"
            ),
            &["status", "outcome"]
        )
        .expect("Failed to register PAYMENT_EVENTS_TOTAL")
    });
}

/// Record a subscription lifecycle transition.
pub fn record_subscription_operation(operation: &str) {
    if let Some(counter) = SUBSCRIPTION_OPERATIONS_TOTAL.get() {
        counter.with_label_values(&[operation]).inc();
    }
}

/// Record a reconciled gateway event.
pub fn record_payment_event(status: &str, outcome: &str) {
    if let Some(counter) = PAYMENT_EVENTS_TOTAL.get() {
        counter.with_label_values(&[status, outcome]).inc();
    }
}

/// Render all registered metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
