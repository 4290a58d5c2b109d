//! Prometheus metrics for facility-billing-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

/// Counter for HTTP requests by route and status.
pub static HTTP_REQUESTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_http_requests_total",
        "Total number of HTTP requests",
        &["route", "status"]
    )
    .expect("Failed to register HTTP_REQUESTS")
});

/// Histogram for database query duration by operation.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "billing_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Counter for billing operations (journal/statement lifecycle).
pub static BILLING_OPERATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_operations_total",
        "Total number of billing operations",
        &["operation", "status"]
    )
    .expect("Failed to register BILLING_OPERATIONS")
});

/// Counter for reconciled/unreconciled order details.
pub static RECONCILED_ROWS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_reconciled_rows_total",
        "Order details changed by bulk reconciliation",
        &["direction", "status"]
    )
    .expect("Failed to register RECONCILED_ROWS")
});

/// Counter for notification emails.
pub static NOTIFICATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_notifications_total",
        "Account notification emails",
        &["status"]
    )
    .expect("Failed to register NOTIFICATIONS")
});

/// Counter for errors.
pub static ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_errors_total",
        "Total number of errors",
        &["error_type"]
    )
    .expect("Failed to register ERRORS")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&HTTP_REQUESTS);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&BILLING_OPERATIONS);
    Lazy::force(&RECONCILED_ROWS);
    Lazy::force(&NOTIFICATIONS);
    Lazy::force(&ERRORS);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Record a billing operation.
pub fn record_billing_operation(operation: &str, status: &str) {
    BILLING_OPERATIONS
        .with_label_values(&[operation, status])
        .inc();
}

/// Record reconciliation row outcomes.
pub fn record_reconciled_rows(direction: &str, status: &str, count: u64) {
    RECONCILED_ROWS
        .with_label_values(&[direction, status])
        .inc_by(count as f64);
}

/// Record a notification outcome.
pub fn record_notification(status: &str) {
    NOTIFICATIONS.with_label_values(&[status]).inc();
}

/// Record an error.
pub fn record_error(error_type: &str) {
    ERRORS.with_label_values(&[error_type]).inc();
}
