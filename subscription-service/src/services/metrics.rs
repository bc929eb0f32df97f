//! Prometheus metrics for subscription-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

/// Counter for finished upload attempts by terminal stage.
pub static UPLOAD_OUTCOMES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "subscription_upload_outcomes_total",
        "Total number of subscription uploads by outcome",
        &["stage"]
    )
    .expect("Failed to register UPLOAD_OUTCOMES")
});

/// Counter for planned trade actions.
pub static PLANNED_ACTIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "subscription_planned_actions_total",
        "Total number of planned trade actions",
        &["action"]
    )
    .expect("Failed to register PLANNED_ACTIONS")
});

/// Histogram for extractor round trips.
pub static EXTRACTOR_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "subscription_extractor_duration_seconds",
        "Spreadsheet extractor call duration in seconds",
        &["status"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    )
    .expect("Failed to register EXTRACTOR_DURATION")
});

/// Histogram for database query duration.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "subscription_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Counter for errors.
pub static ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "subscription_errors_total",
        "Total number of errors",
        &["error_type"]
    )
    .expect("Failed to register ERRORS")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&UPLOAD_OUTCOMES);
    Lazy::force(&PLANNED_ACTIONS);
    Lazy::force(&EXTRACTOR_DURATION);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&ERRORS);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record the terminal stage of an upload attempt.
pub fn record_upload_outcome(stage: &str) {
    UPLOAD_OUTCOMES.with_label_values(&[stage]).inc();
}

/// Record planned inserts, cancellations and unmatched cancellations.
pub fn record_planned_actions(inserts: usize, cancellations: usize, unmatched: usize) {
    PLANNED_ACTIONS
        .with_label_values(&["insert"])
        .inc_by(inserts as f64);
    PLANNED_ACTIONS
        .with_label_values(&["cancel"])
        .inc_by(cancellations as f64);
    PLANNED_ACTIONS
        .with_label_values(&["unmatched_cancel"])
        .inc_by(unmatched as f64);
}

/// Record an extractor round trip.
pub fn record_extractor_call(status: &str, duration_secs: f64) {
    EXTRACTOR_DURATION
        .with_label_values(&[status])
        .observe(duration_secs);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    ERRORS.with_label_values(&[error_type]).inc();
}
