// ============================================================================
// PROMETHEUS METRICS - Canje de códigos de cuota
// ============================================================================

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec,
};

lazy_static! {
    // ========================================================================
    // HTTP REQUEST METRICS
    // ========================================================================

    /// Total de requests HTTP por método, endpoint y status
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "endpoint", "status"]
    )
    .unwrap();

    /// Duración de requests HTTP en segundos
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "endpoint"],
        vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // ========================================================================
    // REDEMPTION METRICS
    // ========================================================================

    /// Intentos de canje por tipo de código y resultado
    pub static ref REDEMPTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "redemptions_total",
        "Total redemption attempts by code kind and outcome",
        &["kind", "outcome"]
    )
    .unwrap();

    /// Cuota acreditada por tipo de código
    pub static ref QUOTA_CREDITED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "quota_credited_total",
        "Total quota credited through redemption codes",
        &["kind"]
    )
    .unwrap();

    /// Duración del canje, incluida la espera por el lock del código
    pub static ref REDEMPTION_PROCESSING_DURATION: HistogramVec = register_histogram_vec!(
        "redemption_processing_duration_seconds",
        "Time to process a redemption in seconds",
        &["outcome"],
        vec![0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0]
    )
    .unwrap();

    /// Hechos de uso que no se pudieron escribir después del commit
    pub static ref USAGE_FACT_APPEND_FAILURES: IntCounterVec = register_int_counter_vec!(
        "usage_fact_append_failures_total",
        "Usage facts that failed to persist after a committed redemption",
        &["kind"]
    )
    .unwrap();

    // ========================================================================
    // ADMIN METRICS
    // ========================================================================

    pub static ref ADMIN_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "redemption_admin_operations_total",
        "Administrative operations on redemption codes",
        &["operation", "status"]
    )
    .unwrap();

    // ========================================================================
    // AUTH METRICS
    // ========================================================================

    pub static ref AUTH_ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "auth_attempts_total",
        "Total authentication attempts",
        &["auth_type", "status"]
    )
    .unwrap();
}

/// Helper para registrar una request HTTP
pub fn record_http_request(method: &str, endpoint: &str, status: u16, duration_secs: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, endpoint, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, endpoint])
        .observe(duration_secs);
}

/// Helper para registrar autenticación
pub fn record_auth_attempt(auth_type: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    AUTH_ATTEMPTS_TOTAL
        .with_label_values(&[auth_type, status])
        .inc();
}

// ============================================================================
// REDEMPTION METRICS HELPERS
// ============================================================================

/// `kind` is "unknown" when the code was never loaded.
pub fn record_redemption(kind: &str, outcome: &str, duration_secs: f64) {
    REDEMPTIONS_TOTAL.with_label_values(&[kind, outcome]).inc();
    REDEMPTION_PROCESSING_DURATION
        .with_label_values(&[outcome])
        .observe(duration_secs);
}

pub fn record_quota_credited(kind: &str, quota: i64) {
    if quota > 0 {
        QUOTA_CREDITED_TOTAL
            .with_label_values(&[kind])
            .inc_by(quota as u64);
    }
}

pub fn record_fact_append_failure(kind: &str) {
    USAGE_FACT_APPEND_FAILURES.with_label_values(&[kind]).inc();
}

pub fn record_admin_operation(operation: &str, success: bool) {
    let status = if success { "success" } else { "error" };
    ADMIN_OPERATIONS_TOTAL
        .with_label_values(&[operation, status])
        .inc();
}
