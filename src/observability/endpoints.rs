// ============================================================================
// PROMETHEUS METRICS ENDPOINT
// ============================================================================

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;

use crate::state::AppState;

/// Health and metrics endpoints, no authentication.
pub fn observability_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
}

/// Health check; reports the database only with the Postgres backend
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let database = state.database_healthy().await;
    let healthy = database.unwrap_or(true);

    let body = serde_json::json!({
        "status": if healthy { "healthy" } else { "unhealthy" },
        "database": match database {
            Some(true) => "healthy",
            Some(false) => "unhealthy",
            None => "not_configured",
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service": env!("CARGO_PKG_NAME"),
    });

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

/// Handler para el endpoint /metrics de Prometheus
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => {
            let body = String::from_utf8(buffer).unwrap_or_default();
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, encoder.format_type().to_string())],
                body,
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}
