// ============================================================================
// MIDDLEWARE PARA MÉTRICAS AUTOMÁTICAS
// ============================================================================

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::observability::record_http_request;

/// Registra método, ruta normalizada, status y duración de cada request
pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let normalized_path = normalize_path(req.uri().path());

    let response = next.run(req).await;

    let duration = start.elapsed().as_secs_f64();
    record_http_request(&method, &normalized_path, response.status().as_u16(), duration);

    response
}

/// Collapses ids and code names so label cardinality stays bounded.
fn normalize_path(path: &str) -> String {
    let mut normalized = Vec::new();
    let mut after_by_name = false;

    for seg in path.split('/') {
        if after_by_name {
            normalized.push(":name".to_string());
            after_by_name = false;
        } else if seg.parse::<i64>().is_ok() {
            normalized.push(":id".to_string());
        } else {
            after_by_name = seg == "by-name";
            normalized.push(seg.to_string());
        }
    }

    normalized.join("/")
}
