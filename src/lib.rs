use axum::{extract::DefaultBodyLimit, middleware as axum_middleware, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod api;
pub mod db;
pub mod domains;
pub mod middleware;
pub mod observability;
pub mod state;

use api::create_api_router;
use observability::{metrics_middleware, observability_router};
use state::AppState;

pub fn create_app_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        // Endpoints de monitoreo (sin autenticación)
        .merge(observability_router())
        .merge(create_api_router(app_state.clone()))
        .with_state(app_state)
        .layer(axum_middleware::from_fn(metrics_middleware))
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
