pub mod common;
pub mod redemptions;

use axum::Router;
use std::sync::Arc;

use crate::state::AppState;

pub fn create_api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new().nest("/api/v1/redemptions", redemptions::router(state))
}
