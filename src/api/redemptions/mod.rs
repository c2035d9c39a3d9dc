// ============================================================================
// REDEMPTIONS API MODULE - Canje de códigos de cuota
// ============================================================================

pub mod admin_codes;
pub mod redeem;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::middleware::{extract_current_user, require_admin};
use crate::state::AppState;

/// Every route requires a JWT; `/admin` additionally requires the admin role.
pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let user_routes = Router::new()
        .route("/redeem", post(redeem::redeem_code))
        .route("/history", get(redeem::redemption_history));

    // Authentication is the outer layer, so it runs before the role check.
    let admin_routes = Router::new()
        .nest("/admin/codes", admin_codes::admin_codes_router())
        .layer(from_fn(require_admin));

    user_routes
        .merge(admin_routes)
        .layer(from_fn_with_state(state, extract_current_user))
}
