// ============================================================================
// REDEEM ENDPOINT - Canje de códigos por cuota
// ============================================================================

use axum::{
    extract::{Query, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use shared::AppError;
use std::sync::Arc;

use crate::{
    api::common::ApiResponse,
    domains::redemption::UsageFact,
    middleware::auth::CurrentUser,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct RedeemResponse {
    pub quota: i64,
    pub code_id: i64,
    pub kind: &'static str,
}

/// Redeem a code for the authenticated user
///
/// # Endpoint
/// POST /api/v1/redemptions/redeem
///
/// # Returns
/// - 200 OK: `{ "quota": <credited> }`
/// - 400 Bad Request: empty key
/// - 404 Not Found: no such code
/// - 409 Conflict: used, disabled, expired or capped code
pub async fn redeem_code(
    State(state): State<Arc<AppState>>,
    Extension(current_user): Extension<CurrentUser>,
    Json(payload): Json<RedeemRequest>,
) -> Result<Json<ApiResponse<RedeemResponse>>, AppError> {
    let redeemed = state
        .redemption_service
        .redeem_detailed(&payload.key, current_user.user_id)
        .await?;

    let message = format!("Topped up {} quota", redeemed.quota);
    Ok(Json(ApiResponse::success_with_message(
        RedeemResponse {
            quota: redeemed.quota,
            code_id: redeemed.code_id,
            kind: redeemed.kind.as_str(),
        },
        message,
    )))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: i64,
}

fn default_history_limit() -> i64 {
    20
}

/// Most recent redemptions of the authenticated user
///
/// # Endpoint
/// GET /api/v1/redemptions/history?limit=20
pub async fn redemption_history(
    State(state): State<Arc<AppState>>,
    Extension(current_user): Extension<CurrentUser>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ApiResponse<Vec<UsageFact>>>, AppError> {
    let facts = state
        .redemption_service
        .user_history(current_user.user_id, query.limit)
        .await?;

    Ok(Json(ApiResponse::success(facts)))
}
