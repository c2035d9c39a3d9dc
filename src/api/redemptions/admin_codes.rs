//! Admin Codes API - gestión de códigos de canje
//!
//! Endpoints (rol `admin`):
//! - GET    /api/v1/redemptions/admin/codes              - Listar códigos
//! - GET    /api/v1/redemptions/admin/codes/search       - Buscar por id o prefijo de nombre
//! - GET    /api/v1/redemptions/admin/codes/grouped      - Agrupar por nombre
//! - GET    /api/v1/redemptions/admin/codes/:id          - Obtener detalle
//! - POST   /api/v1/redemptions/admin/codes              - Crear código
//! - PUT    /api/v1/redemptions/admin/codes/:id          - Actualizar código
//! - POST   /api/v1/redemptions/admin/codes/:id/enable   - Habilitar
//! - POST   /api/v1/redemptions/admin/codes/:id/disable  - Deshabilitar
//! - DELETE /api/v1/redemptions/admin/codes/:id          - Eliminar
//! - DELETE /api/v1/redemptions/admin/codes/by-name/:name - Eliminar lote por nombre
//! - DELETE /api/v1/redemptions/admin/codes/invalid      - Eliminar usados, deshabilitados y expirados

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use shared::AppError;
use std::sync::Arc;
use tracing::info;

use crate::api::common::ApiResponse;
use crate::domains::redemption::{
    CodeGroup, CodePatch, NewRedemptionCode, Page, PageRequest, RedemptionCode,
};
use crate::middleware::auth::CurrentUser;
use crate::state::AppState;

pub fn admin_codes_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_codes).post(create_code))
        .route("/search", get(search_codes))
        .route("/grouped", get(grouped_codes))
        .route("/invalid", delete(delete_invalid_codes))
        .route("/by-name/:name", delete(delete_codes_by_name))
        .route("/:id", get(get_code).put(update_code).delete(delete_code))
        .route("/:id/enable", post(enable_code))
        .route("/:id/disable", post(disable_code))
}

// ============================================================================
// MODELS
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub keyword: String,
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub page_size: Option<i64>,
}

impl SearchQuery {
    fn page(&self) -> PageRequest {
        let defaults = PageRequest::default();
        PageRequest::new(
            self.page.unwrap_or(defaults.page),
            self.page_size.unwrap_or(defaults.page_size),
        )
    }
}

#[derive(Debug, Serialize)]
pub struct DeletedCount {
    pub deleted: u64,
}

// ============================================================================
// HANDLERS
// ============================================================================

pub async fn list_codes(
    State(state): State<Arc<AppState>>,
    Query(page): Query<PageRequest>,
) -> Result<Json<ApiResponse<Page<RedemptionCode>>>, AppError> {
    let codes = state.admin_service.list(page).await?;
    Ok(Json(ApiResponse::success(codes)))
}

pub async fn search_codes(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<ApiResponse<Page<RedemptionCode>>>, AppError> {
    let codes = state.admin_service.search(&query.keyword, query.page()).await?;
    Ok(Json(ApiResponse::success(codes)))
}

pub async fn grouped_codes(
    State(state): State<Arc<AppState>>,
    Query(page): Query<PageRequest>,
) -> Result<Json<ApiResponse<Page<CodeGroup>>>, AppError> {
    let groups = state.admin_service.grouped_by_name(page).await?;
    Ok(Json(ApiResponse::success(groups)))
}

pub async fn get_code(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<RedemptionCode>>, AppError> {
    let code = state.admin_service.get(id).await?;
    Ok(Json(ApiResponse::success(code)))
}

pub async fn create_code(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<CurrentUser>,
    Json(payload): Json<NewRedemptionCode>,
) -> Result<(StatusCode, Json<ApiResponse<RedemptionCode>>), AppError> {
    let code = state.admin_service.create(payload).await?;
    info!(admin_id = admin.user_id, code_id = code.id(), "Admin created redemption code");
    Ok((StatusCode::CREATED, Json(ApiResponse::success(code))))
}

pub async fn update_code(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(patch): Json<CodePatch>,
) -> Result<Json<ApiResponse<RedemptionCode>>, AppError> {
    let code = state.admin_service.update(id, patch).await?;
    info!(admin_id = admin.user_id, code_id = id, "Admin updated redemption code");
    Ok(Json(ApiResponse::success(code)))
}

pub async fn enable_code(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<RedemptionCode>>, AppError> {
    let code = state.admin_service.set_status(id, true).await?;
    Ok(Json(ApiResponse::success(code)))
}

pub async fn disable_code(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<RedemptionCode>>, AppError> {
    let code = state.admin_service.set_status(id, false).await?;
    Ok(Json(ApiResponse::success(code)))
}

pub async fn delete_code(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<DeletedCount>>, AppError> {
    state.admin_service.delete(id).await?;
    info!(admin_id = admin.user_id, code_id = id, "Admin deleted redemption code");
    Ok(Json(ApiResponse::success(DeletedCount { deleted: 1 })))
}

pub async fn delete_codes_by_name(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<DeletedCount>>, AppError> {
    let deleted = state.admin_service.delete_by_name(&name).await?;
    Ok(Json(ApiResponse::success(DeletedCount { deleted })))
}

pub async fn delete_invalid_codes(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<DeletedCount>>, AppError> {
    let deleted = state.admin_service.delete_invalid().await?;
    Ok(Json(ApiResponse::success(DeletedCount { deleted })))
}
