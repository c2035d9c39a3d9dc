use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use shared::AppError;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::observability::record_auth_attempt;
use crate::state::AppState;

/// Role allowed on the code administration routes.
pub const ADMIN_ROLE: &str = "admin";

/// JWT Claims structure matching the token payload
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JwtClaims {
    pub sub: String, // user_id as string
    #[serde(default = "default_role")]
    pub role: String,
    pub exp: i64,
    pub iat: i64,
}

fn default_role() -> String {
    "user".to_string()
}

/// Current user data extracted from JWT
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user_id: i64,
    pub role: String,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.role == ADMIN_ROLE
    }
}

pub const JWT_ALGORITHM: Algorithm = Algorithm::HS256;

/// Validates the Bearer token and stores a [`CurrentUser`] in the request extensions.
pub async fn extract_current_user(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let current_user = match authenticate(request.headers(), &state.jwt_secret) {
        Ok(user) => {
            record_auth_attempt("jwt", true);
            user
        }
        Err(e) => {
            record_auth_attempt("jwt", false);
            return Err(e);
        }
    };

    debug!(user_id = current_user.user_id, role = %current_user.role, "🔐 JWT authentication successful");

    request.extensions_mut().insert(current_user);
    Ok(next.run(request).await)
}

/// Must run after [`extract_current_user`].
pub async fn require_admin(request: Request, next: Next) -> Result<Response, AppError> {
    let Some(user) = request.extensions().get::<CurrentUser>() else {
        return Err(AppError::authentication("Authentication required"));
    };

    if !user.is_admin() {
        warn!(user_id = user.user_id, "Non-admin user attempted an admin operation");
        return Err(AppError::authorization("Administrator role required"));
    }

    Ok(next.run(request).await)
}

fn authenticate(headers: &HeaderMap, secret: &str) -> Result<CurrentUser, AppError> {
    let auth_header = headers
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .ok_or_else(|| {
            warn!("Missing Authorization header");
            AppError::authentication("Missing Authorization header")
        })?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            warn!("Invalid Authorization header format");
            AppError::authentication("Authorization header must be in format: Bearer <token>")
        })?;

    let claims = verify_jwt_token(token, secret).map_err(|e| {
        warn!("JWT validation failed: {}", e);
        match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                AppError::authentication("Token expired")
            }
            _ => AppError::authentication("Invalid token"),
        }
    })?;

    let user_id = claims
        .sub
        .parse::<i64>()
        .ok()
        .filter(|id| *id != 0)
        .ok_or_else(|| {
            warn!("Invalid user_id in JWT sub field: {}", claims.sub);
            AppError::authentication("Invalid user ID format in token")
        })?;

    Ok(CurrentUser {
        user_id,
        role: claims.role,
    })
}

pub fn verify_jwt_token(token: &str, secret: &str) -> Result<JwtClaims, jsonwebtoken::errors::Error> {
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    let validation = Validation::new(JWT_ALGORITHM);

    decode::<JwtClaims>(token, &decoding_key, &validation).map(|token_data| token_data.claims)
}

/// Signs a token for `user_id` valid for `ttl_seconds`.
pub fn issue_jwt_token(
    user_id: i64,
    role: &str,
    secret: &str,
    ttl_seconds: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = chrono::Utc::now().timestamp();
    let claims = JwtClaims {
        sub: user_id.to_string(),
        role: role.to_string(),
        exp: now + ttl_seconds,
        iat: now,
    };

    encode(
        &Header::new(JWT_ALGORITHM),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}
