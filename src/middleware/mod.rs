pub mod auth;

pub use auth::{
    extract_current_user,
    issue_jwt_token,
    require_admin,
    verify_jwt_token,
    CurrentUser,
    JwtClaims,
    ADMIN_ROLE,
};
