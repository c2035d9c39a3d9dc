use shared::AppError;

/// Why a redemption (or an admin operation on a code) was refused.
#[derive(Debug, thiserror::Error)]
pub enum RedeemError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid redemption code")]
    NotFound,

    #[error("This redemption code has already been used")]
    AlreadyUsed,

    #[error("This gift code has been disabled")]
    Disabled,

    #[error("This redemption code has expired")]
    Expired,

    #[error("This gift code has reached its maximum number of users")]
    MaxUsersReached,

    #[error("You have reached the maximum number of uses for this gift code")]
    PerUserLimitReached,

    #[error("Unknown redemption code type: {0}")]
    UnknownType(i32),

    #[error("Storage failure: {0}")]
    Storage(String),
}

impl RedeemError {
    pub fn error_code(&self) -> &'static str {
        match self {
            RedeemError::InvalidInput(_) => "INVALID_INPUT",
            RedeemError::NotFound => "NOT_FOUND",
            RedeemError::AlreadyUsed => "ALREADY_USED",
            RedeemError::Disabled => "DISABLED",
            RedeemError::Expired => "EXPIRED",
            RedeemError::MaxUsersReached => "MAX_USERS_REACHED",
            RedeemError::PerUserLimitReached => "PER_USER_LIMIT_REACHED",
            RedeemError::UnknownType(_) => "UNKNOWN_TYPE",
            RedeemError::Storage(_) => "STORAGE_FAILURE",
        }
    }

    /// Rule refusals as opposed to infrastructure failures.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, RedeemError::Storage(_) | RedeemError::UnknownType(_))
    }
}

/// Errors raised inside store implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Unknown redemption code type: {0}")]
    UnknownType(i32),

    #[error("User {0} does not exist")]
    UserNotFound(i64),

    #[error("Duplicate redemption key")]
    DuplicateKey,

    #[error("Injected failure: {0}")]
    Injected(String),
}

impl From<StoreError> for RedeemError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UnknownType(kind) => RedeemError::UnknownType(kind),
            StoreError::DuplicateKey => RedeemError::InvalidInput("redemption key already exists".to_string()),
            other => RedeemError::Storage(other.to_string()),
        }
    }
}

impl From<RedeemError> for AppError {
    fn from(err: RedeemError) -> Self {
        match err {
            RedeemError::InvalidInput(message) => AppError::validation(message),
            RedeemError::NotFound => AppError::not_found("redemption code"),
            RedeemError::Storage(message) => AppError::internal(message),
            RedeemError::UnknownType(kind) => {
                AppError::internal(format!("unknown redemption code type {}", kind))
            }
            rejection => AppError::conflict(rejection.error_code(), rejection.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn rejections_map_to_conflict() {
        let app: AppError = RedeemError::PerUserLimitReached.into();
        assert_eq!(app.status_code(), StatusCode::CONFLICT);
        assert_eq!(app.error_code(), "PER_USER_LIMIT_REACHED");
    }

    #[test]
    fn storage_failures_are_internal() {
        let err: RedeemError = StoreError::UserNotFound(3).into();
        assert!(matches!(err, RedeemError::Storage(_)));
        assert!(!err.is_rejection());
        let app: AppError = err.into();
        assert_eq!(app.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn unknown_type_survives_conversion() {
        let err: RedeemError = StoreError::UnknownType(4).into();
        assert!(matches!(err, RedeemError::UnknownType(4)));
    }
}
