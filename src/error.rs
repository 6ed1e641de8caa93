// Service-level error taxonomy
// Storage code speaks anyhow; everything a caller can act on is an AppError variant

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Request payload failed validation
    #[error("{0}")]
    Validation(String),

    /// Request conflicts with existing state (e.g. email already registered)
    #[error("{0}")]
    Conflict(String),

    #[error("Invalid email or password")]
    InvalidCredentials,

    /// Missing, invalid or expired bearer/refresh token
    #[error("{0}")]
    Unauthorized(String),

    #[error("Account locked until {until}")]
    AccountLocked { until: DateTime<Utc> },

    #[error("{0} not found")]
    NotFound(String),

    /// Email verification / password reset token unusable
    #[error("Invalid or expired {0} token")]
    InvalidVerificationToken(&'static str),

    /// A third-party dependency (OAuth provider) failed
    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn invalid_token() -> Self {
        AppError::Unauthorized("Invalid or expired token".to_string())
    }

    /// HTTP status code this error maps to
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation(_) => 422,
            AppError::Conflict(_) => 400,
            AppError::InvalidCredentials | AppError::Unauthorized(_) => 401,
            AppError::AccountLocked { .. } => 403,
            AppError::NotFound(_) => 404,
            AppError::InvalidVerificationToken(_) => 400,
            AppError::Upstream(_) => 502,
            AppError::Internal(_) => 500,
        }
    }

    /// Message safe to show to an end user
    pub fn public_detail(&self) -> String {
        match self {
            AppError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::Internal(err.into())
    }
}

pub type AppResult<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::validation("bad").status_code(), 422);
        assert_eq!(AppError::InvalidCredentials.status_code(), 401);
        assert_eq!(AppError::NotFound("User".into()).status_code(), 404);
        assert_eq!(
            AppError::AccountLocked { until: Utc::now() }.status_code(),
            403
        );
    }

    #[test]
    fn test_internal_detail_is_generic() {
        let err = AppError::from(anyhow::anyhow!("disk on fire"));
        assert_eq!(err.public_detail(), "Internal server error");
        assert_eq!(
            AppError::InvalidVerificationToken("reset").public_detail(),
            "Invalid or expired reset token"
        );
    }
}
