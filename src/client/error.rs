use thiserror::Error;

/// Errors from the VerifAI API client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure (connection refused, timeout, TLS).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body was not the JSON we expected.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Server answered with a non-success status.
    #[error("{detail} (HTTP {status})")]
    Status { status: u16, detail: String },

    /// 401 and no way to recover it (no refresh token, or the replay was rejected too).
    #[error("Not authenticated")]
    Unauthorized,

    /// The refresh call failed; stored tokens were cleared and the user must log in again.
    #[error("Session expired, please log in again")]
    SessionExpired,

    /// Token persistence failed.
    #[error("Token store error: {0}")]
    Store(String),
}

impl ClientError {
    /// Message suitable for a toast / status line
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Status { detail, .. } => detail.clone(),
            ClientError::Http(_) => "Could not reach the server".to_string(),
            other => other.to_string(),
        }
    }
}
