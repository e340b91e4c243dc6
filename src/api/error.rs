//! Error taxonomy for calls to the media server

use thiserror::Error;

use crate::session::StorageError;

/// Errors surfaced by the API client and the auth components
#[derive(Error, Debug)]
pub enum ApiError {
    /// No response was received (connect failure, timeout, reset)
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({0})")]
    ServerError(u16),

    /// A 4xx other than 401
    #[error("Request rejected ({status}): {message}")]
    ClientError { status: u16, message: String },

    /// 401 that survived a token refresh, or a refresh that was impossible
    #[error("Not authenticated")]
    Auth,

    #[error("Circuit open for {0}, request not attempted")]
    CircuitOpen(String),

    /// Login flow expired or timed out
    #[error("Login session expired")]
    SessionExpired,

    #[error("Login was cancelled")]
    FlowCancelled,

    #[error("No login in progress for session {0}")]
    UnknownFlow(String),

    #[error("No media server configured")]
    NoServer,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ApiError {
    /// Classify a non-success HTTP status
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 => ApiError::Auth,
            500..=599 => ApiError::ServerError(status),
            _ => ApiError::ClientError {
                status,
                message: summarize_body(body),
            },
        }
    }

    /// HTTP status carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::ServerError(status) | ApiError::ClientError { status, .. } => Some(*status),
            ApiError::Auth => Some(401),
            _ => None,
        }
    }

    /// UI should send the user back to login
    pub fn requires_login(&self) -> bool {
        matches!(self, ApiError::Auth | ApiError::SessionExpired)
    }

    /// UI should show the server-down banner
    pub fn is_server_unavailable(&self) -> bool {
        matches!(
            self,
            ApiError::Network(_) | ApiError::ServerError(_) | ApiError::CircuitOpen(_)
        )
    }
}

/// Pull a short human message out of an error body
fn summarize_body(body: &str) -> String {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        #[serde(alias = "error")]
        message: String,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        return parsed.message;
    }
    let trimmed = body.trim();
    if trimmed.chars().count() > 200 {
        let cut: String = trimmed.chars().take(200).collect();
        format!("{}...", cut)
    } else {
        trimmed.to_string()
    }
}
