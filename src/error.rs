//! Error type for chat exchanges.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Errors surfaced by a conversation exchange.
///
/// Every driver failure maps to [`ChatError::Upstream`] carrying the
/// rendered cause chain.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// The user submitted empty or whitespace-only text.
    #[error("message must not be empty")]
    EmptyMessage,
    /// The model API call failed.
    #[error("{0}")]
    Upstream(String),
    /// No conversation exists for the given session id.
    #[error("session not found: {0}")]
    SessionNotFound(String),
}

impl ChatError {
    /// Flatten a driver error (and its context chain) into an upstream error.
    pub fn upstream(err: &anyhow::Error) -> Self {
        Self::Upstream(format!("{err:#}"))
    }

    /// HTTP status used when this error reaches a handler.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::EmptyMessage => StatusCode::BAD_REQUEST,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}
