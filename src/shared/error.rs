//! Application Error Types
//!
//! HTTP errors with Axum integration, and handshake errors that map to
//! WebSocket close codes.

use axum::{
    extract::ws::close_code,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, 10001, msg.clone()),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, 10000, "Internal server error".into())
            }
        };

        (status, Json(ErrorResponse { code, message })).into_response()
    }
}

/// Why a socket was refused after upgrade.
///
/// Clients use the close code to decide between reconnecting straight away
/// and re-authenticating first.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    #[error("Missing token")]
    MissingToken,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("Internal error")]
    Internal,
}

impl HandshakeError {
    pub fn close_code(&self) -> u16 {
        match self {
            HandshakeError::MissingToken => close_code::INVALID,
            HandshakeError::InvalidToken | HandshakeError::TokenExpired => close_code::POLICY,
            HandshakeError::Internal => close_code::ERROR,
        }
    }
}
