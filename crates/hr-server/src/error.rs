//! Error types for the HTTP server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Server error type.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Invalid bind address.
    #[error("Invalid address: {0}")]
    AddrParse(#[from] std::net::AddrParseError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Live reload endpoint error.
#[derive(Debug, thiserror::Error)]
pub enum LiveReloadError {
    /// Stream client limit reached.
    #[error("Too many live reload clients (limit {limit})")]
    TooManyClients {
        /// Configured maximum.
        limit: usize,
    },
}

impl IntoResponse for LiveReloadError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::TooManyClients { .. } => StatusCode::SERVICE_UNAVAILABLE,
        };

        (status, axum::Json(json!({"error": self.to_string()}))).into_response()
    }
}
