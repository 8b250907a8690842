//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service and how each
//! variant is rendered as an HTTP response.

use crate::config::ConfigError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chat_core::{CoreError, PortError};
use serde_json::{json, Value};
use tracing::error;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A rule of the chat core rejected the request.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Conflict(String),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

impl ApiError {
    fn status_and_body(&self) -> (StatusCode, Value) {
        match self {
            ApiError::Core(core) => core_status_and_body(core),
            ApiError::Port(port) => port_status_and_body(port),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, json!({ "error": msg })),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, json!({ "error": msg })),
            ApiError::Config(_) | ApiError::Database(_) | ApiError::Io(_) | ApiError::Internal(_) => {
                internal()
            }
        }
    }
}

fn core_status_and_body(err: &CoreError) -> (StatusCode, Value) {
    let message = err.to_string();
    match err {
        CoreError::NotFound(_) => (StatusCode::NOT_FOUND, json!({ "error": message })),
        CoreError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, json!({ "error": message })),
        CoreError::InvalidState(_) => (StatusCode::CONFLICT, json!({ "error": message })),
        CoreError::QuotaExceeded {
            reset_seconds,
            tier,
            limit,
        } => (
            StatusCode::TOO_MANY_REQUESTS,
            json!({
                "error": message,
                "reset_seconds": reset_seconds,
                "tier": tier,
                "limit": limit,
            }),
        ),
        CoreError::UpstreamUnavailable(_) => (StatusCode::BAD_GATEWAY, json!({ "error": message })),
        CoreError::Port(port) => port_status_and_body(port),
    }
}

fn port_status_and_body(err: &PortError) -> (StatusCode, Value) {
    match err {
        PortError::NotFound(_) => (StatusCode::NOT_FOUND, json!({ "error": err.to_string() })),
        PortError::Unauthorized => (StatusCode::UNAUTHORIZED, json!({ "error": err.to_string() })),
        PortError::Unexpected(_) => internal(),
    }
}

fn internal() -> (StatusCode, Value) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({ "error": "Internal server error" }),
    )
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = self.status_and_body();
        if status.is_server_error() {
            error!(error = %self, "Request failed.");
        }
        (status, Json(body)).into_response()
    }
}
