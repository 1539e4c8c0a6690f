// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Error handling module
//!
//! This module provides the error types for server operations, including the HTTP
//! response mapping used by handlers and the failure kinds the orchestrator reports
//! to the process entry point.

use std::time::Duration;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{container::ContainerError, validator::FieldViolation};

/// Error types for server operations
#[derive(Error, Debug)]
pub enum ServerError {
    /// Configuration loading or validation errors
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Network binding errors
    #[error("Failed to bind to {address}: {source}")]
    Bind {
        /// `host:port` address that failed to bind
        address: String,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Server startup errors
    #[error("Server startup failed: {source}")]
    Startup {
        /// Underlying IO error
        source: std::io::Error,
    },

    /// The listener stopped with an error while serving
    #[error("Listener failed: {source}")]
    Listener {
        /// Underlying IO error
        source: std::io::Error,
    },

    /// The listener returned without being asked to stop
    #[error("Listener exited unexpectedly")]
    ListenerExited,

    /// Server shutdown errors
    #[error("Server shutdown failed: {source}")]
    Shutdown {
        /// Underlying IO error
        source: std::io::Error,
    },

    /// In-flight requests did not drain within the grace period
    #[error("Graceful shutdown did not complete within {grace_period:?}")]
    ShutdownTimeout {
        /// Configured grace period
        grace_period: Duration,
    },

    /// Task join errors for async operations
    #[error("Task join error: {source}")]
    TaskJoin {
        /// Underlying tokio join error
        #[source]
        source: tokio::task::JoinError,
    },

    /// Dependency graph errors
    #[error("Dependency error: {0}")]
    Container(#[from] ContainerError),

    /// Input validation errors
    #[error("Validation error: {}", summarize(.errors))]
    Validation {
        /// One entry per failed field
        errors: Vec<FieldViolation>,
    },

    /// JSON parsing errors with detailed context
    #[error("Invalid JSON request: {message}")]
    JsonError {
        /// Detailed error message
        message: String,
    },
}

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;

fn summarize(errors: &[FieldViolation]) -> String {
    errors
        .iter()
        .map(|v| v.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

impl ServerError {
    /// HTTP status this error maps to
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::Validation { .. } | ServerError::JsonError { .. } => {
                StatusCode::BAD_REQUEST
            }
            ServerError::Container(_) | ServerError::ShutdownTimeout { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ServerError::Config { .. }
            | ServerError::Bind { .. }
            | ServerError::Startup { .. }
            | ServerError::Listener { .. }
            | ServerError::ListenerExited
            | ServerError::Shutdown { .. }
            | ServerError::TaskJoin { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut json_body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16()
        });

        if let ServerError::Validation { errors } = &self {
            json_body["details"] = serde_json::json!(errors);
        }

        (status, Json(json_body)).into_response()
    }
}

/// Convenient From implementations for common async error types
impl From<tokio::task::JoinError> for ServerError {
    fn from(source: tokio::task::JoinError) -> Self {
        Self::TaskJoin { source }
    }
}
