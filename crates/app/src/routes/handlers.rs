// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! HTTP request handlers module
//!
//! The service carries no domain logic; handlers answer with static payloads.

use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use serde_json::{Map, Value};

/// Status envelope returned by the probe handlers
#[derive(Debug, Serialize)]
pub struct StatusMessage {
    /// Human-readable message
    pub message: &'static str,
    /// Outcome, always `ok`
    pub status: &'static str,
}

/// `GET /`: empty JSON object
pub async fn index_handler() -> Json<Map<String, Value>> {
    Json(Map::new())
}

/// `GET /healthz`: liveness answer
pub async fn health_handler() -> Json<StatusMessage> {
    Json(StatusMessage {
        message: "pong",
        status: "ok",
    })
}

/// `GET /hello`
pub async fn hello_handler() -> Json<StatusMessage> {
    Json(StatusMessage {
        message: "Hello Handler",
        status: "ok",
    })
}

/// Any unmatched route
pub async fn not_found_handler() -> impl IntoResponse {
    let status = StatusCode::NOT_FOUND;
    (
        status,
        Json(serde_json::json!({
            "error": "resource not found",
            "status": status.as_u16()
        })),
    )
}
