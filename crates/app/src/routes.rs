// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Routes module
//!
//! This module provides route configuration and the middleware pipeline wrapped around
//! every route. Stages run outermost first:
//!
//! 1. panic isolation
//! 2. request id assignment, request span and id propagation
//! 3. per-request timeout
//! 4. client address resolution
//! 5. rate limiting per client and endpoint
//! 6. heartbeat on `/ping`
//! 7. body size ceiling
//! 8. content-type allow-list
//! 9. CORS
//! 10. security headers

pub mod handlers;

use axum::{
    Router,
    extract::Request,
    http::HeaderName,
    middleware::{from_fn, from_fn_with_state},
    routing::get,
};
use handlers::{health_handler, hello_handler, index_handler, not_found_handler};
use tower_http::{
    catch_panic::CatchPanicLayer,
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, info_span};

use crate::{
    error::ServerResult,
    middleware::{
        RateLimiter, cors_layer, heartbeat, panic_response, rate_limit, require_json,
        resolve_client_addr, security_headers,
    },
    state::ServerState,
};

const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Create the application router with its middleware pipeline
///
/// # Errors
///
/// Returns `ServerError::Config` if the CORS configuration is malformed.
pub fn create_router(state: ServerState) -> ServerResult<Router> {
    let api = &state.config().server.api;
    let cors = cors_layer(&state.config().server.cors)?;
    let rate_limiter = RateLimiter::per_minute(api.rate_limit);

    let mut router = Router::new()
        .route("/", get(index_handler))
        .route("/healthz", get(health_handler))
        .route("/hello", get(hello_handler))
        .fallback(not_found_handler)
        .layer(from_fn(security_headers))
        .layer(cors)
        .layer(from_fn(require_json))
        .layer(RequestBodyLimitLayer::new(api.max_body_size))
        .layer(from_fn(heartbeat));

    // Only apply rate limiting middleware if enabled
    if let Some(rate_limiter) = rate_limiter {
        router = router.layer(from_fn_with_state(rate_limiter, rate_limit));
    }

    Ok(router
        .layer(from_fn(resolve_client_addr))
        .layer(TimeoutLayer::new(api.write_timeout))
        .layer(PropagateRequestIdLayer::new(REQUEST_ID_HEADER))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request| {
                    let request_id = req
                        .headers()
                        .get(REQUEST_ID_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("unknown");
                    info_span!(
                        "http_request",
                        request_id,
                        method = %req.method(),
                        path = %req.uri().path(),
                    )
                })
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(REQUEST_ID_HEADER, MakeRequestUuid))
        .layer(CatchPanicLayer::custom(panic_response))
        .with_state(state))
}
