// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Middleware module for HTTP request processing
//!
//! This module provides the request-processing stages the router composes around every
//! handler: client address resolution, sliding-window rate limiting, the heartbeat
//! endpoint, content-type enforcement, CORS, fixed security headers and panic isolation.

use std::{
    any::Any,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
    http::{
        HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
        header::{CONTENT_LENGTH, CONTENT_TYPE, RETRY_AFTER, TRANSFER_ENCODING},
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer, ExposeHeaders};
use tracing::{debug, error, warn};

use crate::{
    config::CorsConfig,
    error::{ServerError, ServerResult},
};

// Rate limiting constants
const RATE_LIMIT_WINDOW_SECONDS: u64 = 60;
const MAX_RATE_LIMIT_ENTRIES: usize = 10_000;

const HEARTBEAT_PATH: &str = "/ping";
const ALLOWED_CONTENT_TYPES: [&str; 1] = ["application/json"];
const WILDCARD: &str = "*";

const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Headers added to every handled response
pub const SECURITY_HEADERS: [(&str, &str); 11] = [
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "deny"),
    ("x-dns-prefetch-control", "off"),
    ("x-download-options", "noopen"),
    ("content-security-policy", "default-src 'none'"),
    ("referrer-policy", "no-referrer"),
    (
        "strict-transport-security",
        "max-age=31536000; includeSubDomains",
    ),
    ("cache-control", "no-store, no-cache"),
    ("cross-origin-resource-policy", "same-origin"),
    ("cross-origin-opener-policy", "same-origin"),
    (
        "permissions-policy",
        "camera=(), microphone=(), geolocation=()",
    ),
];

/// Address of the client that sent the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr(pub IpAddr);

/// Record the client address as a request extension
///
/// Proxy headers win over the peer address: `True-Client-IP`, then `X-Real-IP`, then the
/// first `X-Forwarded-For` entry.
pub async fn resolve_client_addr(mut req: Request, next: Next) -> Response {
    let addr = client_addr(&req);
    req.extensions_mut().insert(ClientAddr(addr));
    next.run(req).await
}

fn client_addr(req: &Request) -> IpAddr {
    let headers = req.headers();
    let header_ip = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
    };

    header_ip("true-client-ip")
        .or_else(|| header_ip("x-real-ip"))
        .or_else(|| header_ip("x-forwarded-for"))
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
        })
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Rate limit bucket: one client on one endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// Client address
    pub client: IpAddr,
    /// Request path
    pub endpoint: String,
}

/// Outcome of a rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Requests permitted per window
    pub limit: u32,
    /// Requests left in the current window
    pub remaining: u32,
    /// Time until the current window ends
    pub reset_after: Duration,
}

/// Sliding-window rate limiter state
#[derive(Debug, Clone)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    // Lock-free concurrent rate limiting using DashMap
    counters: Arc<DashMap<RateLimitKey, WindowCounter>>,
}

#[derive(Debug, Clone)]
struct WindowCounter {
    window_start: Instant,
    previous: u32,
    current: u32,
}

impl WindowCounter {
    fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            previous: 0,
            current: 0,
        }
    }

    /// Roll the window forward so that `now` falls inside it
    fn advance(&mut self, now: Instant, window: Duration) {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < window {
            return;
        }

        if elapsed < window * 2 {
            self.previous = self.current;
            self.window_start += window;
        } else {
            self.previous = 0;
            self.window_start = now;
        }
        self.current = 0;
    }
}

impl RateLimiter {
    /// Limiter allowing `requests_per_minute` per client and endpoint, `None` when 0
    pub fn per_minute(requests_per_minute: u32) -> Option<Self> {
        (requests_per_minute > 0).then(|| {
            Self::new(
                requests_per_minute,
                Duration::from_secs(RATE_LIMIT_WINDOW_SECONDS),
            )
        })
    }

    /// Limiter allowing `limit` requests per `window`
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            counters: Arc::new(DashMap::new()),
        }
    }

    /// Count a request for `key` at the current time
    pub fn check(&self, key: RateLimitKey) -> RateLimitDecision {
        self.check_at(key, Instant::now())
    }

    /// Count a request for `key` at `now`
    ///
    /// The estimate weights the previous window by how much of it still overlaps the
    /// sliding window ending at `now`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn check_at(&self, key: RateLimitKey, now: Instant) -> RateLimitDecision {
        // Periodically clean up expired entries to prevent memory leaks
        if self.counters.len() > MAX_RATE_LIMIT_ENTRIES {
            self.cleanup_expired_entries(now);
        }

        let mut counter = self
            .counters
            .entry(key)
            .or_insert_with(|| WindowCounter::new(now));
        counter.advance(now, self.window);

        let reset_after = self
            .window
            .saturating_sub(now.saturating_duration_since(counter.window_start));
        let overlap = reset_after.as_secs_f64() / self.window.as_secs_f64();
        let estimate = f64::from(counter.previous) * overlap + f64::from(counter.current);
        let limit = f64::from(self.limit);

        let allowed = estimate < limit;
        if allowed {
            counter.current = counter.current.saturating_add(1);
        }

        let used = if allowed { estimate + 1.0 } else { estimate };
        let remaining = (limit - used.ceil()).max(0.0) as u32;

        RateLimitDecision {
            allowed,
            limit: self.limit,
            remaining,
            reset_after,
        }
    }

    /// Clean up expired entries using efficient retain operation
    fn cleanup_expired_entries(&self, now: Instant) {
        let entries_before = self.counters.len();
        let horizon = self.window * 2;

        // Use DashMap's retain for efficient concurrent cleanup
        self.counters
            .retain(|_, counter| now.saturating_duration_since(counter.window_start) < horizon);

        let entries_after = self.counters.len();
        let cleaned_up = entries_before.saturating_sub(entries_after);

        if cleaned_up > 0 {
            debug!("cleaned up {} expired rate limiter entries", cleaned_up);
        }

        // If still too many entries, remove oldest ones
        if entries_after > MAX_RATE_LIMIT_ENTRIES {
            warn!(
                "rate limiter still has {} entries after cleanup, removing oldest",
                entries_after
            );

            // Collect oldest entries for removal
            let mut oldest_entries: Vec<_> = self
                .counters
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().window_start))
                .collect();

            oldest_entries.sort_by_key(|(_, window_start)| *window_start);

            let entries_to_remove = entries_after - MAX_RATE_LIMIT_ENTRIES / 2;
            for (key, _) in oldest_entries.into_iter().take(entries_to_remove) {
                self.counters.remove(&key);
            }
        }
    }
}

/// Rate limiting middleware function
pub async fn rate_limit(
    State(rate_limiter): State<RateLimiter>,
    req: Request,
    next: Next,
) -> Response {
    let client = req
        .extensions()
        .get::<ClientAddr>()
        .map_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED), |ClientAddr(ip)| *ip);
    let key = RateLimitKey {
        client,
        endpoint: req.uri().path().to_string(),
    };

    let decision = rate_limiter.check(key);
    if !decision.allowed {
        warn!(client = %client, path = %req.uri().path(), "rate limit exceeded");
        let mut response = (StatusCode::TOO_MANY_REQUESTS, "Too Many Requests").into_response();
        let retry_after = decision.reset_after.as_secs().max(1);
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(retry_after));
        insert_rate_limit_headers(response.headers_mut(), &decision);
        return response;
    }

    let mut response = next.run(req).await;
    insert_rate_limit_headers(response.headers_mut(), &decision);
    response
}

fn insert_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    let reset_at = SystemTime::now()
        .checked_add(decision.reset_after)
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs());

    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(reset_at));
}

/// Answer `GET`/`HEAD /ping` without reaching the router
pub async fn heartbeat(req: Request, next: Next) -> Response {
    let is_probe = req.method() == Method::GET || req.method() == Method::HEAD;
    if is_probe && req.uri().path().eq_ignore_ascii_case(HEARTBEAT_PATH) {
        return ([(CONTENT_TYPE, "text/plain")], ".").into_response();
    }
    next.run(req).await
}

/// Reject request bodies whose media type is not allowed
pub async fn require_json(req: Request, next: Next) -> Response {
    if !carries_body(req.headers()) {
        return next.run(req).await;
    }

    let media_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or_default().trim().to_ascii_lowercase());

    match media_type {
        Some(t) if ALLOWED_CONTENT_TYPES.contains(&t.as_str()) => next.run(req).await,
        other => {
            debug!(content_type = ?other, "unsupported media type");
            StatusCode::UNSUPPORTED_MEDIA_TYPE.into_response()
        }
    }
}

fn carries_body(headers: &HeaderMap) -> bool {
    match headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
    {
        Some(length) => length > 0,
        None => headers.contains_key(TRANSFER_ENCODING),
    }
}

/// Add the fixed security headers to the response
pub async fn security_headers(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    for (name, value) in SECURITY_HEADERS {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }
    response
}

/// Build the CORS layer from configuration
///
/// A `*` entry in the origin, method or request header list mirrors what the request
/// asks for, so that credentials remain allowed. A `*` exposed header is only accepted
/// without credentials.
///
/// # Errors
///
/// Returns `ServerError::Config` if an origin, method or header name is malformed, or if
/// every header is exposed while credentials are allowed
pub fn cors_layer(config: &CorsConfig) -> ServerResult<CorsLayer> {
    let invalid = |kind: &str, value: &str| ServerError::Config {
        message: format!("invalid CORS {kind}: {value}"),
    };
    let wildcard = |values: &[String]| values.iter().any(|v| v == WILDCARD);

    let origin = if wildcard(&config.allowed_origins) {
        AllowOrigin::mirror_request()
    } else {
        let origins = config
            .allowed_origins
            .iter()
            .map(|o| HeaderValue::from_str(o).map_err(|_| invalid("origin", o)))
            .collect::<ServerResult<Vec<_>>>()?;
        AllowOrigin::list(origins)
    };

    let methods = if wildcard(&config.allowed_methods) {
        AllowMethods::mirror_request()
    } else {
        let methods = config
            .allowed_methods
            .iter()
            .map(|m| Method::from_bytes(m.as_bytes()).map_err(|_| invalid("method", m)))
            .collect::<ServerResult<Vec<_>>>()?;
        AllowMethods::list(methods)
    };

    let header_names = |names: &[String]| {
        names
            .iter()
            .map(|h| HeaderName::from_bytes(h.as_bytes()).map_err(|_| invalid("header", h)))
            .collect::<ServerResult<Vec<_>>>()
    };

    let headers = if wildcard(&config.allowed_headers) {
        AllowHeaders::mirror_request()
    } else {
        AllowHeaders::list(header_names(&config.allowed_headers)?)
    };

    let exposed = match (wildcard(&config.exposed_headers), config.allow_credentials) {
        (true, true) => {
            return Err(ServerError::Config {
                message: "CORS exposed headers cannot be * while credentials are allowed"
                    .to_string(),
            });
        }
        (true, false) => ExposeHeaders::any(),
        (false, _) => ExposeHeaders::list(header_names(&config.exposed_headers)?),
    };

    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(methods)
        .allow_headers(headers)
        .expose_headers(exposed)
        .allow_credentials(config.allow_credentials))
}

/// Convert a caught handler panic into a JSON 500 response
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic payload");
    error!(panic = detail, "request handler panicked");

    let status = StatusCode::INTERNAL_SERVER_ERROR;
    (
        status,
        Json(serde_json::json!({
            "error": "an unexpected internal error occurred",
            "status": status.as_u16()
        })),
    )
        .into_response()
}
