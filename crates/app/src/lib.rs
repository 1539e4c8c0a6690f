// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! HTTP Service Bootstrap
//!
//! This crate assembles an HTTP service from its long-lived parts and runs it: it loads
//! configuration, builds a typed dependency graph of resources and web components, wires
//! the middleware pipeline, and supervises the listener until a graceful shutdown.
//!
//! # Module Structure
//!
//! - [`config`]: Layered configuration with documented defaults
//! - [`container`]: Typed dependency graph with lazy singleton construction
//! - [`providers`]: Registration of every capability the service needs
//! - [`server`]: Listener supervision, signal handling and bounded drain
//! - [`routes`]: Route table and middleware pipeline
//! - [`middleware`]: Rate limiting, heartbeat, content-type, CORS and security headers
//! - [`state`]: Shared request state
//! - [`validator`] and [`extractors`]: Validated JSON request payloads for handlers
//!   mounted on [`ServerState`]
//! - [`telemetry`]: Structured logging setup and the logger capability
//! - [`error`]: Error types and HTTP response mapping
//!
//! # Key Features
//!
//! - **Fail-fast startup**: Resources are probed on construction and closed if unreachable
//! - **Graceful Shutdown**: Coordinated termination using `CancellationToken` with a
//!   deadline-bounded drain
//! - **Ordered teardown**: Resources are released in reverse acquisition order
//! - **Rate Limiting**: Sliding window per client address and endpoint

pub mod config;
pub mod container;
pub mod error;
pub mod extractors;
pub mod middleware;
pub mod providers;
pub mod routes;
pub mod server;
pub mod state;
pub mod telemetry;
pub mod validator;

pub use config::{AppConfig, Environment};
pub use container::{Capability, Container, ContainerBuilder, ContainerError};
pub use error::{ServerError, ServerResult};
pub use extractors::ValidatedJson;
pub use server::{HttpServer, Lifecycle, Listen, Server, ShutdownConfig};
pub use state::ServerState;
pub use validator::{Checks, Validate, Validator};
