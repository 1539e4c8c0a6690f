// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Database and cache resource providers
//!
//! This crate provides implementations of the `Resource` trait for the long-lived
//! external handles the service depends on, along with their configuration records.
//!
//! # Architecture
//!
//! - **Database**: [`database::PostgresPool`] - sqlx connection pool with configured bounds
//! - **Cache**: [`cache::RedisCache`] - multiplexed redis client
//!
//! Both providers follow the same pattern: `open` builds the handle without touching the
//! network, `connect` opens it and runs a bounded liveness check through
//! [`resource_client::establish`], closing the handle again if the check fails.

pub mod cache;
pub mod database;

pub use cache::{RedisCache, RedisConfig};
pub use database::{PostgresConfig, PostgresPool};
