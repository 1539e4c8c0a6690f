// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Test fixtures backed by lazy resource handles
//!
//! The database pool and cache client are built without connecting, so the HTTP stack
//! can be exercised without a running database or cache.

#![allow(dead_code)]

use std::sync::Arc;

use app::{
    AppConfig, Container, ContainerBuilder, ServerState, providers, validator::Validator,
};
use resources::{PostgresPool, RedisCache};

/// Request state for `config` without network access
pub fn lazy_state(config: AppConfig) -> ServerState {
    let database = PostgresPool::open(&config.db).expect("valid database config");
    let cache = RedisCache::open(&config.redis).expect("valid cache config");
    ServerState::new(
        Arc::new(config),
        Validator::new(),
        Arc::new(database),
        Arc::new(cache),
    )
}

/// Full dependency graph for `config` with lazy database and cache providers
pub fn lazy_container(config: AppConfig) -> Container {
    let db = config.db.clone();
    let redis = config.redis.clone();

    let mut builder = ContainerBuilder::new();
    providers::register_core(&mut builder, config).expect("core providers");
    builder
        .register_resource(&[], move |_| {
            let db = db.clone();
            async move { anyhow::Ok(PostgresPool::open(&db)?) }
        })
        .expect("database provider")
        .register_resource(&[], move |_| {
            let redis = redis.clone();
            async move { anyhow::Ok(RedisCache::open(&redis)?) }
        })
        .expect("cache provider");
    providers::register_web(&mut builder).expect("web providers");
    builder.build()
}
