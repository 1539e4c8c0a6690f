// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Server state management module
//!
//! This module provides the shared application state handed to every request handler:
//! configuration, the validator and the long-lived resource handles.

use std::sync::Arc;

use axum::extract::FromRef;
use resources::{PostgresPool, RedisCache};

use crate::{config::AppConfig, validator::Validator};

/// Shared application state
#[derive(Debug, Clone)]
pub struct ServerState {
    config: Arc<AppConfig>,
    validator: Validator,
    database: Arc<PostgresPool>,
    cache: Arc<RedisCache>,
}

impl ServerState {
    /// Create new server state
    ///
    /// # Arguments
    ///
    /// * `config` - Application configuration
    /// * `validator` - Payload validator
    /// * `database` - Database pool
    /// * `cache` - Cache client
    pub fn new(
        config: Arc<AppConfig>,
        validator: Validator,
        database: Arc<PostgresPool>,
        cache: Arc<RedisCache>,
    ) -> Self {
        Self {
            config,
            validator,
            database,
            cache,
        }
    }

    /// Application configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Payload validator
    pub fn validator(&self) -> Validator {
        self.validator
    }

    /// Database pool
    pub fn database(&self) -> &PostgresPool {
        &self.database
    }

    /// Cache client
    pub fn cache(&self) -> &RedisCache {
        &self.cache
    }
}

impl FromRef<ServerState> for Validator {
    fn from_ref(state: &ServerState) -> Self {
        state.validator
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// State backed by lazy resource handles that never touch the network
    pub(crate) fn lazy_state(config: AppConfig) -> ServerState {
        let database = PostgresPool::open(&config.db).expect("valid database config");
        let cache = RedisCache::open(&config.redis).expect("valid cache config");
        ServerState::new(
            Arc::new(config),
            Validator::new(),
            Arc::new(database),
            Arc::new(cache),
        )
    }
}
