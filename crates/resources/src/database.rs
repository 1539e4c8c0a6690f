// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! `PostgreSQL` connection pool provider

use std::time::Duration;

use resource_client::{Resource, ResourceError, establish};
use serde::{Deserialize, Serialize};
use serde_with::{DurationSeconds, serde_as};
use sqlx::{
    PgPool,
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
};
use tracing::{Span, debug};

const RESOURCE_NAME: &str = "postgres";

// Database defaults
const DEFAULT_MAX_OPEN_CONNS: u32 = 10;
const DEFAULT_MAX_IDLE_CONNS: u32 = 5;
const DEFAULT_CONN_MAX_LIFETIME_SECONDS: u64 = 3600;
const DEFAULT_CONN_MAX_IDLE_TIME_SECONDS: u64 = 600;
const DEFAULT_QUERY_TIMEOUT_SECONDS: u64 = 5;

/// Connection parameters and pool bounds for the `PostgreSQL` pool
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// Server host name
    pub host: String,
    /// Server port
    pub port: u16,
    /// Login user
    pub user: String,
    /// Login password
    pub password: String,
    /// Database name
    pub name: String,
    /// SSL mode (`disable`, `prefer`, `require`, ...)
    pub ssl_mode: String,
    /// Upper bound on open connections
    pub max_open_conns: u32,
    /// Connections kept warm while the pool is idle
    pub max_idle_conns: u32,
    /// Maximum lifetime of a single connection
    #[serde_as(as = "DurationSeconds<u64>")]
    pub conn_max_lifetime: Duration,
    /// Maximum time a connection may sit idle
    #[serde_as(as = "DurationSeconds<u64>")]
    pub conn_max_idle_time: Duration,
    /// Bound for acquiring a connection, also used for the liveness check
    #[serde_as(as = "DurationSeconds<u64>")]
    pub query_timeout: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "user".to_string(),
            password: "password".to_string(),
            name: "app".to_string(),
            ssl_mode: "disable".to_string(),
            max_open_conns: DEFAULT_MAX_OPEN_CONNS,
            max_idle_conns: DEFAULT_MAX_IDLE_CONNS,
            conn_max_lifetime: Duration::from_secs(DEFAULT_CONN_MAX_LIFETIME_SECONDS),
            conn_max_idle_time: Duration::from_secs(DEFAULT_CONN_MAX_IDLE_TIME_SECONDS),
            query_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECONDS),
        }
    }
}

/// `PostgreSQL` connection pool
#[derive(Debug, Clone)]
pub struct PostgresPool {
    pool: PgPool,
}

impl PostgresPool {
    /// Build the pool without opening any connection
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::Configuration` if the SSL mode is not recognised
    pub fn open(config: &PostgresConfig) -> Result<Self, ResourceError> {
        let ssl_mode: PgSslMode =
            config
                .ssl_mode
                .parse()
                .map_err(|e: sqlx::Error| ResourceError::Configuration {
                    resource: RESOURCE_NAME,
                    message: e.to_string(),
                })?;

        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.name)
            .ssl_mode(ssl_mode);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_open_conns)
            .min_connections(config.max_idle_conns.min(config.max_open_conns))
            .max_lifetime(config.conn_max_lifetime)
            .idle_timeout(config.conn_max_idle_time)
            .acquire_timeout(config.query_timeout)
            .connect_lazy_with(options);

        debug!(
            host = %config.host,
            port = config.port,
            database = %config.name,
            max_open = config.max_open_conns,
            "postgres pool configured"
        );

        Ok(Self { pool })
    }

    /// Build the pool and confirm the server answers within `query_timeout`
    ///
    /// # Errors
    ///
    /// Returns `ResourceError` if the configuration is invalid or the server cannot be
    /// reached; the pool is closed before the error is returned.
    pub async fn connect(config: &PostgresConfig, span: &Span) -> Result<Self, ResourceError> {
        let pool = Self::open(config)?;
        establish(pool, config.query_timeout, span).await
    }

    /// Underlying sqlx pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl Resource for PostgresPool {
    fn name(&self) -> &'static str {
        RESOURCE_NAME
    }

    async fn ping(&self) -> Result<(), ResourceError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| ResourceError::connection(RESOURCE_NAME, e))
    }

    async fn close(&self) {
        self.pool.close().await;
        debug!("postgres pool closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pool_bounds() {
        let config = PostgresConfig::default();
        assert_eq!(config.max_open_conns, 10);
        assert_eq!(config.max_idle_conns, 5);
        assert_eq!(config.conn_max_lifetime, Duration::from_secs(3600));
        assert_eq!(config.conn_max_idle_time, Duration::from_secs(600));
        assert_eq!(config.query_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn open_is_lazy() {
        let config = PostgresConfig {
            max_idle_conns: 0,
            ..PostgresConfig::default()
        };

        let pool = PostgresPool::open(&config).expect("valid configuration");

        assert_eq!(pool.pool().size(), 0);
        assert_eq!(pool.name(), "postgres");
        pool.close().await;
        assert!(pool.pool().is_closed());
    }

    #[tokio::test]
    async fn open_rejects_unknown_ssl_mode() {
        let config = PostgresConfig {
            ssl_mode: "sometimes".to_string(),
            ..PostgresConfig::default()
        };

        let err = PostgresPool::open(&config).expect_err("unknown ssl mode");
        assert!(matches!(
            err,
            ResourceError::Configuration {
                resource: "postgres",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn connect_to_unreachable_server_fails() {
        let config = PostgresConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            max_idle_conns: 0,
            query_timeout: Duration::from_secs(1),
            ..PostgresConfig::default()
        };

        let err = PostgresPool::connect(&config, &Span::none())
            .await
            .expect_err("nothing listens on port 1");

        assert_eq!(err.resource(), "postgres");
    }
}
