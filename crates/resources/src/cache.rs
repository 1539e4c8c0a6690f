// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Redis cache client provider

use std::{fmt, time::Duration};

use redis::{AsyncConnectionConfig, Client, aio::MultiplexedConnection};
use resource_client::{Resource, ResourceError, establish};
use serde::{Deserialize, Serialize};
use serde_with::{DurationSeconds, serde_as};
use tokio::sync::Mutex;
use tracing::{Span, debug};
use url::Url;

const RESOURCE_NAME: &str = "redis";

// Cache defaults
const DEFAULT_READ_TIMEOUT_SECONDS: u64 = 3;
const DEFAULT_WRITE_TIMEOUT_SECONDS: u64 = 3;

/// Connection parameters for the redis cache
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Server host name
    pub host: String,
    /// Server port
    pub port: u16,
    /// Password, empty when the server has no authentication
    pub password: String,
    /// Logical database index
    pub db: u32,
    /// Bound for a single command reply, also used for the liveness check
    #[serde_as(as = "DurationSeconds<u64>")]
    pub read_timeout: Duration,
    /// Bound for establishing the connection
    #[serde_as(as = "DurationSeconds<u64>")]
    pub write_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            password: String::new(),
            db: 0,
            read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECONDS),
            write_timeout: Duration::from_secs(DEFAULT_WRITE_TIMEOUT_SECONDS),
        }
    }
}

impl RedisConfig {
    /// Connection URL including credentials and database index
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::Configuration` if the host cannot form a valid URL
    pub fn url(&self) -> Result<Url, ResourceError> {
        let invalid = |message: String| ResourceError::Configuration {
            resource: RESOURCE_NAME,
            message,
        };

        let mut url = Url::parse(&format!("redis://{}:{}/{}", self.host, self.port, self.db))
            .map_err(|e| invalid(format!("invalid redis address: {e}")))?;

        if !self.password.is_empty() {
            url.set_password(Some(&self.password))
                .map_err(|()| invalid("redis url cannot carry a password".to_string()))?;
        }

        Ok(url)
    }
}

/// Redis cache client holding one multiplexed connection
pub struct RedisCache {
    client: Client,
    read_timeout: Duration,
    write_timeout: Duration,
    connection: Mutex<Option<MultiplexedConnection>>,
}

impl fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCache")
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .finish_non_exhaustive()
    }
}

impl RedisCache {
    /// Build the client without opening a connection
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::Configuration` if the connection URL is invalid
    pub fn open(config: &RedisConfig) -> Result<Self, ResourceError> {
        let url = config.url()?;
        let client = Client::open(url.as_str()).map_err(|e| ResourceError::Configuration {
            resource: RESOURCE_NAME,
            message: e.to_string(),
        })?;

        Ok(Self {
            client,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            connection: Mutex::new(None),
        })
    }

    /// Build the client and confirm the server answers within `read_timeout`
    ///
    /// # Errors
    ///
    /// Returns `ResourceError` if the configuration is invalid or the server cannot be
    /// reached; the client is closed before the error is returned.
    pub async fn connect(config: &RedisConfig, span: &Span) -> Result<Self, ResourceError> {
        let cache = Self::open(config)?;
        establish(cache, config.read_timeout, span).await
    }

    /// Shared multiplexed connection, opened on first use
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::Connection` if the server cannot be reached
    pub async fn connection(&self) -> Result<MultiplexedConnection, ResourceError> {
        let mut slot = self.connection.lock().await;
        if let Some(connection) = slot.as_ref() {
            return Ok(connection.clone());
        }

        let config = AsyncConnectionConfig::new()
            .set_response_timeout(self.read_timeout)
            .set_connection_timeout(self.write_timeout);

        let connection = self
            .client
            .get_multiplexed_async_connection_with_config(&config)
            .await
            .map_err(|e| ResourceError::connection(RESOURCE_NAME, e))?;

        *slot = Some(connection.clone());
        Ok(connection)
    }
}

impl Resource for RedisCache {
    fn name(&self) -> &'static str {
        RESOURCE_NAME
    }

    async fn ping(&self) -> Result<(), ResourceError> {
        let mut connection = self.connection().await?;
        let reply: String = redis::cmd("PING")
            .query_async(&mut connection)
            .await
            .map_err(|e| ResourceError::connection(RESOURCE_NAME, e))?;

        if reply == "PONG" {
            Ok(())
        } else {
            Err(ResourceError::connection(
                RESOURCE_NAME,
                format!("unexpected PING reply: {reply}"),
            ))
        }
    }

    async fn close(&self) {
        // the multiplexed pipeline shuts down once the last clone is dropped
        self.connection.lock().await.take();
        debug!("redis connection released");
    }
}
