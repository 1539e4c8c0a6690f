// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Application configuration module
//!
//! This module provides the configuration tree for the service: HTTP listener settings,
//! rate limiting, CORS policy, resource connection parameters and logging. The tree is
//! loaded once at startup, validated, and shared read-only afterwards.

use std::{
    net::Ipv6Addr,
    path::Path,
    time::Duration,
};

use anyhow::{Result, ensure};
use config::{Config, ConfigError, Environment as ConfigEnv, File, Map};
use resources::{PostgresConfig, RedisConfig};
use serde::{Deserialize, Serialize};
use serde_with::{DurationSeconds, serde_as};

use crate::error::{ServerError, ServerResult};

// Configuration sources
const ENV_PREFIX: &str = "APP";
const ENV_SEPARATOR: &str = "__";
const ENV_SELECTOR: &str = "APP_GENERAL__ENV";
const LIST_KEYS: [&str; 4] = [
    "server.cors.allowed_origins",
    "server.cors.allowed_methods",
    "server.cors.allowed_headers",
    "server.cors.exposed_headers",
];

/// Environment types for configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Production environment
    Production,
    /// Development environment
    Development,
    /// Testing environment
    Testing,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON structured records
    #[default]
    Json,
    /// Human-readable lines
    Text,
}

/// Fully resolved application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Deployment settings
    pub general: GeneralConfig,
    /// Logging settings
    pub logger: LoggerConfig,
    /// HTTP server settings
    pub server: HttpConfig,
    /// Database connection parameters and pool bounds
    pub db: PostgresConfig,
    /// Cache connection parameters
    pub redis: RedisConfig,
}

/// Deployment settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Environment type
    pub env: Environment,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Minimum level (`debug`, `info`, `warn`, `error`)
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Listener and request limits
    pub api: ApiConfig,
    /// Cross-origin policy
    pub cors: CorsConfig,
}

/// Listener and request limits
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Bind host, an IP literal or a name resolved at bind time
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Requests per minute per client and endpoint, 0 disables limiting
    pub rate_limit: u32,
    /// Time allowed for reading a request
    #[serde_as(as = "DurationSeconds<u64>")]
    pub read_timeout: Duration,
    /// Time allowed for producing a response, also the shutdown grace period
    #[serde_as(as = "DurationSeconds<u64>")]
    pub write_timeout: Duration,
    /// Keep-alive idle time
    #[serde_as(as = "DurationSeconds<u64>")]
    pub idle_timeout: Duration,
    /// Request body ceiling in bytes
    pub max_body_size: usize,
}

/// Cross-origin policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins, `*` matches any origin
    pub allowed_origins: Vec<String>,
    /// Allowed request methods
    pub allowed_methods: Vec<String>,
    /// Allowed request headers
    pub allowed_headers: Vec<String>,
    /// Response headers exposed to scripts
    pub exposed_headers: Vec<String>,
    /// Whether credentials may accompany cross-origin requests
    pub allow_credentials: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig {
                env: Environment::Development,
            },
            logger: LoggerConfig {
                level: "info".to_string(),
                format: LogFormat::Json,
            },
            server: HttpConfig {
                api: ApiConfig {
                    host: "0.0.0.0".to_string(),
                    port: 8080,
                    rate_limit: 100,
                    read_timeout: Duration::from_secs(5),
                    write_timeout: Duration::from_secs(10),
                    idle_timeout: Duration::from_secs(120),
                    max_body_size: 1_048_576,
                },
                cors: CorsConfig {
                    allowed_origins: vec!["*".to_string()],
                    allowed_methods: vec!["GET".to_string(), "POST".to_string()],
                    allowed_headers: vec!["Content-Type".to_string(), "Authorization".to_string()],
                    exposed_headers: Vec::new(),
                    allow_credentials: true,
                },
            },
            db: PostgresConfig::default(),
            redis: RedisConfig::default(),
        }
    }
}

impl AppConfig {
    /// Create configuration from the `.env` file, configuration files in the working
    /// directory and `APP_` environment variables
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Config` if the `.env` file is unreadable or the resulting
    /// configuration is invalid. A missing `.env` file is not an error.
    pub fn from_env() -> ServerResult<Self> {
        if let Err(e) = dotenvy::dotenv()
            && !e.not_found()
        {
            return Err(ServerError::Config {
                message: format!("error loading .env file: {e}"),
            });
        }

        Self::load_from(".").map_err(|e| ServerError::Config {
            message: format!("failed to load configuration: {e}"),
        })
    }

    /// Load configuration using the config crate with hierarchical sources
    ///
    /// Configuration is loaded in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. Configuration file (`config.{toml,json,yaml}` in `dir`)
    /// 3. Environment-specific file (`config.{env}.*` in `dir`)
    /// 4. Environment variables with `APP_` prefix and `__` nesting
    ///    (e.g. `APP_SERVER__API__PORT`)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if configuration cannot be loaded or is invalid.
    pub fn load_from(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::load(dir.as_ref(), None)
    }

    /// Load from `dir`, reading variables from `vars` instead of the process environment
    /// when given
    fn load(dir: &Path, vars: Option<Map<String, String>>) -> Result<Self, ConfigError> {
        let env_name = match &vars {
            Some(vars) => vars.get(ENV_SELECTOR).cloned(),
            None => std::env::var(ENV_SELECTOR).ok(),
        }
        .unwrap_or_else(|| "development".to_string())
        .to_lowercase();

        let mut env_source = ConfigEnv::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator(ENV_SEPARATOR)
            .list_separator(",")
            .try_parsing(true)
            .source(vars);
        for key in LIST_KEYS {
            env_source = env_source.with_list_parse_key(key);
        }

        let config = Config::builder()
            // Start with default values
            .set_default("general.env", "development")?
            .set_default("logger.level", "info")?
            .set_default("logger.format", "json")?
            .set_default("server.api.host", "0.0.0.0")?
            .set_default("server.api.port", 8080)?
            .set_default("server.api.rate_limit", 100)?
            .set_default("server.api.read_timeout", 5)?
            .set_default("server.api.write_timeout", 10)?
            .set_default("server.api.idle_timeout", 120)?
            .set_default("server.api.max_body_size", 1_048_576)?
            .set_default("server.cors.allowed_origins", vec!["*"])?
            .set_default("server.cors.allowed_methods", vec!["GET", "POST"])?
            .set_default(
                "server.cors.allowed_headers",
                vec!["Content-Type", "Authorization"],
            )?
            .set_default("server.cors.exposed_headers", Vec::<String>::new())?
            .set_default("server.cors.allow_credentials", true)?
            .set_default("db.host", "localhost")?
            .set_default("db.port", 5432)?
            .set_default("db.user", "user")?
            .set_default("db.password", "password")?
            .set_default("db.name", "app")?
            .set_default("db.ssl_mode", "disable")?
            .set_default("db.max_open_conns", 10)?
            .set_default("db.max_idle_conns", 5)?
            .set_default("db.conn_max_lifetime", 3600)?
            .set_default("db.conn_max_idle_time", 600)?
            .set_default("db.query_timeout", 5)?
            .set_default("redis.host", "localhost")?
            .set_default("redis.port", 6379)?
            .set_default("redis.password", "")?
            .set_default("redis.db", 0)?
            .set_default("redis.read_timeout", 3)?
            .set_default("redis.write_timeout", 3)?
            // Add optional configuration files
            .add_source(File::with_name(&dir.join("config").to_string_lossy()).required(false))
            .add_source(
                File::with_name(&dir.join(format!("config.{env_name}")).to_string_lossy())
                    .required(false),
            )
            // Add environment variables with APP_ prefix
            .add_source(env_source)
            .build()?;

        let app_config: Self = config.try_deserialize()?;
        app_config
            .validate()
            .map_err(|e| ConfigError::Message(format!("invalid configuration: {e}")))?;

        Ok(app_config)
    }

    /// Check cross-field constraints the type system cannot express
    ///
    /// # Errors
    ///
    /// Returns an error naming the first violated constraint
    pub fn validate(&self) -> Result<()> {
        let api = &self.server.api;
        ensure!(api.max_body_size > 0, "server.api.max_body_size must be greater than 0");
        ensure!(
            !api.write_timeout.is_zero(),
            "server.api.write_timeout must be greater than 0"
        );
        ensure!(
            self.db.max_open_conns > 0,
            "db.max_open_conns must be greater than 0"
        );
        ensure!(
            !self.db.query_timeout.is_zero(),
            "db.query_timeout must be greater than 0"
        );
        ensure!(
            !self.redis.read_timeout.is_zero(),
            "redis.read_timeout must be greater than 0"
        );
        Ok(())
    }

    /// Create configuration optimized for testing
    pub fn for_testing() -> Self {
        let defaults = Self::default();
        Self {
            general: GeneralConfig {
                env: Environment::Testing,
            },
            server: HttpConfig {
                api: ApiConfig {
                    host: "127.0.0.1".to_string(),
                    port: 0, // let OS choose available port
                    write_timeout: Duration::from_secs(5),
                    ..defaults.server.api
                },
                ..defaults.server
            },
            db: PostgresConfig {
                max_idle_conns: 0,
                ..defaults.db
            },
            ..defaults
        }
    }

    /// `host:port` address for binding, IPv6 literals bracketed
    pub fn listen_addr(&self) -> String {
        let ApiConfig { host, port, .. } = &self.server.api;
        if host.parse::<Ipv6Addr>().is_ok() {
            format!("[{host}]:{port}")
        } else {
            format!("{host}:{port}")
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Production => write!(f, "production"),
            Environment::Development => write!(f, "development"),
            Environment::Testing => write!(f, "testing"),
        }
    }
}
