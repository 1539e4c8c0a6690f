// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Provider registration
//!
//! Wires configuration, logging, resources and the HTTP stack into the dependency graph.
//! Registration happens once at startup, in dependency order; nothing is constructed
//! until the orchestrator resolves the listener.

use resources::{PostgresPool, RedisCache};
use tracing::info;

use crate::{
    config::AppConfig,
    container::{Capability, Container, ContainerBuilder, ContainerError},
    routes::create_router,
    server::HttpServer,
    state::ServerState,
    telemetry::Logger,
    validator::Validator,
};

/// Register every provider the service needs
///
/// # Errors
///
/// Returns `ContainerError` if a registration conflicts with another.
pub fn build_container(config: AppConfig) -> Result<Container, ContainerError> {
    let mut builder = ContainerBuilder::new();
    register_core(&mut builder, config)?;
    register_resources(&mut builder)?;
    register_web(&mut builder)?;
    Ok(builder.build())
}

/// Configuration, logger and validator
///
/// # Errors
///
/// Returns `ContainerError::AlreadyRegistered` if any of them is already present.
pub fn register_core(
    builder: &mut ContainerBuilder,
    config: AppConfig,
) -> Result<(), ContainerError> {
    let logger = Logger::new(config.general.env);
    builder
        .instance(config)?
        .instance(logger)?
        .instance(Validator::new())?;
    Ok(())
}

/// Database pool and cache client, each checked for liveness on construction
///
/// # Errors
///
/// Returns `ContainerError` if configuration or logger are missing.
pub fn register_resources(builder: &mut ContainerBuilder) -> Result<(), ContainerError> {
    let deps = [Capability::of::<AppConfig>(), Capability::of::<Logger>()];

    builder
        .register_resource(&deps, |r| async move {
            let config = r.resolve::<AppConfig>().await?;
            let span = r.resolve::<Logger>().await?.component("postgres");

            let pool = PostgresPool::connect(&config.db, &span).await?;
            info!(
                parent: &span,
                host = %config.db.host,
                port = config.db.port,
                database = %config.db.name,
                max_open_conns = config.db.max_open_conns,
                "database connection established"
            );
            anyhow::Ok(pool)
        })?
        .register_resource(&deps, |r| async move {
            let config = r.resolve::<AppConfig>().await?;
            let span = r.resolve::<Logger>().await?.component("redis");

            let cache = RedisCache::connect(&config.redis, &span).await?;
            info!(
                parent: &span,
                host = %config.redis.host,
                port = config.redis.port,
                db = config.redis.db,
                "cache connection established"
            );
            anyhow::Ok(cache)
        })?;
    Ok(())
}

/// Shared request state and the HTTP listener
///
/// # Errors
///
/// Returns `ContainerError::MissingDependency` if configuration, validator, database or
/// cache are not registered yet.
pub fn register_web(builder: &mut ContainerBuilder) -> Result<(), ContainerError> {
    builder
        .register(
            &[
                Capability::of::<AppConfig>(),
                Capability::of::<Validator>(),
                Capability::of::<PostgresPool>(),
                Capability::of::<RedisCache>(),
            ],
            |r| async move {
                anyhow::Ok(ServerState::new(
                    r.resolve().await?,
                    *r.resolve::<Validator>().await?,
                    r.resolve().await?,
                    r.resolve().await?,
                ))
            },
        )?
        .register(
            &[
                Capability::of::<AppConfig>(),
                Capability::of::<ServerState>(),
            ],
            |r| async move {
                let config = r.resolve::<AppConfig>().await?;
                let state = r.resolve::<ServerState>().await?;
                let router = create_router(ServerState::clone(&state))?;
                anyhow::Ok(HttpServer::new(config.listen_addr(), router))
            },
        )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use resource_client::{establish, testing::SpyResource};
    use resources::PostgresConfig;

    use super::*;

    #[test]
    fn every_capability_is_registered() {
        let container = build_container(AppConfig::for_testing()).unwrap();

        assert!(container.contains::<AppConfig>());
        assert!(container.contains::<Logger>());
        assert!(container.contains::<Validator>());
        assert!(container.contains::<PostgresPool>());
        assert!(container.contains::<RedisCache>());
        assert!(container.contains::<ServerState>());
        assert!(container.contains::<HttpServer>());
    }

    #[test]
    fn web_requires_resources_first() {
        let mut builder = ContainerBuilder::new();
        register_core(&mut builder, AppConfig::for_testing()).unwrap();

        let err = register_web(&mut builder).unwrap_err();
        assert!(matches!(
            err,
            ContainerError::MissingDependency {
                dependency: "PostgresPool",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn failed_liveness_check_closes_the_handle() {
        let spy = SpyResource::unreachable("db");
        let registered = spy.clone();

        let mut builder = ContainerBuilder::new();
        register_core(&mut builder, AppConfig::for_testing()).unwrap();
        builder
            .register_resource(&[Capability::of::<Logger>()], move |r| {
                let spy = registered.clone();
                async move {
                    let span = r.resolve::<Logger>().await?.component("db");
                    anyhow::Ok(establish(spy, Duration::from_secs(1), &span).await?)
                }
            })
            .unwrap();
        let container = builder.build();

        let err = container.resolve::<SpyResource>().await.unwrap_err();
        assert!(matches!(
            err,
            ContainerError::Construction {
                capability: "SpyResource",
                ..
            }
        ));
        assert_eq!(spy.close_count(), 1);

        // the failed handle was never handed to the graph, so teardown skips it
        container.close().await;
        assert_eq!(spy.close_count(), 1);
    }

    #[tokio::test]
    async fn unreachable_database_fails_listener_construction() {
        let config = AppConfig {
            db: PostgresConfig {
                host: "127.0.0.1".to_string(),
                port: 1,
                max_idle_conns: 0,
                query_timeout: Duration::from_secs(1),
                ..PostgresConfig::default()
            },
            ..AppConfig::for_testing()
        };
        let container = build_container(config).unwrap();

        let err = container.resolve::<HttpServer>().await.unwrap_err();

        assert!(matches!(
            err,
            ContainerError::Construction {
                capability: "PostgresPool",
                ..
            }
        ));
        container.close().await;
    }
}
