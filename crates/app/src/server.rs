// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Server implementation module
//!
//! This module provides the orchestrator that runs the listener resolved from the
//! dependency graph and supervises it until shutdown, using `CancellationToken` for
//! coordinated termination.
//!
//! The orchestrator races two events: the listener task finishing on its own, which is
//! fatal and skips the drain, and a shutdown request (signal or [`Server::shutdown`]),
//! which asks the listener to drain within the grace period. Either way the container's
//! resources are closed once the listener has stopped.

use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Duration};

use axum::Router;
use tokio::{net::TcpListener, sync::watch, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    config::AppConfig,
    container::Container,
    error::{ServerError, ServerResult},
};

// Server constants
const DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT_SECONDS: u64 = 10;

/// Configuration for server shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Maximum time to wait for in-flight requests before the listener is aborted
    pub graceful_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            graceful_timeout: Duration::from_secs(DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT_SECONDS),
        }
    }
}

impl ShutdownConfig {
    /// Grace period matching the configured write timeout
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            graceful_timeout: config.server.api.write_timeout,
        }
    }
}

/// Server lifecycle states, in the only order they are entered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// `run` has not been called
    NotStarted,
    /// The listener is serving
    Running,
    /// Shutdown has begun
    ShuttingDown,
    /// Listener stopped and resources released
    Stopped,
}

/// A network listener the orchestrator can supervise
///
/// `listen` serves until `shutdown` is cancelled, then drains and returns `Ok`. Returning
/// before `shutdown` is cancelled is treated as a listener failure.
pub trait Listen: Send + Sync + 'static {
    /// Serve until `shutdown` is cancelled
    fn listen(
        &self,
        shutdown: CancellationToken,
    ) -> impl Future<Output = ServerResult<()>> + Send + 'static;
}

/// HTTP listener serving the application router
#[derive(Debug)]
pub struct HttpServer {
    addr: String,
    router: Router,
    bound: Arc<watch::Sender<Option<SocketAddr>>>,
}

impl HttpServer {
    /// Listener for `router` on `addr`
    ///
    /// Host names in `addr` are resolved when the listener binds.
    pub fn new(addr: impl Into<String>, router: Router) -> Self {
        Self {
            addr: addr.into(),
            router,
            bound: Arc::new(watch::Sender::new(None)),
        }
    }

    /// Address the listener is bound to, once bound
    ///
    /// Useful with port 0, where the operating system picks the port.
    pub fn local_addr(&self) -> watch::Receiver<Option<SocketAddr>> {
        self.bound.subscribe()
    }
}

impl Listen for HttpServer {
    fn listen(
        &self,
        shutdown: CancellationToken,
    ) -> impl Future<Output = ServerResult<()>> + Send + 'static {
        let addr = self.addr.clone();
        let router = self.router.clone();
        let bound = Arc::clone(&self.bound);

        async move {
            let listener = TcpListener::bind(addr.as_str())
                .await
                .map_err(|source| ServerError::Bind {
                    address: addr,
                    source,
                })?;

            let actual_addr = listener
                .local_addr()
                .map_err(|source| ServerError::Startup { source })?;
            bound.send_replace(Some(actual_addr));

            info!(address = %actual_addr, "HTTP listener started");

            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .map_err(|source| ServerError::Listener { source })
        }
    }
}

/// Orchestrator owning the dependency graph for the lifetime of the process
#[derive(Debug)]
pub struct Server {
    /// Dependency graph the listener is resolved from
    container: Container,
    /// Configuration for coordinated shutdown
    shutdown_config: ShutdownConfig,
    /// Cancellation token for coordinated shutdown
    cancellation_token: CancellationToken,
    /// Current lifecycle state
    lifecycle: watch::Sender<Lifecycle>,
}

impl Server {
    /// Create new server instance
    pub fn new(container: Container, shutdown_config: ShutdownConfig) -> Self {
        Self {
            container,
            shutdown_config,
            cancellation_token: CancellationToken::new(),
            lifecycle: watch::Sender::new(Lifecycle::NotStarted),
        }
    }

    /// Run the HTTP server until SIGINT or SIGTERM
    ///
    /// # Errors
    ///
    /// See [`Server::run_with`].
    pub async fn run(&self) -> ServerResult<()> {
        let shutdown_token = self.cancellation_token.clone();
        tokio::spawn(async move {
            info!("spawning the graceful shutdown task");
            Self::shutdown_signal_handler(shutdown_token).await;
        });

        self.run_with::<HttpServer>().await
    }

    /// Resolve the listener `L`, serve until shutdown and release resources
    ///
    /// Returns `Ok` only after a requested shutdown drained within the grace period.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Container` if the listener cannot be constructed, the
    /// listener's own error if it fails before shutdown is requested,
    /// `ServerError::ListenerExited` if it stops without error on its own, and
    /// `ServerError::ShutdownTimeout` if draining exceeds the grace period.
    pub async fn run_with<L: Listen>(&self) -> ServerResult<()> {
        let started = self.lifecycle.send_if_modified(|state| {
            let fresh = *state == Lifecycle::NotStarted;
            if fresh {
                *state = Lifecycle::Running;
            }
            fresh
        });
        if !started {
            return Err(ServerError::Startup {
                source: io::Error::other("server was already started"),
            });
        }

        let result = self.supervise::<L>().await;

        self.lifecycle.send_replace(Lifecycle::ShuttingDown);
        self.container.close().await;
        self.lifecycle.send_replace(Lifecycle::Stopped);

        if result.is_ok() {
            info!("server stopped");
        }
        result
    }

    async fn supervise<L: Listen>(&self) -> ServerResult<()> {
        let listener = self.container.resolve::<L>().await?;

        let drain = CancellationToken::new();
        let mut task = tokio::spawn(listener.listen(drain.clone()));

        tokio::select! {
            joined = &mut task => {
                warn!("listener stopped before shutdown was requested");
                match joined? {
                    Ok(()) => Err(ServerError::ListenerExited),
                    Err(e) => Err(e),
                }
            }
            () = self.cancellation_token.cancelled() => {
                self.lifecycle.send_replace(Lifecycle::ShuttingDown);
                let grace_period = self.shutdown_config.graceful_timeout;
                info!(?grace_period, "draining in-flight requests");
                drain.cancel();

                match timeout(grace_period, &mut task).await {
                    Ok(joined) => match joined? {
                        Ok(()) => Ok(()),
                        Err(ServerError::Listener { source }) => {
                            Err(ServerError::Shutdown { source })
                        }
                        Err(e) => Err(e),
                    },
                    Err(_) => {
                        warn!(
                            ?grace_period,
                            "drain deadline exceeded, aborting accept loop and abandoning \
                             in-flight connections"
                        );
                        // connection tasks are spawned separately and are not cancelled by
                        // the abort; they end with the process
                        task.abort();
                        let _ = task.await;
                        Err(ServerError::ShutdownTimeout { grace_period })
                    }
                }
            }
        }
    }

    /// Handle shutdown signals and trigger coordinated cancellation
    ///
    /// This function listens for SIGINT (Ctrl+C) and SIGTERM signals,
    /// and cancels the provided cancellation token when received.
    async fn shutdown_signal_handler(cancellation_token: CancellationToken) {
        let signal_received = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{SignalKind, signal};

                let (mut sigterm, mut sigint) =
                    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                        (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                        (Err(e), _) | (_, Err(e)) => {
                            error!(error = %e, "failed to register signal handlers");
                            return std::future::pending::<&'static str>().await;
                        }
                    };

                tokio::select! {
                    _ = sigterm.recv() => "SIGTERM",
                    _ = sigint.recv() => "SIGINT",
                }
            }

            #[cfg(not(unix))]
            {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "failed to install CTRL+C signal handler");
                    return std::future::pending::<&'static str>().await;
                }
                "CTRL+C"
            }
        };

        // Wait for either a signal or existing cancellation
        tokio::select! {
            signal_name = signal_received => {
                warn!("Shutdown signal {} received, initiating coordinated shutdown", signal_name);
                cancellation_token.cancel();
            },
            () = cancellation_token.cancelled() => {
                info!("Cancellation token already cancelled, shutdown signal handler exiting");
            }
        }
    }

    /// Returns a clone of the cancellation token for coordinated shutdown
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Initiates graceful shutdown by cancelling the server's cancellation token
    ///
    /// Calling this more than once has no further effect.
    pub fn shutdown(&self) {
        if !self.cancellation_token.is_cancelled() {
            info!("programmatic shutdown requested");
        }
        self.cancellation_token.cancel();
    }

    /// Subscribe to lifecycle transitions
    pub fn lifecycle(&self) -> watch::Receiver<Lifecycle> {
        self.lifecycle.subscribe()
    }

    /// Dependency graph owned by this server
    pub fn container(&self) -> &Container {
        &self.container
    }
}
