// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! HTTP service entry point

use std::process::ExitCode;

use anyhow::{Context, Result};
use app::{AppConfig, Server, ShutdownConfig, providers::build_container, telemetry::init_tracing};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // before the subscriber is installed nothing else would report the failure
            if tracing::dispatcher::has_been_set() {
                error!(error = format!("{e:#}"), "service terminated");
            } else {
                eprintln!("service terminated: {e:#}");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(&config.logger)?;

    info!(
        environment = %config.general.env,
        address = %config.listen_addr(),
        "starting service"
    );

    let shutdown_config = ShutdownConfig::from_config(&config);
    let container = build_container(config).context("failed to register providers")?;
    let server = Server::new(container, shutdown_config);

    server.run().await?;
    Ok(())
}
