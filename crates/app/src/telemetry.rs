// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Structured logging setup and the logger capability

use anyhow::{Context, Result};
use tracing::{Level, Span, info_span, level_filters::LevelFilter};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Environment, LogFormat, LoggerConfig};

/// Install the global subscriber
///
/// `RUST_LOG` takes precedence over the configured level; an unknown level falls
/// back to `info`.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(config: &LoggerConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| level_filter(&config.level));

    let json = (config.format == LogFormat::Json).then(|| {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_file(true)
            .with_line_number(true)
    });
    let text = (config.format == LogFormat::Text).then(fmt::layer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json)
        .with(text)
        .try_init()
        .context("failed to install tracing subscriber")
}

/// Filter admitting records at `level` and above for every target
fn level_filter(level: &str) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(max_level(level).into())
        .parse_lossy("")
}

/// `trace`, `debug`, `info`, `warn` or `error`, anything else is `info`
fn max_level(level: &str) -> LevelFilter {
    level
        .trim()
        .parse::<Level>()
        .map_or(LevelFilter::INFO, LevelFilter::from_level)
}

/// Root logging context handed to components explicitly
#[derive(Debug, Clone)]
pub struct Logger {
    root: Span,
}

impl Logger {
    /// Root span tagged with the deployment environment
    pub fn new(env: Environment) -> Self {
        Self {
            root: info_span!("app", env = %env),
        }
    }

    /// Root span
    pub fn span(&self) -> &Span {
        &self.root
    }

    /// Child span for one component
    pub fn component(&self, name: &'static str) -> Span {
        info_span!(parent: &self.root, "component", component = name)
    }
}
