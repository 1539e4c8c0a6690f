// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Generic resource client traits for long-lived external handles
//!
//! This crate provides the contract every long-lived external resource (database pool,
//! cache client) satisfies before the application hands it to request handlers.
//!
//! # Core Abstractions
//!
//! - **`Resource` Trait**: name, bounded liveness probe and graceful close
//! - **`establish`**: liveness check bounded by a timeout that closes the handle on failure
//! - **Error Handling**: `ResourceError` always names the resource that failed

use std::{error::Error as StdError, time::Duration};

use thiserror::Error;

pub mod liveness;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use liveness::establish;

/// Boxed error type used to carry driver-specific failures
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Common interface for long-lived external resource handles
///
/// Implementations must be safe for concurrent use by request handlers; pools and
/// multiplexed clients satisfy this by construction.
pub trait Resource: Send + Sync + 'static {
    /// Name used in logs and error messages
    fn name(&self) -> &'static str;

    /// Confirm the resource is reachable
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::Connection` if the resource cannot be reached
    fn ping(&self) -> impl Future<Output = Result<(), ResourceError>> + Send;

    /// Release every connection held by this handle
    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// Errors raised while constructing or probing a resource
#[derive(Debug, Error)]
pub enum ResourceError {
    /// The resource configuration could not be turned into a handle
    #[error("{resource} configuration is invalid: {message}")]
    Configuration {
        /// Resource name
        resource: &'static str,
        /// Error message
        message: String,
    },

    /// The resource could not be reached
    #[error("failed to ping {resource}: {source}")]
    Connection {
        /// Resource name
        resource: &'static str,
        /// Underlying driver error
        #[source]
        source: BoxError,
    },

    /// The liveness check did not finish in time
    #[error("{resource} liveness check timed out after {timeout:?}")]
    Timeout {
        /// Resource name
        resource: &'static str,
        /// Configured bound for the check
        timeout: Duration,
    },
}

impl ResourceError {
    /// Wrap a driver error as a connection failure for the named resource
    pub fn connection(resource: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Connection {
            resource,
            source: source.into(),
        }
    }

    /// Name of the resource this error refers to
    pub fn resource(&self) -> &'static str {
        match self {
            Self::Configuration { resource, .. }
            | Self::Connection { resource, .. }
            | Self::Timeout { resource, .. } => resource,
        }
    }
}
