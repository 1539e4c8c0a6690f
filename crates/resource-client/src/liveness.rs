// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Bounded liveness checks for freshly constructed resources

use std::time::Duration;

use tokio::time::timeout;
use tracing::{Instrument, Span, info, warn};

use crate::{Resource, ResourceError};

/// Probe a newly constructed resource and hand it back once it answers
///
/// The probe is bounded by `ping_timeout`. When the probe fails or times out the
/// handle is closed before the error is returned, so a failed startup never leaks
/// connections. Log records are emitted inside `span`.
///
/// # Errors
///
/// Returns `ResourceError::Timeout` when the probe exceeds `ping_timeout`, or the
/// error reported by [`Resource::ping`].
pub async fn establish<R: Resource>(
    resource: R,
    ping_timeout: Duration,
    span: &Span,
) -> Result<R, ResourceError> {
    let name = resource.name();

    let failure = match timeout(ping_timeout, resource.ping())
        .instrument(span.clone())
        .await
    {
        Ok(Ok(())) => {
            span.in_scope(|| info!(resource = name, "connection established successfully"));
            return Ok(resource);
        }
        Ok(Err(e)) => e,
        Err(_) => ResourceError::Timeout {
            resource: name,
            timeout: ping_timeout,
        },
    };

    span.in_scope(|| warn!(resource = name, error = %failure, "liveness check failed, closing handle"));
    resource.close().instrument(span.clone()).await;

    Err(failure)
}
