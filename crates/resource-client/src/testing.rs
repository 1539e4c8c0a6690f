// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Spy resources for exercising startup and teardown paths in tests

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use crate::{Resource, ResourceError};

/// How a [`SpyResource`] answers liveness probes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingBehaviour {
    /// Probe succeeds immediately
    Healthy,
    /// Probe fails with a connection error
    Unreachable,
    /// Probe never completes within any sensible bound
    Hang,
}

/// Resource double that counts probes and closes
///
/// Clones share their counters, so a test can keep one clone while another is moved
/// into the code under test.
#[derive(Debug, Clone)]
pub struct SpyResource {
    name: &'static str,
    behaviour: PingBehaviour,
    pings: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl SpyResource {
    /// Create a spy with the given probe behaviour
    pub fn new(name: &'static str, behaviour: PingBehaviour) -> Self {
        Self {
            name,
            behaviour,
            pings: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Spy whose probe succeeds
    pub fn healthy(name: &'static str) -> Self {
        Self::new(name, PingBehaviour::Healthy)
    }

    /// Spy whose probe fails
    pub fn unreachable(name: &'static str) -> Self {
        Self::new(name, PingBehaviour::Unreachable)
    }

    /// Spy whose probe hangs
    pub fn hanging(name: &'static str) -> Self {
        Self::new(name, PingBehaviour::Hang)
    }

    /// Number of probes performed so far
    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    /// Number of times the handle was closed
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Resource for SpyResource {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn ping(&self) -> Result<(), ResourceError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            PingBehaviour::Healthy => Ok(()),
            PingBehaviour::Unreachable => Err(ResourceError::connection(
                self.name,
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused"),
            )),
            PingBehaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}
