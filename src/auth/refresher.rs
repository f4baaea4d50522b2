// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Scheduled Key Refresh
//!
//! Background task that refreshes the signing-key cache every
//! `refresh_interval` so that rotated keys are picked up before the first
//! token signed with them arrives.
//!
//! A failed sweep is logged and leaves the cached set in place; the next
//! sweep tries again.
//!
//! ## Shutdown
//!
//! Stops when its `CancellationToken` is cancelled.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::jwks::{KeyResolver, DEFAULT_CACHE_TTL};

/// Background task that keeps a [`KeyResolver`] warm.
pub struct KeyRefresher {
    keys: KeyResolver,
    refresh_interval: Duration,
}

impl KeyRefresher {
    pub fn new(keys: KeyResolver) -> Self {
        Self {
            keys,
            refresh_interval: DEFAULT_CACHE_TTL,
        }
    }

    /// A zero interval is raised to one second.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval.max(Duration::from_secs(1));
        self
    }

    pub fn interval(&self) -> Duration {
        self.refresh_interval
    }

    /// Run the refresh loop until the cancellation token is triggered.
    ///
    /// The first sweep happens one interval after start; call
    /// [`KeyResolver::warm_up`] for an immediate fetch.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            target: "auth.jwks",
            interval_secs = self.refresh_interval.as_secs(),
            "Key refresher starting"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.refresh_interval) => {},
                _ = shutdown.cancelled() => {
                    info!(target: "auth.jwks", "Key refresher shutting down");
                    return;
                }
            }

            self.refresh_step().await;
        }
    }

    async fn refresh_step(&self) {
        match self.keys.force_refresh().await {
            Ok(key_count) => {
                info!(target: "auth.jwks", key_count, "Scheduled key refresh complete");
            }
            Err(e) => {
                warn!(target: "auth.jwks", error = %e, "Scheduled key refresh failed");
            }
        }
    }
}

impl KeyResolver {
    /// Spawn a [`KeyRefresher`] for this resolver on the current runtime.
    pub fn spawn_refresh_task(
        &self,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let refresher = KeyRefresher::new(self.clone()).with_interval(interval);
        tokio::spawn(refresher.run(shutdown))
    }
}
