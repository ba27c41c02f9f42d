// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Maintenance Task
//!
//! Background task for every time-driven concern of the gateway.
//!
//! ## Strategy
//!
//! Every `interval` (default 60 s) the task:
//! 1. Rotates the signing key if the active key is older than the rotation
//!    interval.
//! 2. Prunes retired keys whose grace window has elapsed.
//! 3. Writes session activity recorded since the last sweep.
//! 4. Purges expired sessions.
//! 5. Purges timed-out OAuth states.
//!
//! Each step is idempotent, so a sweep that fails halfway is simply redone
//! on the next tick.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken` for graceful shutdown. Session
//! activity is flushed once more before the task returns.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::auth::{KeyStore, SessionManager};
use crate::oauth::OAuthBroker;

/// What one sweep changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub rotated_key: Option<String>,
    pub pruned_keys: usize,
    pub flushed_sessions: usize,
    pub purged_sessions: usize,
    pub purged_states: usize,
}

pub struct Maintenance {
    keys: Arc<KeyStore>,
    sessions: Arc<SessionManager>,
    oauth: Arc<OAuthBroker>,
    rotation_interval: chrono::Duration,
    interval: Duration,
}

impl Maintenance {
    pub fn new(
        keys: Arc<KeyStore>,
        sessions: Arc<SessionManager>,
        oauth: Arc<OAuthBroker>,
        rotation_interval: chrono::Duration,
        interval: Duration,
    ) -> Self {
        Self {
            keys,
            sessions,
            oauth,
            rotation_interval,
            interval,
        }
    }

    /// Run sweeps until the cancellation token is triggered.
    ///
    /// Should be spawned as a background task:
    /// ```rust,ignore
    /// tokio::spawn(maintenance.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            rotation_interval_secs = self.rotation_interval.num_seconds(),
            "Maintenance task starting"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            self.run_once().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => break,
            }
        }

        info!("Maintenance task shutting down");
        if let Err(e) = self.sessions.flush_activity().await {
            warn!(error = %e, "Maintenance: final session flush failed");
        }
    }

    /// Execute one sweep. Failures are logged and do not stop later steps.
    pub async fn run_once(&self) -> SweepReport {
        let mut report = SweepReport::default();

        if self.keys.rotation_due(self.rotation_interval) {
            match self.keys.rotate() {
                Ok(key_id) => {
                    info!(key_id = %key_id, "Maintenance: rotated signing key");
                    report.rotated_key = Some(key_id);
                }
                Err(e) => warn!(error = %e, "Maintenance: key rotation failed"),
            }
        }

        match self.keys.prune() {
            Ok(pruned) => report.pruned_keys = pruned,
            Err(e) => warn!(error = %e, "Maintenance: key pruning failed"),
        }

        match self.sessions.flush_activity().await {
            Ok(written) => report.flushed_sessions = written,
            Err(e) => warn!(error = %e, "Maintenance: session flush failed"),
        }

        match self.sessions.purge_expired().await {
            Ok(purged) => report.purged_sessions = purged,
            Err(e) => warn!(error = %e, "Maintenance: session purge failed"),
        }

        report.purged_states = self.oauth.purge_expired_states();

        if report != SweepReport::default() {
            info!(
                rotated = report.rotated_key.is_some(),
                pruned_keys = report.pruned_keys,
                flushed_sessions = report.flushed_sessions,
                purged_sessions = report.purged_sessions,
                purged_states = report.purged_states,
                "Maintenance sweep complete"
            );
        }
        report
    }
}
