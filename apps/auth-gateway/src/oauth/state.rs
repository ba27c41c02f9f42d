// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Pending OAuth authorization states.
//!
//! Both maps are bounded LRUs behind one mutex, so a flood of
//! `/oauth/github` requests evicts the oldest pending states instead of
//! growing without limit, and consumption is a single atomic remove.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;

use crate::auth::AuthError;

/// How long a state nonce stays redeemable.
pub const STATE_TIMEOUT_SECS: i64 = 600;

/// Default bound on pending (and remembered consumed) states.
pub const DEFAULT_STATE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(10_000) {
    Some(n) => n,
    None => NonZeroUsize::MIN,
};

/// Where an OAuth flow stands; recorded on log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowPhase {
    AuthorizationRequested,
    CallbackReceived,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingState {
    pub created_at: DateTime<Utc>,
    pub redirect_target: String,
}

impl PendingState {
    fn expires_at(&self, timeout: Duration) -> DateTime<Utc> {
        self.created_at + timeout
    }
}

struct Inner {
    pending: LruCache<String, PendingState>,
    /// Consumed nonces, kept until their original expiry to recognise replays.
    consumed: LruCache<String, DateTime<Utc>>,
}

pub struct PendingStates {
    inner: Mutex<Inner>,
    timeout: Duration,
}

impl PendingStates {
    pub fn new(capacity: NonZeroUsize, timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                pending: LruCache::new(capacity),
                consumed: LruCache::new(capacity),
            }),
            timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, nonce: String, state: PendingState) {
        let mut inner = self.lock();
        if let Some((evicted, _)) = inner.pending.push(nonce, state) {
            tracing::debug!(evicted = %short(&evicted), "Pending OAuth state evicted");
        }
    }

    /// Remove and return the state for `nonce`.
    ///
    /// Exactly one caller can consume a given nonce. A nonce that is
    /// recognised but timed out, or that was already consumed, is
    /// `StateExpired`; anything else is `StateMismatch`.
    pub fn consume(&self, nonce: &str, now: DateTime<Utc>) -> Result<PendingState, AuthError> {
        let mut inner = self.lock();

        if let Some(state) = inner.pending.pop(nonce) {
            let expires_at = state.expires_at(self.timeout);
            inner.consumed.put(nonce.to_string(), expires_at);
            if now >= expires_at {
                return Err(AuthError::StateExpired);
            }
            return Ok(state);
        }

        if inner.consumed.contains(nonce) {
            return Err(AuthError::StateExpired);
        }
        Err(AuthError::StateMismatch)
    }

    /// Drop timed-out pending states and forget consumed nonces past their
    /// expiry. Returns how many pending states were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut inner = self.lock();
        let timeout = self.timeout;

        let stale: Vec<String> = inner
            .pending
            .iter()
            .filter(|(_, state)| now >= state.expires_at(timeout))
            .map(|(nonce, _)| nonce.clone())
            .collect();
        for nonce in &stale {
            inner.pending.pop(nonce);
        }

        let forgotten: Vec<String> = inner
            .consumed
            .iter()
            .filter(|(_, expires_at)| now >= **expires_at)
            .map(|(nonce, _)| nonce.clone())
            .collect();
        for nonce in &forgotten {
            inner.consumed.pop(nonce);
        }

        stale.len()
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }
}

impl Default for PendingStates {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_CAPACITY, Duration::seconds(STATE_TIMEOUT_SECS))
    }
}

/// Log-safe prefix of a nonce.
pub(crate) fn short(nonce: &str) -> &str {
    nonce.get(..8).unwrap_or(nonce)
}
