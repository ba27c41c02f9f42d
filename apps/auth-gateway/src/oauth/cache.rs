// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! LRU cache for repository access decisions.
//!
//! Each entry carries its own expiry, which the broker caps at the
//! provider grant's expiry, so a cached "yes" never outlives the token it
//! was obtained with.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use lru::LruCache;

use super::provider::RepoRef;
use crate::models::UserId;

/// Default freshness of a cached decision.
pub const REPO_ACCESS_TTL_SECS: i64 = 60;

struct CacheEntry {
    allowed: bool,
    expires_at: DateTime<Utc>,
}

pub struct RepoAccessCache {
    cache: Mutex<LruCache<(UserId, RepoRef), CacheEntry>>,
}

impl RepoAccessCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Cached decision, or `None` if absent or stale.
    pub fn get(&self, user_id: &UserId, repo: &RepoRef, now: DateTime<Utc>) -> Option<bool> {
        let key = (user_id.clone(), repo.clone());
        let mut cache = self.cache.lock().ok()?;
        if let Some(entry) = cache.get(&key) {
            if now < entry.expires_at {
                return Some(entry.allowed);
            }
            cache.pop(&key);
        }
        None
    }

    pub fn put(&self, user_id: &UserId, repo: &RepoRef, allowed: bool, expires_at: DateTime<Utc>) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put((user_id.clone(), repo.clone()), CacheEntry { allowed, expires_at });
        }
    }

    /// Forget every decision for a user, e.g. after their grant changed.
    pub fn invalidate_user(&self, user_id: &UserId) {
        if let Ok(mut cache) = self.cache.lock() {
            let keys: Vec<_> = cache
                .iter()
                .filter(|((owner, _), _)| owner == user_id)
                .map(|(key, _)| key.clone())
                .collect();
            for key in keys {
                cache.pop(&key);
            }
        }
    }

    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let Ok(mut cache) = self.cache.lock() else {
            return 0;
        };
        let stale: Vec<_> = cache
            .iter()
            .filter(|(_, entry)| now >= entry.expires_at)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            cache.pop(key);
        }
        stale.len()
    }
}

impl Default for RepoAccessCache {
    fn default() -> Self {
        Self::new(super::state::DEFAULT_STATE_CAPACITY)
    }
}
