// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User directory collaborator.
//!
//! The relational user store is external to the gateway; it is consumed
//! through [`UserDirectory`]. [`InMemoryDirectory`] backs development and
//! tests: Argon2id password hashes, numeric user ids, and provisioning of
//! password-less users for first-time OAuth logins.
//!
//! User ids come from a [`UserIdAllocator`]. Sessions and linked identities
//! outlive the process, so the allocator must never hand out an id twice,
//! restarts included; [`crate::storage::AuthDatabase`] keeps the counter.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use async_trait::async_trait;
use ring::rand::{SecureRandom, SystemRandom};

use crate::models::UserId;
use crate::oauth::ProviderProfile;
use crate::storage::StoreResult;

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("username {0} is already taken")]
    UsernameTaken(String),

    #[error("password hashing failed: {0}")]
    Hashing(String),

    #[error("user directory unavailable: {0}")]
    Unavailable(String),
}

/// Source of fresh numeric user ids.
pub trait UserIdAllocator: Send + Sync {
    fn next_user_id(&self) -> StoreResult<u64>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Check a username/password pair. `Ok(None)` means the credentials
    /// are wrong; unknown users and bad passwords are not distinguished.
    async fn authenticate(&self, username: &str, password: &str) -> Result<Option<UserId>, DirectoryError>;

    /// Create a local user for a provider account seen for the first time.
    async fn provision(&self, profile: &ProviderProfile) -> Result<UserId, DirectoryError>;
}

#[derive(Debug, Clone)]
struct UserRecord {
    user_id: UserId,
    password_hash: String,
}

struct Inner {
    by_username: HashMap<String, UserRecord>,
    provisioned: HashMap<UserId, ProviderProfile>,
}

pub struct InMemoryDirectory {
    inner: Mutex<Inner>,
    ids: Arc<dyn UserIdAllocator>,
    hasher: Argon2<'static>,
    /// Verified against when the username is unknown so both paths cost
    /// one Argon2 evaluation.
    dummy_hash: String,
}

impl InMemoryDirectory {
    pub fn new(ids: Arc<dyn UserIdAllocator>) -> Result<Self, DirectoryError> {
        Self::with_hasher(Argon2::default(), ids)
    }

    fn with_hasher(hasher: Argon2<'static>, ids: Arc<dyn UserIdAllocator>) -> Result<Self, DirectoryError> {
        let dummy_hash = hash_password(&hasher, "not-a-real-password")?;
        Ok(Self {
            inner: Mutex::new(Inner {
                by_username: HashMap::new(),
                provisioned: HashMap::new(),
            }),
            ids,
            hasher,
            dummy_hash,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn allocate_id(&self) -> Result<UserId, DirectoryError> {
        self.ids
            .next_user_id()
            .map(|id| UserId::new(id.to_string()))
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))
    }

    /// Register a password user under a fresh id.
    pub fn add_user(&self, username: &str, password: &str) -> Result<UserId, DirectoryError> {
        if self.lock().by_username.contains_key(username) {
            return Err(DirectoryError::UsernameTaken(username.to_string()));
        }
        let user_id = self.allocate_id()?;
        self.insert_user(user_id.clone(), username, password)?;
        Ok(user_id)
    }

    /// Register a password user with a fixed id.
    pub fn insert_user(&self, user_id: UserId, username: &str, password: &str) -> Result<(), DirectoryError> {
        let password_hash = hash_password(&self.hasher, password)?;
        let mut inner = self.lock();
        if inner.by_username.contains_key(username) {
            return Err(DirectoryError::UsernameTaken(username.to_string()));
        }
        inner.by_username.insert(
            username.to_string(),
            UserRecord {
                user_id,
                password_hash,
            },
        );
        Ok(())
    }

    pub fn provisioned_profile(&self, user_id: &UserId) -> Option<ProviderProfile> {
        self.lock().provisioned.get(user_id).cloned()
    }
}

fn hash_password(hasher: &Argon2<'_>, password: &str) -> Result<String, DirectoryError> {
    let mut salt_bytes = [0u8; 16];
    SystemRandom::new()
        .fill(&mut salt_bytes)
        .map_err(|_| DirectoryError::Hashing("system RNG failure".to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| DirectoryError::Hashing(e.to_string()))?;
    Ok(hasher
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| DirectoryError::Hashing(e.to_string()))?
        .to_string())
}

fn verify_password(hasher: &Argon2<'_>, hash: &str, password: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => hasher.verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(_) => false,
    }
}

#[async_trait]
impl UserDirectory for InMemoryDirectory {
    async fn authenticate(&self, username: &str, password: &str) -> Result<Option<UserId>, DirectoryError> {
        let record = self.lock().by_username.get(username).cloned();
        let (hash, user_id) = match record {
            Some(record) => (record.password_hash, Some(record.user_id)),
            None => (self.dummy_hash.clone(), None),
        };

        // Argon2 is deliberately slow; keep it off the async workers.
        let hasher = self.hasher.clone();
        let password = password.to_string();
        let verified = tokio::task::spawn_blocking(move || verify_password(&hasher, &hash, &password))
            .await
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;

        Ok(if verified { user_id } else { None })
    }

    async fn provision(&self, profile: &ProviderProfile) -> Result<UserId, DirectoryError> {
        let user_id = self.allocate_id()?;
        self.lock().provisioned.insert(user_id.clone(), profile.clone());
        tracing::info!(user_id = %user_id, login = %profile.login, "Provisioned user for provider login");
        Ok(user_id)
    }
}

/// Process-local counter; ids restart with the process.
#[cfg(test)]
pub struct SequentialIds(std::sync::atomic::AtomicU64);

#[cfg(test)]
impl SequentialIds {
    pub fn starting_at(first: u64) -> Self {
        Self(std::sync::atomic::AtomicU64::new(first))
    }
}

#[cfg(test)]
impl UserIdAllocator for SequentialIds {
    fn next_user_id(&self) -> StoreResult<u64> {
        Ok(self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst))
    }
}

#[cfg(test)]
impl InMemoryDirectory {
    /// Cheap Argon2 parameters so tests do not spend seconds hashing.
    pub fn for_tests() -> Self {
        Self::for_tests_with(Arc::new(SequentialIds::starting_at(1)))
    }

    pub fn for_tests_with(ids: Arc<dyn UserIdAllocator>) -> Self {
        let params = argon2::Params::new(256, 1, 1, None).unwrap();
        Self::with_hasher(Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params), ids).unwrap()
    }

    /// Start numbering new users at `next_id`.
    pub fn with_next_id(mut self, next_id: u64) -> Self {
        self.ids = Arc::new(SequentialIds::starting_at(next_id));
        self
    }
}
