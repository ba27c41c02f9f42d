// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Server-side sessions bound to an opaque, MAC-protected cookie.
//!
//! The cookie carries `<session_id>.<tag>` where `tag` is
//! `HMAC-SHA256(secret, "session" || 0x00 || session_id)`, base64url without
//! padding. A cookie whose tag does not verify never reaches the store. The
//! same key seals other short-lived cookies under their own purpose label.

use std::fmt;
use std::sync::Arc;

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::AuthError;
use crate::audit::{AuditEvent, AuditEventType, AuditSink};
use crate::clock::Clock;
use crate::models::UserId;
use crate::storage::{retry_blocking, retry_transient, StoreError, StoreResult};

type HmacSha256 = Hmac<Sha256>;

/// Session identifiers are 256 bits of CSPRNG output.
pub const SESSION_ID_BYTES: usize = 32;

/// Minimum length of the cookie signing secret.
pub const MIN_SECRET_BYTES: usize = 32;

const SESSION_COOKIE_PURPOSE: &str = "session";

/// Opaque session identifier.
///
/// `Debug` and [`SessionId::fingerprint`] only ever expose a short SHA-256
/// prefix so identifiers can be correlated in logs without being replayable.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    fn generate(rng: &SystemRandom) -> Result<Self, AuthError> {
        let mut bytes = [0u8; SESSION_ID_BYTES];
        rng.fill(&mut bytes)
            .map_err(|_| AuthError::Unavailable("system RNG failure".to_string()))?;
        Ok(Self(Base64UrlUnpadded::encode_string(&bytes)))
    }

    /// Accept only well-formed identifiers (base64url of exactly 32 bytes).
    pub fn parse(value: &str) -> Result<Self, AuthError> {
        match Base64UrlUnpadded::decode_vec(value) {
            Ok(bytes) if bytes.len() == SESSION_ID_BYTES => Ok(Self(value.to_string())),
            _ => Err(AuthError::MalformedCredential),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short, non-reversible identifier for logs and audit events.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        Base64UrlUnpadded::encode_string(&digest[..6])
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.fingerprint())
    }
}

/// A server-side session record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Result of a validating read against the session store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TouchOutcome {
    /// Session was live; `last_seen_at` (and maybe `expires_at`) updated.
    Valid(Session),
    Expired,
    NotFound,
}

/// Persistence for sessions.
///
/// `touch` is the whole validation read-modify-write: implementations run
/// it atomically per session under a per-row lock, without a storage-wide
/// write, so validations of different sessions never contend. It is called
/// on the async workers and must not block on I/O; the other methods are
/// run on the blocking pool.
pub trait SessionStore: Send + Sync {
    fn insert(&self, session: &Session) -> StoreResult<()>;

    /// Validate and renew. An expired row is reported, not modified.
    /// `extend_to` replaces `expires_at` when sliding expiry is on.
    fn touch(
        &self,
        id: &SessionId,
        now: DateTime<Utc>,
        extend_to: Option<DateTime<Utc>>,
    ) -> StoreResult<TouchOutcome>;

    /// Returns whether a row was removed.
    fn remove(&self, id: &SessionId) -> StoreResult<bool>;

    /// Delete every session expired at `now`; returns how many.
    fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<usize>;

    /// Persist activity recorded by `touch` that is not yet durable.
    /// Returns how many sessions were written.
    fn flush(&self) -> StoreResult<usize> {
        Ok(0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub ttl: Duration,
    pub sliding: bool,
}

pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    mac: HmacSha256,
    settings: SessionSettings,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
    rng: SystemRandom,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        secret: &[u8],
        settings: SessionSettings,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, AuthError> {
        if secret.len() < MIN_SECRET_BYTES {
            return Err(AuthError::Unavailable(format!(
                "session secret must be at least {MIN_SECRET_BYTES} bytes"
            )));
        }
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|_| AuthError::Unavailable("invalid session secret".to_string()))?;
        Ok(Self {
            store,
            mac,
            settings,
            clock,
            audit,
            rng: SystemRandom::new(),
        })
    }

    pub fn ttl(&self) -> Duration {
        self.settings.ttl
    }

    /// Create and persist a new session for `user_id`.
    pub async fn create_session(&self, user_id: &UserId) -> Result<Session, AuthError> {
        let now = self.clock.now();
        let session = Session {
            session_id: SessionId::generate(&self.rng)?,
            user_id: user_id.clone(),
            issued_at: now,
            expires_at: now + self.settings.ttl,
            last_seen_at: now,
        };

        let (store, row) = (self.store.clone(), session.clone());
        retry_blocking("session.insert", move || store.insert(&row))
            .await
            .map_err(unavailable)?;

        tracing::info!(
            user_id = %user_id,
            session = %session.session_id.fingerprint(),
            expires_at = %session.expires_at,
            "Session created"
        );
        self.audit.record(
            AuditEvent::new(AuditEventType::SessionCreated, now)
                .with_user(user_id.as_str())
                .with_details(serde_json::json!({
                    "session": session.session_id.fingerprint(),
                })),
        );
        Ok(session)
    }

    /// Resolve a session to its record, renewing it when sliding expiry is
    /// enabled.
    pub async fn validate(&self, id: &SessionId) -> Result<Session, AuthError> {
        let now = self.clock.now();
        let extend_to = self.settings.sliding.then(|| now + self.settings.ttl);

        let outcome = retry_transient("session.touch", || self.store.touch(id, now, extend_to))
            .await
            .map_err(unavailable)?;

        match outcome {
            TouchOutcome::Valid(session) => Ok(session),
            TouchOutcome::Expired => Err(AuthError::SessionExpired),
            TouchOutcome::NotFound => Err(AuthError::SessionNotFound),
        }
    }

    /// Delete a session. Deleting an unknown session succeeds.
    pub async fn invalidate(&self, id: &SessionId) -> Result<(), AuthError> {
        let (store, owned) = (self.store.clone(), id.clone());
        let removed = retry_blocking("session.remove", move || store.remove(&owned))
            .await
            .map_err(unavailable)?;

        if removed {
            tracing::info!(session = %id.fingerprint(), "Session invalidated");
            self.audit.record(
                AuditEvent::new(AuditEventType::SessionInvalidated, self.clock.now())
                    .with_details(serde_json::json!({ "session": id.fingerprint() })),
            );
        }
        Ok(())
    }

    /// Remove expired sessions from the store.
    pub async fn purge_expired(&self) -> Result<usize, AuthError> {
        let now = self.clock.now();
        let store = self.store.clone();
        let purged = retry_blocking("session.purge", move || store.purge_expired(now))
            .await
            .map_err(unavailable)?;
        if purged > 0 {
            tracing::debug!(purged, "Purged expired sessions");
        }
        Ok(purged)
    }

    /// Make validation activity durable.
    pub async fn flush_activity(&self) -> Result<usize, AuthError> {
        let store = self.store.clone();
        let written = retry_blocking("session.flush", move || store.flush())
            .await
            .map_err(unavailable)?;
        if written > 0 {
            tracing::debug!(written, "Flushed session activity");
        }
        Ok(written)
    }

    /// Cookie transport value for a session.
    pub fn cookie_value(&self, id: &SessionId) -> String {
        self.seal(SESSION_COOKIE_PURPOSE, id.as_str())
    }

    /// Verify a cookie's MAC (constant time) and extract the session id.
    pub fn parse_cookie(&self, value: &str) -> Result<SessionId, AuthError> {
        SessionId::parse(self.open_sealed(SESSION_COOKIE_PURPOSE, value)?)
    }

    /// `<value>.<tag>` with the tag bound to `purpose`, so a value sealed
    /// for one cookie is never accepted as another.
    pub fn seal(&self, purpose: &str, value: &str) -> String {
        let tag = self.tagged(purpose, value).finalize().into_bytes();
        format!("{value}.{}", Base64UrlUnpadded::encode_string(&tag))
    }

    /// Inverse of [`SessionManager::seal`].
    pub fn open_sealed<'a>(&self, purpose: &str, sealed: &'a str) -> Result<&'a str, AuthError> {
        let (value, tag) = sealed
            .rsplit_once('.')
            .ok_or(AuthError::MalformedCredential)?;
        let tag = Base64UrlUnpadded::decode_vec(tag).map_err(|_| AuthError::MalformedCredential)?;

        self.tagged(purpose, value)
            .verify_slice(&tag)
            .map_err(|_| AuthError::MalformedCredential)?;
        Ok(value)
    }

    fn tagged(&self, purpose: &str, value: &str) -> HmacSha256 {
        self.mac
            .clone()
            .chain_update(purpose)
            .chain_update([0u8])
            .chain_update(value)
    }
}

fn unavailable(e: StoreError) -> AuthError {
    tracing::error!(error = %e, "Session store unavailable");
    AuthError::Unavailable(e.to_string())
}
