// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded auth database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `sessions`: session_id → serialized Session
//! - `linked_identities`: `provider|provider_user_id` → serialized LinkedIdentity
//! - `user_links`: composite key (user_id|provider|provider_user_id) → provider
//! - `counters`: name → last value handed out (user ids)
//!
//! ## Session Activity
//!
//! All sessions are loaded into a row cache at open. Validation works on
//! the cached row under that row's own mutex and only marks it dirty, so
//! validations never wait on the redb writer. Dirty rows are written in
//! one transaction by [`SessionStore::flush`] (every maintenance sweep, and
//! on drop). A crash loses at most the `last_seen_at`/sliding-expiry
//! updates since the last flush; creation and removal are written through.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use redb::{
    Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition, WriteTransaction,
};

use super::{StoreError, StoreResult};
use crate::auth::{Session, SessionId, SessionStore, TouchOutcome};
use crate::directory::UserIdAllocator;
use crate::models::UserId;
use crate::oauth::{IdentityStore, LinkedIdentity};

// =============================================================================
// Table Definitions
// =============================================================================

/// Primary table: session_id → serialized Session (JSON bytes).
const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

/// Primary table: `provider|provider_user_id` → serialized LinkedIdentity.
const LINKED_IDENTITIES: TableDefinition<&str, &[u8]> = TableDefinition::new("linked_identities");

/// Index: `user_id|provider|provider_user_id` → provider.
const USER_LINKS: TableDefinition<&[u8], &str> = TableDefinition::new("user_links");

/// Monotonic counters.
const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");

const USER_ID_COUNTER: &str = "user_id";

// =============================================================================
// Key Helpers
// =============================================================================

fn identity_key(provider: &str, provider_user_id: &str) -> String {
    format!("{provider}|{provider_user_id}")
}

fn user_link_key(user_id: &UserId, provider: &str, provider_user_id: &str) -> Vec<u8> {
    let mut key = user_prefix(user_id);
    key.extend_from_slice(provider.as_bytes());
    key.push(b'|');
    key.extend_from_slice(provider_user_id.as_bytes());
    key
}

fn user_prefix(user_id: &UserId) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(user_id.as_str().len() + 1);
    prefix.extend_from_slice(user_id.as_str().as_bytes());
    prefix.push(b'|');
    prefix
}

/// Upper bound for a prefix range scan (prefix with 0xFF bytes appended).
fn user_prefix_end(user_id: &UserId) -> Vec<u8> {
    let mut end = user_prefix(user_id);
    end.extend_from_slice(&[0xFF; 16]);
    end
}

/// The identity-table key encoded after the user prefix of an index key.
fn identity_key_from_link(key: &[u8], prefix_len: usize) -> Option<String> {
    std::str::from_utf8(key.get(prefix_len..)?).ok().map(str::to_string)
}

/// Write a link and keep the user index in step with it.
fn write_link(txn: &WriteTransaction, identity: &LinkedIdentity) -> StoreResult<()> {
    let key = identity_key(&identity.provider, &identity.provider_user_id);
    let json = serde_json::to_vec(identity)?;

    let mut identities = txn.open_table(LINKED_IDENTITIES)?;
    let previous = identities
        .insert(key.as_str(), json.as_slice())?
        .map(|old| old.value().to_vec());

    let mut index = txn.open_table(USER_LINKS)?;
    // A relink to a different local user moves the index entry
    if let Some(bytes) = previous {
        let old: LinkedIdentity = serde_json::from_slice(&bytes)?;
        if old.local_user_id != identity.local_user_id {
            let old_key = user_link_key(&old.local_user_id, &old.provider, &old.provider_user_id);
            index.remove(old_key.as_slice())?;
        }
    }
    let link_key = user_link_key(&identity.local_user_id, &identity.provider, &identity.provider_user_id);
    index.insert(link_key.as_slice(), identity.provider.as_str())?;
    Ok(())
}

// =============================================================================
// Session Row Cache
// =============================================================================

struct CachedSession {
    session: Mutex<Session>,
    /// Touched since the row was last written.
    dirty: AtomicBool,
}

impl CachedSession {
    fn new(session: Session) -> Arc<Self> {
        Arc::new(Self {
            session: Mutex::new(session),
            dirty: AtomicBool::new(false),
        })
    }

    fn snapshot(&self) -> StoreResult<Session> {
        Ok(self.session.lock().map_err(|_| StoreError::Poisoned)?.clone())
    }
}

// =============================================================================
// AuthDatabase
// =============================================================================

pub struct AuthDatabase {
    db: Database,
    sessions: RwLock<HashMap<String, Arc<CachedSession>>>,
    /// Held across every session write transaction so a flush can never
    /// re-persist a row that a concurrent remove or purge just deleted.
    writer: Mutex<()>,
}

impl AuthDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(SESSIONS)?;
            let _ = write_txn.open_table(LINKED_IDENTITIES)?;
            let _ = write_txn.open_table(USER_LINKS)?;
            let _ = write_txn.open_table(COUNTERS)?;
        }
        write_txn.commit()?;

        let sessions = Self::load_sessions(&db)?;
        tracing::debug!(sessions = sessions.len(), "Session rows loaded");

        Ok(Self {
            db,
            sessions: RwLock::new(sessions),
            writer: Mutex::new(()),
        })
    }

    fn load_sessions(db: &Database) -> StoreResult<HashMap<String, Arc<CachedSession>>> {
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(SESSIONS)?;
        let mut sessions = HashMap::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            match serde_json::from_slice::<Session>(value.value()) {
                Ok(session) => {
                    sessions.insert(key.value().to_string(), CachedSession::new(session));
                }
                Err(e) => tracing::warn!(error = %e, "Skipping unreadable session row"),
            }
        }
        Ok(sessions)
    }

    fn write_lock(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current view of a session, including activity not yet flushed.
    pub fn get_session(&self, id: &SessionId) -> StoreResult<Option<Session>> {
        let row = self.row(id)?;
        row.map(|row| row.snapshot()).transpose()
    }

    /// Number of persisted session rows.
    pub fn session_count(&self) -> StoreResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SESSIONS)?;
        Ok(table.len()?)
    }

    fn row(&self, id: &SessionId) -> StoreResult<Option<Arc<CachedSession>>> {
        let sessions = self.sessions.read().map_err(|_| StoreError::Poisoned)?;
        Ok(sessions.get(id.as_str()).cloned())
    }

    /// Write every dirty row. Caller holds the writer lock.
    fn flush_dirty(&self, _writer: &MutexGuard<'_, ()>) -> StoreResult<usize> {
        let pending: Vec<Arc<CachedSession>> = {
            let sessions = self.sessions.read().map_err(|_| StoreError::Poisoned)?;
            sessions
                .values()
                .filter(|row| row.dirty.swap(false, Ordering::AcqRel))
                .cloned()
                .collect()
        };
        if pending.is_empty() {
            return Ok(0);
        }

        let result = self.write_rows(&pending);
        if result.is_err() {
            for row in &pending {
                row.dirty.store(true, Ordering::Release);
            }
        }
        result.map(|()| pending.len())
    }

    fn write_rows(&self, rows: &[Arc<CachedSession>]) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SESSIONS)?;
            for row in rows {
                let session = row.snapshot()?;
                let json = serde_json::to_vec(&session)?;
                table.insert(session.session_id.as_str(), json.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }
}

impl Drop for AuthDatabase {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::warn!(error = %e, "Failed to flush session activity on close");
        }
    }
}

impl SessionStore for AuthDatabase {
    fn insert(&self, session: &Session) -> StoreResult<()> {
        let json = serde_json::to_vec(session)?;
        let _writer = self.write_lock();

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SESSIONS)?;
            table.insert(session.session_id.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;

        let mut sessions = self.sessions.write().map_err(|_| StoreError::Poisoned)?;
        sessions.insert(
            session.session_id.as_str().to_string(),
            CachedSession::new(session.clone()),
        );
        Ok(())
    }

    fn touch(
        &self,
        id: &SessionId,
        now: DateTime<Utc>,
        extend_to: Option<DateTime<Utc>>,
    ) -> StoreResult<TouchOutcome> {
        let Some(row) = self.row(id)? else {
            return Ok(TouchOutcome::NotFound);
        };
        let mut session = row.session.lock().map_err(|_| StoreError::Poisoned)?;
        if session.is_expired_at(now) {
            return Ok(TouchOutcome::Expired);
        }
        session.last_seen_at = now;
        if let Some(expires_at) = extend_to {
            session.expires_at = expires_at;
        }
        row.dirty.store(true, Ordering::Release);
        Ok(TouchOutcome::Valid(session.clone()))
    }

    fn remove(&self, id: &SessionId) -> StoreResult<bool> {
        let _writer = self.write_lock();
        let cached = {
            let mut sessions = self.sessions.write().map_err(|_| StoreError::Poisoned)?;
            sessions.remove(id.as_str()).is_some()
        };

        let write_txn = self.db.begin_write()?;
        let stored = {
            let mut table = write_txn.open_table(SESSIONS)?;
            let removed = table.remove(id.as_str())?.is_some();
            removed
        };
        write_txn.commit()?;
        Ok(cached || stored)
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let writer = self.write_lock();
        // Rows renewed since the last flush must not be judged on stale data
        self.flush_dirty(&writer)?;

        {
            let mut sessions = self.sessions.write().map_err(|_| StoreError::Poisoned)?;
            sessions.retain(|_, row| match row.session.lock() {
                Ok(session) => !session.is_expired_at(now),
                Err(_) => true,
            });
        }

        let write_txn = self.db.begin_write()?;
        let mut purged = 0usize;
        {
            let mut table = write_txn.open_table(SESSIONS)?;
            table.retain(|_, value| {
                // Unreadable rows are kept for inspection rather than dropped
                let expired = serde_json::from_slice::<Session>(value)
                    .map(|session| session.is_expired_at(now))
                    .unwrap_or(false);
                if expired {
                    purged += 1;
                }
                !expired
            })?;
        }
        write_txn.commit()?;
        Ok(purged)
    }

    fn flush(&self) -> StoreResult<usize> {
        let writer = self.write_lock();
        self.flush_dirty(&writer)
    }
}

impl UserIdAllocator for AuthDatabase {
    fn next_user_id(&self) -> StoreResult<u64> {
        let write_txn = self.db.begin_write()?;
        let id = {
            let mut table = write_txn.open_table(COUNTERS)?;
            let last = table.get(USER_ID_COUNTER)?.map(|value| value.value()).unwrap_or(0);
            let id = last + 1;
            table.insert(USER_ID_COUNTER, id)?;
            id
        };
        write_txn.commit()?;
        Ok(id)
    }
}

impl IdentityStore for AuthDatabase {
    fn find_link(&self, provider: &str, provider_user_id: &str) -> StoreResult<Option<LinkedIdentity>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LINKED_IDENTITIES)?;
        match table.get(identity_key(provider, provider_user_id).as_str())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    fn upsert_link(&self, identity: &LinkedIdentity) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        write_link(&write_txn, identity)?;
        write_txn.commit()?;
        Ok(())
    }

    fn claim_link(&self, identity: &LinkedIdentity) -> StoreResult<LinkedIdentity> {
        let write_txn = self.db.begin_write()?;
        let existing: Option<LinkedIdentity> = {
            let table = write_txn.open_table(LINKED_IDENTITIES)?;
            let key = identity_key(&identity.provider, &identity.provider_user_id);
            let bytes = table.get(key.as_str())?.map(|value| value.value().to_vec());
            bytes.map(|b| serde_json::from_slice(&b)).transpose()?
        };

        let stored = match existing {
            Some(owner) => LinkedIdentity {
                local_user_id: owner.local_user_id,
                linked_at: owner.linked_at,
                ..identity.clone()
            },
            None => identity.clone(),
        };
        write_link(&write_txn, &stored)?;
        write_txn.commit()?;
        Ok(stored)
    }

    fn links_for_user(&self, user_id: &UserId) -> StoreResult<Vec<LinkedIdentity>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(USER_LINKS)?;
        let identities = read_txn.open_table(LINKED_IDENTITIES)?;

        let prefix = user_prefix(user_id);
        let prefix_end = user_prefix_end(user_id);

        let mut links = Vec::new();
        for entry in index.range(prefix.as_slice()..prefix_end.as_slice())? {
            let (key, _) = entry?;
            let Some(identity_key) = identity_key_from_link(key.value(), prefix.len()) else {
                continue;
            };
            if let Some(value) = identities.get(identity_key.as_str())? {
                let identity: LinkedIdentity = serde_json::from_slice(value.value())?;
                links.push(identity);
            }
        }
        Ok(links)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::StoredGrant;
    use chrono::Duration;

    fn temp_db() -> (AuthDatabase, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = AuthDatabase::open(&dir.path().join("auth.redb")).unwrap();
        (db, dir)
    }

    fn session(now: DateTime<Utc>, ttl_secs: i64) -> Session {
        let id = SessionId::parse("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA").unwrap();
        Session {
            session_id: id,
            user_id: UserId::from("42"),
            issued_at: now,
            expires_at: now + Duration::seconds(ttl_secs),
            last_seen_at: now,
        }
    }

    fn link(user: &str, provider_user_id: &str) -> LinkedIdentity {
        LinkedIdentity {
            provider: "github".into(),
            provider_user_id: provider_user_id.into(),
            local_user_id: UserId::from(user),
            login: "octocat".into(),
            linked_at: Utc::now(),
            grant: StoredGrant {
                access_token: "gho_x".into(),
                refresh_token: None,
                expires_at: None,
                scopes: vec!["repo".into()],
            },
        }
    }

    #[test]
    fn touch_updates_last_seen_and_extends() {
        let (db, _dir) = temp_db();
        let now = Utc::now();
        let s = session(now, 60);
        db.insert(&s).unwrap();

        let later = now + Duration::seconds(30);
        let outcome = db.touch(&s.session_id, later, Some(later + Duration::seconds(60))).unwrap();
        let TouchOutcome::Valid(updated) = outcome else {
            panic!("expected valid session, got {outcome:?}");
        };
        assert_eq!(updated.last_seen_at, later);
        assert_eq!(updated.expires_at, later + Duration::seconds(60));
        assert_eq!(db.get_session(&s.session_id).unwrap(), Some(updated));
    }

    #[test]
    fn touch_never_waits_for_the_writer() {
        let (db, _dir) = temp_db();
        let now = Utc::now();
        let s = session(now, 60);
        db.insert(&s).unwrap();

        // An open write transaction would block any touch that needed one.
        let held = db.db.begin_write().unwrap();
        let outcome = db.touch(&s.session_id, now + Duration::seconds(1), None).unwrap();
        assert!(matches!(outcome, TouchOutcome::Valid(_)));
        held.abort().unwrap();
    }

    #[test]
    fn touched_activity_is_persisted_by_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.redb");
        let now = Utc::now();
        let s = session(now, 60);
        let later = now + Duration::seconds(30);
        {
            let db = AuthDatabase::open(&path).unwrap();
            db.insert(&s).unwrap();
            db.touch(&s.session_id, later, Some(later + Duration::seconds(60))).unwrap();
            assert_eq!(db.flush().unwrap(), 1);
            assert_eq!(db.flush().unwrap(), 0);
        }
        let db = AuthDatabase::open(&path).unwrap();
        let stored = db.get_session(&s.session_id).unwrap().unwrap();
        assert_eq!(stored.last_seen_at, later);
        assert_eq!(stored.expires_at, later + Duration::seconds(60));
    }

    #[test]
    fn removed_session_is_not_resurrected_by_flush() {
        let (db, _dir) = temp_db();
        let now = Utc::now();
        let s = session(now, 60);
        db.insert(&s).unwrap();
        db.touch(&s.session_id, now, None).unwrap();

        assert!(db.remove(&s.session_id).unwrap());
        assert_eq!(db.flush().unwrap(), 0);
        assert_eq!(db.session_count().unwrap(), 0);
    }

    #[test]
    fn purge_judges_renewed_sessions_on_their_new_expiry() {
        let (db, _dir) = temp_db();
        let now = Utc::now();
        let s = session(now, 60);
        db.insert(&s).unwrap();
        db.touch(&s.session_id, now + Duration::seconds(50), Some(now + Duration::seconds(110)))
            .unwrap();

        assert_eq!(db.purge_expired(now + Duration::seconds(90)).unwrap(), 0);
        assert_eq!(db.session_count().unwrap(), 1);
    }

    #[test]
    fn user_ids_are_never_reused_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.redb");
        {
            let db = AuthDatabase::open(&path).unwrap();
            assert_eq!(db.next_user_id().unwrap(), 1);
            assert_eq!(db.next_user_id().unwrap(), 2);
        }
        let db = AuthDatabase::open(&path).unwrap();
        assert_eq!(db.next_user_id().unwrap(), 3);
    }

    #[test]
    fn claim_link_keeps_the_existing_owner() {
        let (db, _dir) = temp_db();
        let first = link("42", "gh123");
        assert_eq!(db.claim_link(&first).unwrap(), first);

        let mut second = link("43", "gh123");
        second.grant.access_token = "gho_newer".into();
        let stored = db.claim_link(&second).unwrap();

        assert_eq!(stored.local_user_id, UserId::from("42"));
        assert_eq!(stored.linked_at, first.linked_at);
        assert_eq!(db.find_link("github", "gh123").unwrap().unwrap().grant.access_token, "gho_newer");
        assert!(db.links_for_user(&UserId::from("43")).unwrap().is_empty());
        assert_eq!(db.links_for_user(&UserId::from("42")).unwrap().len(), 1);
    }

    #[test]
    fn touch_reports_expired_without_modifying() {
        let (db, _dir) = temp_db();
        let now = Utc::now();
        let s = session(now, 60);
        db.insert(&s).unwrap();

        let outcome = db.touch(&s.session_id, now + Duration::seconds(61), None).unwrap();
        assert_eq!(outcome, TouchOutcome::Expired);
        assert_eq!(db.get_session(&s.session_id).unwrap(), Some(s));
    }

    #[test]
    fn remove_is_idempotent() {
        let (db, _dir) = temp_db();
        let s = session(Utc::now(), 60);
        db.insert(&s).unwrap();

        assert!(db.remove(&s.session_id).unwrap());
        assert!(!db.remove(&s.session_id).unwrap());
        assert_eq!(db.touch(&s.session_id, Utc::now(), None).unwrap(), TouchOutcome::NotFound);
    }

    #[test]
    fn purge_removes_expired_rows() {
        let (db, _dir) = temp_db();
        let now = Utc::now();
        let expired = session(now - Duration::seconds(120), 60);
        db.insert(&expired).unwrap();
        let mut live = session(now, 60);
        live.session_id = SessionId::parse("BBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBA").unwrap();
        db.insert(&live).unwrap();

        assert_eq!(db.purge_expired(now).unwrap(), 1);
        assert_eq!(db.session_count().unwrap(), 1);
        assert!(db.get_session(&live.session_id).unwrap().is_some());
    }

    #[test]
    fn sessions_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.redb");
        let s = session(Utc::now(), 60);
        {
            let db = AuthDatabase::open(&path).unwrap();
            db.insert(&s).unwrap();
        }
        let db = AuthDatabase::open(&path).unwrap();
        assert_eq!(db.get_session(&s.session_id).unwrap(), Some(s));
    }

    #[test]
    fn links_are_unique_per_provider_account() {
        let (db, _dir) = temp_db();
        db.upsert_link(&link("42", "gh123")).unwrap();
        db.upsert_link(&link("42", "gh123")).unwrap();
        db.upsert_link(&link("42", "gh456")).unwrap();
        db.upsert_link(&link("7", "gh789")).unwrap();

        assert_eq!(db.find_link("github", "gh123").unwrap().unwrap().local_user_id, UserId::from("42"));
        assert!(db.find_link("github", "nobody").unwrap().is_none());
        assert_eq!(db.links_for_user(&UserId::from("42")).unwrap().len(), 2);
        assert_eq!(db.links_for_user(&UserId::from("7")).unwrap().len(), 1);
    }

    #[test]
    fn user_prefix_does_not_match_longer_ids() {
        let (db, _dir) = temp_db();
        db.upsert_link(&link("4", "gh1")).unwrap();
        db.upsert_link(&link("42", "gh2")).unwrap();

        let links = db.links_for_user(&UserId::from("4")).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].provider_user_id, "gh1");
    }

    #[test]
    fn relinking_moves_the_user_index() {
        let (db, _dir) = temp_db();
        db.upsert_link(&link("42", "gh123")).unwrap();
        db.upsert_link(&link("7", "gh123")).unwrap();

        assert!(db.links_for_user(&UserId::from("42")).unwrap().is_empty());
        assert_eq!(db.links_for_user(&UserId::from("7")).unwrap().len(), 1);
    }
}
