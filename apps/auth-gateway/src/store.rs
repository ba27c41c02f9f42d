// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-memory session and identity store.
//!
//! Used by tests and by deployments that accept losing sessions on restart.
//! Session rows are locked individually: the map lock is only held long
//! enough to find the row, and validation happens under the row's own
//! mutex.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};

use crate::auth::{Session, SessionId, SessionStore, TouchOutcome};
use crate::models::UserId;
use crate::oauth::{IdentityStore, LinkedIdentity};
use crate::storage::{StoreError, StoreResult};

type SessionRow = Arc<Mutex<Session>>;

#[derive(Default)]
pub struct InMemoryStore {
    sessions: RwLock<HashMap<String, SessionRow>>,
    /// `(provider, provider_user_id)` → link
    identities: RwLock<HashMap<(String, String), LinkedIdentity>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    fn row(&self, id: &SessionId) -> StoreResult<Option<SessionRow>> {
        let sessions = self.sessions.read().map_err(|_| StoreError::Poisoned)?;
        Ok(sessions.get(id.as_str()).cloned())
    }
}

impl SessionStore for InMemoryStore {
    fn insert(&self, session: &Session) -> StoreResult<()> {
        let mut sessions = self.sessions.write().map_err(|_| StoreError::Poisoned)?;
        sessions.insert(
            session.session_id.as_str().to_string(),
            Arc::new(Mutex::new(session.clone())),
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
        let mut session = row.lock().map_err(|_| StoreError::Poisoned)?;
        if session.is_expired_at(now) {
            return Ok(TouchOutcome::Expired);
        }
        session.last_seen_at = now;
        if let Some(expires_at) = extend_to {
            session.expires_at = expires_at;
        }
        Ok(TouchOutcome::Valid(session.clone()))
    }

    fn remove(&self, id: &SessionId) -> StoreResult<bool> {
        let mut sessions = self.sessions.write().map_err(|_| StoreError::Poisoned)?;
        Ok(sessions.remove(id.as_str()).is_some())
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let mut sessions = self.sessions.write().map_err(|_| StoreError::Poisoned)?;
        let before = sessions.len();
        sessions.retain(|_, row| match row.lock() {
            Ok(session) => !session.is_expired_at(now),
            Err(_) => true,
        });
        Ok(before - sessions.len())
    }
}

impl IdentityStore for InMemoryStore {
    fn find_link(&self, provider: &str, provider_user_id: &str) -> StoreResult<Option<LinkedIdentity>> {
        let identities = self.identities.read().map_err(|_| StoreError::Poisoned)?;
        Ok(identities
            .get(&(provider.to_string(), provider_user_id.to_string()))
            .cloned())
    }

    fn upsert_link(&self, identity: &LinkedIdentity) -> StoreResult<()> {
        let mut identities = self.identities.write().map_err(|_| StoreError::Poisoned)?;
        identities.insert(
            (identity.provider.clone(), identity.provider_user_id.clone()),
            identity.clone(),
        );
        Ok(())
    }

    fn claim_link(&self, identity: &LinkedIdentity) -> StoreResult<LinkedIdentity> {
        let mut identities = self.identities.write().map_err(|_| StoreError::Poisoned)?;
        let key = (identity.provider.clone(), identity.provider_user_id.clone());
        let stored = match identities.get(&key) {
            Some(existing) => LinkedIdentity {
                local_user_id: existing.local_user_id.clone(),
                linked_at: existing.linked_at,
                ..identity.clone()
            },
            None => identity.clone(),
        };
        identities.insert(key, stored.clone());
        Ok(stored)
    }

    fn links_for_user(&self, user_id: &UserId) -> StoreResult<Vec<LinkedIdentity>> {
        let identities = self.identities.read().map_err(|_| StoreError::Poisoned)?;
        let mut links: Vec<_> = identities
            .values()
            .filter(|link| &link.local_user_id == user_id)
            .cloned()
            .collect();
        links.sort_by(|a, b| (&a.provider, &a.provider_user_id).cmp(&(&b.provider, &b.provider_user_id)));
        Ok(links)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::StoredGrant;
    use chrono::Duration;

    fn session(id: &str, now: DateTime<Utc>) -> Session {
        Session {
            session_id: SessionId::parse(id).unwrap(),
            user_id: UserId::from("42"),
            issued_at: now,
            expires_at: now + Duration::seconds(60),
            last_seen_at: now,
        }
    }

    const ID_A: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";
    const ID_B: &str = "BBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBA";

    #[test]
    fn touch_reports_each_outcome() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let s = session(ID_A, now);
        store.insert(&s).unwrap();

        assert!(matches!(store.touch(&s.session_id, now, None).unwrap(), TouchOutcome::Valid(_)));
        assert_eq!(
            store.touch(&s.session_id, now + Duration::seconds(61), None).unwrap(),
            TouchOutcome::Expired
        );
        let other = SessionId::parse(ID_B).unwrap();
        assert_eq!(store.touch(&other, now, None).unwrap(), TouchOutcome::NotFound);
    }

    #[test]
    fn concurrent_touches_all_observe_a_consistent_row() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let s = session(ID_A, now);
        store.insert(&s).unwrap();

        std::thread::scope(|scope| {
            for i in 1..=16 {
                let store = &store;
                let id = s.session_id.clone();
                scope.spawn(move || {
                    let at = now + Duration::seconds(i);
                    let outcome = store.touch(&id, at, Some(at + Duration::seconds(60))).unwrap();
                    let TouchOutcome::Valid(seen) = outcome else {
                        panic!("session should be live");
                    };
                    assert_eq!(seen.expires_at, seen.last_seen_at + Duration::seconds(60));
                });
            }
        });
    }

    #[test]
    fn purge_keeps_live_sessions() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.insert(&session(ID_A, now - Duration::seconds(120))).unwrap();
        store.insert(&session(ID_B, now)).unwrap();

        assert_eq!(store.purge_expired(now).unwrap(), 1);
        assert_eq!(store.session_count(), 1);
    }

    #[test]
    fn links_are_listed_per_user() {
        let store = InMemoryStore::new();
        let link = LinkedIdentity {
            provider: "github".into(),
            provider_user_id: "gh123".into(),
            local_user_id: UserId::from("42"),
            login: "octocat".into(),
            linked_at: Utc::now(),
            grant: StoredGrant {
                access_token: "gho".into(),
                refresh_token: None,
                expires_at: None,
                scopes: vec![],
            },
        };
        store.upsert_link(&link).unwrap();
        store.upsert_link(&link).unwrap();

        assert_eq!(store.links_for_user(&UserId::from("42")).unwrap(), vec![link.clone()]);
        assert!(store.links_for_user(&UserId::from("7")).unwrap().is_empty());
        assert_eq!(store.find_link("github", "gh123").unwrap(), Some(link));
    }

    #[test]
    fn claim_keeps_the_first_owner() {
        let store = InMemoryStore::new();
        let first = LinkedIdentity {
            provider: "github".into(),
            provider_user_id: "gh123".into(),
            local_user_id: UserId::from("42"),
            login: "octocat".into(),
            linked_at: Utc::now(),
            grant: StoredGrant {
                access_token: "gho_first".into(),
                refresh_token: None,
                expires_at: None,
                scopes: vec![],
            },
        };
        let mut second = first.clone();
        second.local_user_id = UserId::from("43");
        second.linked_at = first.linked_at + Duration::seconds(5);
        second.grant.access_token = "gho_second".into();

        assert_eq!(store.claim_link(&first).unwrap(), first);
        let stored = store.claim_link(&second).unwrap();
        assert_eq!(stored.local_user_id, UserId::from("42"));
        assert_eq!(stored.linked_at, first.linked_at);
        assert_eq!(stored.grant.access_token, "gho_second");
        assert!(store.links_for_user(&UserId::from("43")).unwrap().is_empty());
    }
}
