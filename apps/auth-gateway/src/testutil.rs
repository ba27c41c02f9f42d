// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared fixtures for unit and router tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use url::Url;

use crate::audit::MemoryAuditSink;
use crate::auth::{AccessGate, KeyStore, MemoryKeyBlobStore, SessionManager, SessionSettings, TokenService};
use crate::clock::ManualClock;
use crate::directory::InMemoryDirectory;
use crate::models::UserId;
use crate::oauth::{IdentityProvider, OAuthBroker, ProviderError, ProviderProfile, RepoRef, TokenGrant};
use crate::state::{AppState, CookieSettings};
use crate::store::InMemoryStore;

pub const TEST_SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";
pub const TEST_USERNAME: &str = "alice";
pub const TEST_PASSWORD: &str = "password";
pub const TEST_USER_ID: &str = "7";

/// Provider double: `validcode` is the only accepted code and it always
/// resolves to `gh123`/`octocat`.
#[derive(Clone)]
pub struct StubProvider {
    grant_ttl: Duration,
    refresh_token: bool,
    pub repo_calls: Arc<AtomicUsize>,
    pub refresh_calls: Arc<AtomicUsize>,
}

impl StubProvider {
    pub fn new() -> Self {
        Self {
            grant_ttl: Duration::hours(8),
            refresh_token: true,
            repo_calls: Arc::new(AtomicUsize::new(0)),
            refresh_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_grant_ttl(mut self, ttl: Duration) -> Self {
        self.grant_ttl = ttl;
        self
    }

    pub fn without_refresh_token(mut self) -> Self {
        self.refresh_token = false;
        self
    }

    fn grant(&self, access_token: &str) -> TokenGrant {
        TokenGrant {
            access_token: access_token.to_string(),
            refresh_token: self.refresh_token.then(|| "ghr_valid".to_string()),
            expires_in: Some(self.grant_ttl),
            scopes: vec!["read:user".to_string(), "repo".to_string()],
        }
    }
}

#[async_trait]
impl IdentityProvider for StubProvider {
    fn name(&self) -> &str {
        "github"
    }

    fn authorization_url(&self, state: &str) -> Url {
        let mut url = Url::parse("https://provider.test/authorize").unwrap();
        url.query_pairs_mut().append_pair("state", state);
        url
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ProviderError> {
        match code {
            "validcode" => Ok(self.grant("gho_valid")),
            other => Err(ProviderError::Rejected(format!("bad_verification_code: {other}"))),
        }
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, ProviderError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if refresh_token != "ghr_valid" {
            return Err(ProviderError::Rejected("bad_refresh_token".to_string()));
        }
        Ok(self.grant("gho_refreshed"))
    }

    async fn fetch_profile(&self, _access_token: &str) -> Result<ProviderProfile, ProviderError> {
        Ok(ProviderProfile {
            provider_user_id: "gh123".to_string(),
            login: "octocat".to_string(),
            name: Some("The Octocat".to_string()),
            email: None,
        })
    }

    async fn repo_access(&self, _access_token: &str, repo: &RepoRef) -> Result<bool, ProviderError> {
        self.repo_calls.fetch_add(1, Ordering::SeqCst);
        Ok(repo.owner == "octocat" && repo.name == "writable")
    }
}

/// Every component wired together over in-memory collaborators and a
/// manual clock.
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub audit: Arc<MemoryAuditSink>,
    pub store: Arc<InMemoryStore>,
    pub directory: Arc<InMemoryDirectory>,
    pub keys: Arc<KeyStore>,
    pub sessions: Arc<SessionManager>,
    pub tokens: Arc<TokenService>,
    pub gate: Arc<AccessGate>,
    pub provider: StubProvider,
    pub oauth: Arc<OAuthBroker>,
}

impl Harness {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::default());
        let audit = Arc::new(MemoryAuditSink::new());
        let store = Arc::new(InMemoryStore::new());

        let directory = Arc::new(InMemoryDirectory::for_tests().with_next_id(42));
        directory
            .insert_user(UserId::from(TEST_USER_ID), TEST_USERNAME, TEST_PASSWORD)
            .unwrap();

        let keys = Arc::new(
            KeyStore::open(
                Arc::new(MemoryKeyBlobStore::new()),
                Duration::seconds(600),
                clock.clone(),
                audit.clone(),
            )
            .unwrap(),
        );
        let sessions = Arc::new(
            SessionManager::new(
                store.clone(),
                TEST_SECRET,
                SessionSettings {
                    ttl: Duration::seconds(3600),
                    sliding: true,
                },
                clock.clone(),
                audit.clone(),
            )
            .unwrap(),
        );
        let tokens = Arc::new(TokenService::new(
            keys.clone(),
            "auth-gateway-test",
            Duration::seconds(300),
            clock.clone(),
            audit.clone(),
        ));
        let gate = Arc::new(AccessGate::new(
            sessions.clone(),
            tokens.clone(),
            clock.clone(),
            audit.clone(),
        ));

        let provider = StubProvider::new();
        let oauth = Arc::new(OAuthBroker::new(
            Arc::new(provider.clone()),
            store.clone(),
            directory.clone(),
            true,
            clock.clone(),
            audit.clone(),
        ));

        Self {
            clock,
            audit,
            store,
            directory,
            keys,
            sessions,
            tokens,
            gate,
            provider,
            oauth,
        }
    }

    /// A broker sharing this harness's stores, clock and audit sink.
    pub fn broker_with(&self, provider: StubProvider, auto_provision: bool) -> OAuthBroker {
        OAuthBroker::new(
            Arc::new(provider),
            self.store.clone(),
            self.directory.clone(),
            auto_provision,
            self.clock.clone(),
            self.audit.clone(),
        )
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            keys: self.keys.clone(),
            sessions: self.sessions.clone(),
            tokens: self.tokens.clone(),
            gate: self.gate.clone(),
            oauth: self.oauth.clone(),
            directory: self.directory.clone(),
            audit: self.audit.clone(),
            clock: self.clock.clone(),
            cookies: CookieSettings {
                secure: true,
                domain: None,
            },
        }
    }
}
