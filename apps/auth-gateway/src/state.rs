// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Application state built once at startup and shared by every handler.

use std::sync::Arc;

use crate::audit::{AuditSink, TracingAuditSink};
use crate::auth::{AccessGate, KeyStore, KeyStoreError, SessionManager, SessionSettings, TokenService};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::directory::{DirectoryError, InMemoryDirectory, UserDirectory};
use crate::oauth::{GitHubProvider, OAuthBroker, ProviderError};
use crate::storage::{AuthDatabase, FileKeyBlobStore, StoreError};

/// Session cookie attributes that come from configuration.
#[derive(Debug, Clone)]
pub struct CookieSettings {
    pub secure: bool,
    pub domain: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub keys: Arc<KeyStore>,
    pub sessions: Arc<SessionManager>,
    pub tokens: Arc<TokenService>,
    pub gate: Arc<AccessGate>,
    pub oauth: Arc<OAuthBroker>,
    pub directory: Arc<dyn UserDirectory>,
    pub audit: Arc<dyn AuditSink>,
    pub clock: Arc<dyn Clock>,
    pub cookies: CookieSettings,
}

/// Everything that can stop the service from starting.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to open database: {0}")]
    Database(#[source] StoreError),
    #[error("failed to load signing keys: {0}")]
    Keys(#[from] KeyStoreError),
    #[error("failed to initialize sessions: {0}")]
    Sessions(String),
    #[error("failed to configure identity provider: {0}")]
    Provider(#[from] ProviderError),
    #[error("failed to initialize user directory: {0}")]
    Directory(#[from] DirectoryError),
}

/// Build the state from configuration: redb for sessions and links, the
/// key ring file under the data directory, GitHub as identity provider.
///
/// Returns the concrete directory too so `main` can seed a user.
pub fn initialize(config: &Config) -> Result<(AppState, Arc<InMemoryDirectory>), StartupError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);

    let database = Arc::new(AuthDatabase::open(&config.database_path()).map_err(StartupError::Database)?);
    tracing::info!(path = %config.database_path().display(), "Database opened");

    let keys = Arc::new(KeyStore::open(
        Arc::new(FileKeyBlobStore::new(config.key_ring_path())),
        config.key_grace,
        clock.clone(),
        audit.clone(),
    )?);

    let sessions = Arc::new(
        SessionManager::new(
            database.clone(),
            &config.session_secret,
            SessionSettings {
                ttl: config.session_ttl,
                sliding: config.session_sliding,
            },
            clock.clone(),
            audit.clone(),
        )
        .map_err(|e| StartupError::Sessions(e.to_string()))?,
    );

    let tokens = Arc::new(TokenService::new(
        keys.clone(),
        config.token_issuer.clone(),
        config.token_ttl,
        clock.clone(),
        audit.clone(),
    ));

    let gate = Arc::new(AccessGate::new(
        sessions.clone(),
        tokens.clone(),
        clock.clone(),
        audit.clone(),
    ));

    let directory = Arc::new(InMemoryDirectory::new(database.clone())?);
    let provider = Arc::new(GitHubProvider::new(&config.github)?);
    let oauth = Arc::new(OAuthBroker::new(
        provider,
        database,
        directory.clone(),
        config.oauth_auto_provision,
        clock.clone(),
        audit.clone(),
    ));

    let state = AppState {
        keys,
        sessions,
        tokens,
        gate,
        oauth,
        directory: directory.clone(),
        audit,
        clock,
        cookies: CookieSettings {
            secure: config.cookie_secure,
            domain: config.cookie_domain.clone(),
        },
    };
    Ok((state, directory))
}
