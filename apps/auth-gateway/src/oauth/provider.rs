// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Identity provider collaborator.
//!
//! The broker only needs the standard authorization-code grant plus two
//! provider API calls: the profile of the authenticated account and a
//! repository permission lookup.

use std::fmt;

use async_trait::async_trait;
use chrono::Duration;
use url::Url;

use crate::auth::AuthError;

/// Errors from a provider call. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Provider client could not be built from its settings.
    #[error("provider misconfigured: {0}")]
    Configuration(String),

    /// Transport failure or timeout.
    #[error("provider request failed: {0}")]
    Request(String),

    /// The provider refused the code, token or request.
    #[error("provider rejected the request: {0}")]
    Rejected(String),

    /// The provider answered with something we could not interpret.
    #[error("unexpected provider response: {0}")]
    Unexpected(String),
}

/// Tokens returned by a code exchange or refresh.
#[derive(Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<Duration>,
    pub scopes: Vec<String>,
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_in", &self.expires_in)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Account details of the authenticated provider user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    /// Stable provider-side identifier (never the login, which can change).
    pub provider_user_id: String,
    pub login: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

/// `owner/name` repository reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn parse(value: &str) -> Result<Self, AuthError> {
        let valid = |part: &str| {
            !part.is_empty()
                && part != "."
                && part != ".."
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        };
        match value.split_once('/') {
            Some((owner, name)) if valid(owner) && valid(name) => Ok(Self {
                owner: owner.to_string(),
                name: name.to_string(),
            }),
            _ => Err(AuthError::InvalidRepository),
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Short provider name used as the link key, e.g. `github`.
    fn name(&self) -> &str;

    /// Provider authorization URL carrying `state`.
    fn authorization_url(&self, state: &str) -> Url;

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ProviderError>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, ProviderError>;

    async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, ProviderError>;

    /// Whether the token's owner may write to `repo`.
    async fn repo_access(&self, access_token: &str, repo: &RepoRef) -> Result<bool, ProviderError>;
}
