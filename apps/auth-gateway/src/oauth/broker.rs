// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! OAuth authorization-code broker.
//!
//! Issues state nonces, redeems provider callbacks into local users, and
//! answers repository access questions with the stored provider grant.

use std::sync::Arc;

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Duration, Utc};
use ring::rand::{SecureRandom, SystemRandom};
use url::Url;

use super::cache::{RepoAccessCache, REPO_ACCESS_TTL_SECS};
use super::provider::{IdentityProvider, ProviderError, RepoRef};
use super::state::{short, FlowPhase, PendingState, PendingStates};
use super::{IdentityStore, LinkedIdentity, StoredGrant};
use crate::audit::{AuditEvent, AuditEventType, AuditSink};
use crate::auth::AuthError;
use crate::clock::Clock;
use crate::directory::UserDirectory;
use crate::models::UserId;
use crate::storage::{retry_blocking, retry_transient, StoreError};

/// State nonce size (256 bits).
const STATE_NONCE_BYTES: usize = 32;

/// A started login: where to send the browser, and the state nonce the
/// browser must present again on the callback.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: Url,
    pub state: String,
}

/// Result of a successful callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackOutcome {
    pub user_id: UserId,
    /// Local path to send the browser to once the session is set.
    pub redirect_target: String,
    /// Whether a local user was created for this login.
    pub provisioned: bool,
}

pub struct OAuthBroker {
    provider: Arc<dyn IdentityProvider>,
    identities: Arc<dyn IdentityStore>,
    directory: Arc<dyn UserDirectory>,
    states: PendingStates,
    access_cache: RepoAccessCache,
    auto_provision: bool,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
    rng: SystemRandom,
    /// Serializes first logins so one provider account provisions one user.
    provisioning: tokio::sync::Mutex<()>,
}

impl OAuthBroker {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        identities: Arc<dyn IdentityStore>,
        directory: Arc<dyn UserDirectory>,
        auto_provision: bool,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            provider,
            identities,
            directory,
            states: PendingStates::default(),
            access_cache: RepoAccessCache::default(),
            auto_provision,
            clock,
            audit,
            rng: SystemRandom::new(),
            provisioning: tokio::sync::Mutex::new(()),
        }
    }

    /// Start a login: remember a fresh state nonce and return the provider
    /// URL carrying it.
    pub fn begin_authorization(&self, redirect_target: Option<&str>) -> Result<AuthorizationRequest, AuthError> {
        let now = self.clock.now();
        let nonce = self.generate_nonce()?;
        let redirect_target = sanitize_redirect(redirect_target);

        self.states.insert(
            nonce.clone(),
            PendingState {
                created_at: now,
                redirect_target: redirect_target.clone(),
            },
        );
        let url = self.provider.authorization_url(&nonce);

        tracing::info!(
            provider = self.provider.name(),
            state = short(&nonce),
            phase = ?FlowPhase::AuthorizationRequested,
            redirect_target = %redirect_target,
            "OAuth authorization started"
        );
        self.audit.record(
            AuditEvent::new(AuditEventType::OAuthStarted, now)
                .with_details(serde_json::json!({ "provider": self.provider.name() })),
        );
        Ok(AuthorizationRequest { url, state: nonce })
    }

    /// Redeem a provider callback.
    ///
    /// `bound_state` is the nonce the calling browser was handed when the
    /// flow began; a callback whose `state` differs is refused without
    /// touching the pending state. Otherwise the state is consumed before
    /// anything else, so a failed exchange still burns it.
    pub async fn handle_callback(
        &self,
        state: &str,
        bound_state: Option<&str>,
        code: &str,
    ) -> Result<CallbackOutcome, AuthError> {
        let result = self.complete_callback(state, bound_state, code).await;
        match &result {
            Ok(outcome) => tracing::info!(
                provider = self.provider.name(),
                user_id = %outcome.user_id,
                provisioned = outcome.provisioned,
                phase = ?FlowPhase::Completed,
                "OAuth login completed"
            ),
            Err(e) => {
                tracing::warn!(
                    provider = self.provider.name(),
                    state = short(state),
                    error_code = e.error_code(),
                    error = %e,
                    phase = ?FlowPhase::Failed,
                    "OAuth callback failed"
                );
                self.audit.record(
                    AuditEvent::new(AuditEventType::AuthFailure, self.clock.now())
                        .with_details(serde_json::json!({
                            "provider": self.provider.name(),
                            "kind": e.kind(),
                        }))
                        .failed(e.error_code()),
                );
            }
        }
        result
    }

    async fn complete_callback(
        &self,
        state: &str,
        bound_state: Option<&str>,
        code: &str,
    ) -> Result<CallbackOutcome, AuthError> {
        if bound_state != Some(state) {
            return Err(AuthError::StateMismatch);
        }
        let now = self.clock.now();
        let pending = self.states.consume(state, now)?;
        tracing::debug!(state = short(state), phase = ?FlowPhase::CallbackReceived, "OAuth state consumed");

        if code.is_empty() {
            return Err(AuthError::ExchangeFailed("no authorization code".to_string()));
        }

        let grant = self.provider.exchange_code(code).await.map_err(exchange_failed)?;
        let profile = self
            .provider
            .fetch_profile(&grant.access_token)
            .await
            .map_err(exchange_failed)?;

        let provider = self.provider.name().to_string();
        let mut existing = self.find_link(&provider, &profile.provider_user_id).await?;

        // Re-check under the lock: a concurrent first login may have just
        // linked this account.
        let _provisioning = if existing.is_none() && self.auto_provision {
            let guard = self.provisioning.lock().await;
            existing = self.find_link(&provider, &profile.provider_user_id).await?;
            Some(guard)
        } else {
            None
        };

        let (user_id, linked_at, mut provisioned) = match existing {
            Some(link) => (link.local_user_id, link.linked_at, false),
            None if self.auto_provision => {
                let user_id = self
                    .directory
                    .provision(&profile)
                    .await
                    .map_err(|e| AuthError::Unavailable(e.to_string()))?;
                (user_id, now, true)
            }
            None => return Err(AuthError::IdentityResolutionFailed),
        };

        let candidate = LinkedIdentity {
            provider,
            provider_user_id: profile.provider_user_id,
            local_user_id: user_id.clone(),
            login: profile.login,
            linked_at,
            grant: StoredGrant::from_grant(grant, now),
        };
        let identities = self.identities.clone();
        let link = retry_blocking("identity.claim", move || identities.claim_link(&candidate))
            .await
            .map_err(unavailable)?;

        let user_id = if link.local_user_id != user_id {
            tracing::warn!(
                provisioned_user = %user_id,
                owner = %link.local_user_id,
                provider_user_id = %link.provider_user_id,
                "Provider account was linked concurrently; using existing owner"
            );
            provisioned = false;
            link.local_user_id.clone()
        } else {
            user_id
        };
        self.access_cache.invalidate_user(&user_id);

        if provisioned {
            self.audit.record(
                AuditEvent::new(AuditEventType::UserProvisioned, now)
                    .with_user(user_id.as_str())
                    .with_details(serde_json::json!({ "provider": link.provider, "login": link.login })),
            );
        }
        self.audit.record(
            AuditEvent::new(AuditEventType::IdentityLinked, now)
                .with_user(user_id.as_str())
                .with_details(serde_json::json!({
                    "provider": link.provider,
                    "provider_user_id": link.provider_user_id,
                    "login": link.login,
                })),
        );

        Ok(CallbackOutcome {
            user_id,
            redirect_target: pending.redirect_target,
            provisioned,
        })
    }

    /// Whether the user's linked provider account may write to `repo`
    /// (`owner/name`).
    pub async fn repo_access(&self, user_id: &UserId, repo: &str) -> Result<bool, AuthError> {
        let repo = RepoRef::parse(repo)?;
        let now = self.clock.now();

        if let Some(allowed) = self.access_cache.get(user_id, &repo, now) {
            return Ok(allowed);
        }

        let link = self.provider_link(user_id).await?.ok_or_else(|| {
            AuthError::ExchangeFailed(format!("no {} identity linked", self.provider.name()))
        })?;
        let grant = self.usable_grant(link, now).await?;

        let allowed = self
            .provider
            .repo_access(&grant.access_token, &repo)
            .await
            .map_err(exchange_failed)?;

        let fresh_until = now + Duration::seconds(REPO_ACCESS_TTL_SECS);
        let cache_until = grant.expires_at.map_or(fresh_until, |at| at.min(fresh_until));
        self.access_cache.put(user_id, &repo, allowed, cache_until);

        tracing::debug!(user_id = %user_id, repo = %repo, allowed, "Repository access checked");
        Ok(allowed)
    }

    /// The stored grant, refreshed first if it has expired.
    async fn usable_grant(&self, mut link: LinkedIdentity, now: DateTime<Utc>) -> Result<StoredGrant, AuthError> {
        if !link.grant.is_expired_at(now) {
            return Ok(link.grant);
        }
        let refresh_token = link
            .grant
            .refresh_token
            .clone()
            .ok_or_else(|| AuthError::ExchangeFailed("provider grant expired".to_string()))?;

        let refreshed = self.provider.refresh(&refresh_token).await.map_err(exchange_failed)?;
        let mut grant = StoredGrant::from_grant(refreshed, now);
        if grant.refresh_token.is_none() {
            grant.refresh_token = Some(refresh_token);
        }

        link.grant = grant.clone();
        let (identities, updated) = (self.identities.clone(), link.clone());
        retry_blocking("identity.upsert", move || identities.upsert_link(&updated))
            .await
            .map_err(unavailable)?;
        tracing::info!(user_id = %link.local_user_id, provider = %link.provider, "Provider grant refreshed");
        Ok(grant)
    }

    async fn find_link(&self, provider: &str, provider_user_id: &str) -> Result<Option<LinkedIdentity>, AuthError> {
        retry_transient("identity.find", || self.identities.find_link(provider, provider_user_id))
            .await
            .map_err(unavailable)
    }

    async fn provider_link(&self, user_id: &UserId) -> Result<Option<LinkedIdentity>, AuthError> {
        let links = self.linked_identities(user_id).await?;
        Ok(links.into_iter().find(|l| l.provider == self.provider.name()))
    }

    /// Provider accounts linked to a user.
    pub async fn linked_identities(&self, user_id: &UserId) -> Result<Vec<LinkedIdentity>, AuthError> {
        retry_transient("identity.list", || self.identities.links_for_user(user_id))
            .await
            .map_err(unavailable)
    }

    /// Drop timed-out pending states and stale access decisions.
    pub fn purge_expired_states(&self) -> usize {
        let now = self.clock.now();
        let purged = self.states.purge_expired(now);
        self.access_cache.purge_expired(now);
        if purged > 0 {
            tracing::debug!(purged, "Purged expired OAuth states");
        }
        purged
    }

    fn generate_nonce(&self) -> Result<String, AuthError> {
        let mut bytes = [0u8; STATE_NONCE_BYTES];
        self.rng
            .fill(&mut bytes)
            .map_err(|_| AuthError::Unavailable("system RNG failure".to_string()))?;
        Ok(Base64UrlUnpadded::encode_string(&bytes))
    }
}

/// Only same-origin absolute paths are honoured; anything else becomes `/`.
fn sanitize_redirect(target: Option<&str>) -> String {
    match target {
        Some(t) if t.starts_with('/') && !t.starts_with("//") && !t.contains('\\') => t.to_string(),
        _ => "/".to_string(),
    }
}

fn exchange_failed(e: ProviderError) -> AuthError {
    AuthError::ExchangeFailed(e.to_string())
}

fn unavailable(e: StoreError) -> AuthError {
    tracing::error!(error = %e, "Identity store unavailable");
    AuthError::Unavailable(e.to_string())
}
