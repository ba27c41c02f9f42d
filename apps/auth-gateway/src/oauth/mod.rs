// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # OAuth Login Broker
//!
//! Authorization-code login against an external identity provider (GitHub)
//! and the mapping from provider accounts to local users.
//!
//! ## Flow
//!
//! ```text
//! begin_authorization ─▶ AuthorizationRequested
//!   provider redirect ─▶ CallbackReceived
//!     handle_callback ─▶ Completed | Failed
//! ```
//!
//! The state nonce is also handed to the starting browser (in a sealed
//! cookie) and must come back from that browser on the callback. A pending
//! state is consumed exactly once. The provider grant obtained
//! during the callback is stored with the [`LinkedIdentity`] so later
//! repository access checks can act on the user's behalf.

pub mod broker;
pub mod cache;
pub mod github;
pub mod provider;
pub mod state;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::UserId;
use crate::storage::StoreResult;

pub use broker::{AuthorizationRequest, CallbackOutcome, OAuthBroker};
pub use cache::RepoAccessCache;
pub use github::{GitHubProvider, GitHubSettings};
pub use provider::{IdentityProvider, ProviderError, ProviderProfile, RepoRef, TokenGrant};
pub use state::{FlowPhase, PendingState, PendingStates};

/// Provider grant kept alongside a linked identity.
///
/// Never returned by the API.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Vec<String>,
}

impl StoredGrant {
    pub fn from_grant(grant: TokenGrant, now: DateTime<Utc>) -> Self {
        Self {
            expires_at: grant.expires_in.map(|ttl| now + ttl),
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            scopes: grant.scopes,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

impl fmt::Debug for StoredGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredGrant")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// A provider account linked to a local user.
///
/// `(provider, provider_user_id)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedIdentity {
    pub provider: String,
    pub provider_user_id: String,
    pub local_user_id: UserId,
    pub login: String,
    pub linked_at: DateTime<Utc>,
    pub grant: StoredGrant,
}

/// Public view of a [`LinkedIdentity`], without the grant.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LinkedIdentityView {
    /// Provider name, e.g. `github`
    #[schema(example = "github")]
    pub provider: String,
    pub provider_user_id: String,
    pub login: String,
    pub linked_at: DateTime<Utc>,
}

impl From<&LinkedIdentity> for LinkedIdentityView {
    fn from(identity: &LinkedIdentity) -> Self {
        Self {
            provider: identity.provider.clone(),
            provider_user_id: identity.provider_user_id.clone(),
            login: identity.login.clone(),
            linked_at: identity.linked_at,
        }
    }
}

/// Persistence for linked identities.
pub trait IdentityStore: Send + Sync {
    fn find_link(&self, provider: &str, provider_user_id: &str) -> StoreResult<Option<LinkedIdentity>>;

    /// Insert or replace the link keyed by `(provider, provider_user_id)`.
    fn upsert_link(&self, identity: &LinkedIdentity) -> StoreResult<()>;

    /// Atomic find-or-insert. If the provider account is already linked the
    /// existing owner and `linked_at` are kept and only login and grant are
    /// refreshed. Returns the link as stored.
    fn claim_link(&self, identity: &LinkedIdentity) -> StoreResult<LinkedIdentity>;

    fn links_for_user(&self, user_id: &UserId) -> StoreResult<Vec<LinkedIdentity>>;
}
