// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for authenticated callers.
//!
//! Handlers declare their gate through the extractor they take:
//!
//! ```rust,ignore
//! // authenticated-required
//! async fn me(Authenticated(caller): Authenticated) -> impl IntoResponse { .. }
//!
//! // session-only (cookie, never bearer)
//! async fn mint(SessionAuthenticated(caller): SessionAuthenticated) -> impl IntoResponse { .. }
//!
//! // anonymous-allowed
//! async fn start(MaybeAuthenticated(caller): MaybeAuthenticated) -> impl IntoResponse { .. }
//! ```

use std::convert::Infallible;

use axum::{extract::FromRequestParts, http::request::Parts};

use super::{AuthError, AuthMethod, Caller};
use crate::state::AppState;

/// Requires a valid session cookie or bearer token.
pub struct Authenticated(pub Caller);

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        // A previous extractor on this request may already have resolved it
        if let Some(caller) = parts.extensions.get::<Caller>().cloned() {
            return Ok(Authenticated(caller));
        }

        let caller = state.gate.authenticate(&parts.headers).await?;
        parts.extensions.insert(caller.clone());
        Ok(Authenticated(caller))
    }
}

/// Requires a session cookie; bearer tokens are refused.
///
/// Used where a token must not be able to mint or extend credentials.
pub struct SessionAuthenticated(pub Caller);

impl FromRequestParts<AppState> for SessionAuthenticated {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Authenticated(caller) = Authenticated::from_request_parts(parts, state).await?;
        if caller.method != AuthMethod::Session {
            tracing::warn!(user_id = %caller.user_id, "Bearer token used on session-only endpoint");
            return Err(AuthError::SessionRequired);
        }
        Ok(SessionAuthenticated(caller))
    }
}

/// Resolves the caller if credentials are present and valid, otherwise
/// `None`. Never rejects.
pub struct MaybeAuthenticated(pub Option<Caller>);

impl FromRequestParts<AppState> for MaybeAuthenticated {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(MaybeAuthenticated(
            Authenticated::from_request_parts(parts, state)
                .await
                .ok()
                .map(|Authenticated(caller)| caller),
        ))
    }
}
