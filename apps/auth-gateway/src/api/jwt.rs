// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::{Query, State},
    http::header::CACHE_CONTROL,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::auth::{AuthError, JwksDocument, SessionAuthenticated};
use crate::state::AppState;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TokenQuery {
    /// Opaque scope string copied into the `scope` claim.
    pub scope: Option<String>,
    /// Token lifetime in seconds; defaults to the configured maximum.
    pub ttl_secs: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TokenResponse {
    /// Compact ES256 JWT.
    pub token: String,
    pub expires_at: DateTime<Utc>,
    /// `kid` of the signing key.
    pub key_id: String,
}

/// Public verification keys (JWKS).
///
/// A rotated key signs immediately, so relying parties must revalidate
/// rather than serve a cached set.
#[utoipa::path(
    get,
    path = "/jwt/publickey",
    tag = "JWT",
    responses(
        (status = 200, description = "Active key followed by keys still in their grace window", body = JwksDocument)
    )
)]
pub async fn public_keys(State(state): State<AppState>) -> impl IntoResponse {
    let document = JwksDocument::from_keys(state.keys.public_key_set());
    ([(CACHE_CONTROL, "no-cache")], Json(document))
}

/// Mint a JWT for the session owner.
///
/// Bearer tokens are refused here so a token cannot be used to mint another.
#[utoipa::path(
    post,
    path = "/jwt/session",
    tag = "JWT",
    params(TokenQuery),
    responses(
        (status = 200, description = "Token issued", body = TokenResponse),
        (status = 400, description = "Lifetime out of range"),
        (status = 401, description = "No valid session"),
        (status = 503, description = "No signing key available")
    ),
    security(("session_cookie" = []))
)]
pub async fn issue_token(
    State(state): State<AppState>,
    SessionAuthenticated(caller): SessionAuthenticated,
    Query(query): Query<TokenQuery>,
) -> Result<impl IntoResponse, AuthError> {
    let max_ttl = state.tokens.max_ttl();
    let ttl = match query.ttl_secs {
        Some(secs) => Duration::try_seconds(secs).ok_or(AuthError::InvalidTtl {
            max_secs: max_ttl.num_seconds(),
        })?,
        None => max_ttl,
    };
    let issued = state
        .tokens
        .issue(&caller.user_id, query.scope.as_deref(), ttl)?;

    Ok((
        [(CACHE_CONTROL, "no-store")],
        Json(TokenResponse {
            token: issued.token,
            expires_at: issued.expires_at,
            key_id: issued.key_id,
        }),
    ))
}
