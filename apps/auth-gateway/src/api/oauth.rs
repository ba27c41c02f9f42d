// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! GitHub login and provider-backed checks.

use axum::{
    extract::{Query, State},
    response::Redirect,
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::session::session_cookie;
use crate::auth::{AuthError, Authenticated};
use crate::error::ApiError;
use crate::oauth::state::STATE_TIMEOUT_SECS;
use crate::oauth::LinkedIdentityView;
use crate::state::AppState;

/// Cookie binding a pending login to the browser that started it.
pub const OAUTH_STATE_COOKIE: &str = "oauth_state";

/// MAC purpose label for [`OAUTH_STATE_COOKIE`].
const OAUTH_STATE_PURPOSE: &str = "oauth_state";

/// Scoped to the callback path and living only as long as the nonce.
fn state_cookie(state: &AppState, value: String, max_age: time::Duration) -> Cookie<'static> {
    let mut cookie = Cookie::build((OAUTH_STATE_COOKIE, value))
        .http_only(true)
        .secure(state.cookies.secure)
        .same_site(SameSite::Lax)
        .path("/oauth/github")
        .max_age(max_age)
        .build();
    if let Some(domain) = &state.cookies.domain {
        cookie.set_domain(domain.clone());
    }
    cookie
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct BeginQuery {
    /// Local path to return to after login; anything else falls back to `/`.
    pub redirect: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CallbackQuery {
    pub state: Option<String>,
    pub code: Option<String>,
    /// Set by the provider when the user declined.
    pub error: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RepoAccessQuery {
    /// Repository as `owner/name`.
    pub repo: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RepoAccessResponse {
    #[schema(example = "octocat/hello-world")]
    pub repo: String,
    /// Whether the linked GitHub account can push to the repository.
    pub allowed: bool,
}

/// Start the GitHub authorization-code flow.
#[utoipa::path(
    get,
    path = "/oauth/github",
    tag = "OAuth",
    params(BeginQuery),
    responses(
        (status = 303, description = "Redirect to GitHub")
    )
)]
pub async fn begin(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<BeginQuery>,
) -> Result<(CookieJar, Redirect), AuthError> {
    let request = state.oauth.begin_authorization(query.redirect.as_deref())?;
    let sealed = state.sessions.seal(OAUTH_STATE_PURPOSE, &request.state);
    let cookie = state_cookie(&state, sealed, time::Duration::seconds(STATE_TIMEOUT_SECS));
    Ok((jar.add(cookie), Redirect::to(request.url.as_str())))
}

/// GitHub redirects here with `state` and `code`.
///
/// The `state` must match the sealed state cookie set by [`begin`] in the
/// same browser. On success a session is created, the cookie set and the
/// browser sent to the target recorded when the flow began.
#[utoipa::path(
    get,
    path = "/oauth/github/callback",
    tag = "OAuth",
    params(CallbackQuery),
    responses(
        (status = 303, description = "Logged in, redirect to the original target"),
        (status = 400, description = "Missing state or authorization declined"),
        (status = 401, description = "Unknown, expired, replayed or unbound state"),
        (status = 502, description = "Code exchange with GitHub failed")
    )
)]
pub async fn callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<CallbackQuery>,
) -> Result<(CookieJar, Redirect), ApiError> {
    if let Some(error) = &query.error {
        tracing::warn!(provider_error = %error, "Provider declined authorization");
        return Err(ApiError::bad_request("authorization was declined"));
    }
    let Some(nonce) = query.state.as_deref() else {
        return Err(ApiError::bad_request("missing state parameter"));
    };

    let bound = jar
        .get(OAUTH_STATE_COOKIE)
        .and_then(|cookie| state.sessions.open_sealed(OAUTH_STATE_PURPOSE, cookie.value()).ok());

    let outcome = state
        .oauth
        .handle_callback(nonce, bound, query.code.as_deref().unwrap_or_default())
        .await?;
    let session = state.sessions.create_session(&outcome.user_id).await?;

    let jar = jar
        .add(state_cookie(&state, String::new(), time::Duration::ZERO))
        .add(session_cookie(&state, &session));
    Ok((jar, Redirect::to(&outcome.redirect_target)))
}

/// Provider identities linked to the caller.
#[utoipa::path(
    get,
    path = "/session/oauth",
    tag = "OAuth",
    responses(
        (status = 200, description = "Linked identities", body = Vec<LinkedIdentityView>),
        (status = 401, description = "Authentication failed")
    ),
    security(("session_cookie" = []), ("bearer_auth" = []))
)]
pub async fn linked_identities(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
) -> Result<Json<Vec<LinkedIdentityView>>, AuthError> {
    let links = state.oauth.linked_identities(&caller.user_id).await?;
    Ok(Json(links.iter().map(LinkedIdentityView::from).collect()))
}

/// Whether the caller's linked GitHub account can push to a repository.
#[utoipa::path(
    get,
    path = "/session/oauth/github/repoaccess",
    tag = "OAuth",
    params(RepoAccessQuery),
    responses(
        (status = 200, description = "Access decision", body = RepoAccessResponse),
        (status = 400, description = "Repository is not owner/name"),
        (status = 401, description = "Authentication failed"),
        (status = 502, description = "No usable GitHub grant for the caller")
    ),
    security(("session_cookie" = []), ("bearer_auth" = []))
)]
pub async fn repo_access(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Query(query): Query<RepoAccessQuery>,
) -> Result<Json<RepoAccessResponse>, AuthError> {
    let allowed = state.oauth.repo_access(&caller.user_id, &query.repo).await?;
    Ok(Json(RepoAccessResponse {
        repo: query.repo,
        allowed,
    }))
}
