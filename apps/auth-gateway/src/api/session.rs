// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Direct login, current-session lookup and logout.

use axum::{extract::State, http::StatusCode, Json};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::audit::{AuditEvent, AuditEventType};
use crate::auth::{AuthError, AuthMethod, Authenticated, Session, SESSION_COOKIE};
use crate::error::ApiError;
use crate::models::UserId;
use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    #[schema(example = "alice")]
    pub username: String,
    pub password: String,
}

/// Identity of the current caller.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResponse {
    #[schema(value_type = String, example = "42")]
    pub user_id: UserId,
    pub auth_method: AuthMethod,
    /// When the presented credential stops being valid.
    pub expires_at: DateTime<Utc>,
}

/// Session cookie carrying the MAC-protected session id.
pub(crate) fn session_cookie(state: &AppState, session: &Session) -> Cookie<'static> {
    let max_age = time::Duration::seconds(state.sessions.ttl().num_seconds());
    let mut cookie = Cookie::build((SESSION_COOKIE, state.sessions.cookie_value(&session.session_id)))
        .http_only(true)
        .secure(state.cookies.secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(max_age)
        .build();
    if let Some(domain) = &state.cookies.domain {
        cookie.set_domain(domain.clone());
    }
    cookie
}

/// Expired cookie with the same scope as [`session_cookie`].
fn removal_cookie(state: &AppState) -> Cookie<'static> {
    let mut cookie = Cookie::build((SESSION_COOKIE, ""))
        .http_only(true)
        .secure(state.cookies.secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(time::Duration::ZERO)
        .build();
    if let Some(domain) = &state.cookies.domain {
        cookie.set_domain(domain.clone());
    }
    cookie
}

/// Log in with username and password; sets the session cookie.
#[utoipa::path(
    post,
    path = "/session",
    tag = "Session",
    request_body = LoginRequest,
    responses(
        (status = 201, description = "Session created", body = SessionResponse),
        (status = 400, description = "Missing username or password"),
        (status = 401, description = "Authentication failed"),
        (status = 503, description = "User directory unavailable")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(request): Json<LoginRequest>,
) -> Result<(StatusCode, CookieJar, Json<SessionResponse>), ApiError> {
    if request.username.trim().is_empty() || request.password.is_empty() {
        return Err(ApiError::bad_request("username and password are required"));
    }

    let user_id = match state
        .directory
        .authenticate(&request.username, &request.password)
        .await
    {
        Ok(Some(user_id)) => user_id,
        Ok(None) => {
            let err = AuthError::InvalidCredentials;
            tracing::warn!(error_code = err.error_code(), "Direct login failed");
            state.audit.record(
                AuditEvent::new(AuditEventType::AuthFailure, state.clock.now())
                    .with_details(serde_json::json!({ "kind": err.kind() }))
                    .failed(err.error_code()),
            );
            return Err(err.into());
        }
        Err(e) => {
            tracing::error!(error = %e, "User directory unavailable");
            return Err(AuthError::Unavailable(e.to_string()).into());
        }
    };

    let session = state.sessions.create_session(&user_id).await?;
    let jar = jar.add(session_cookie(&state, &session));

    Ok((
        StatusCode::CREATED,
        jar,
        Json(SessionResponse {
            user_id,
            auth_method: AuthMethod::Session,
            expires_at: session.expires_at,
        }),
    ))
}

/// Identity of the authenticated caller.
#[utoipa::path(
    get,
    path = "/session",
    tag = "Session",
    responses(
        (status = 200, description = "Current caller", body = SessionResponse),
        (status = 401, description = "Authentication failed")
    ),
    security(("session_cookie" = []), ("bearer_auth" = []))
)]
pub async fn current_session(Authenticated(caller): Authenticated) -> Json<SessionResponse> {
    Json(SessionResponse {
        user_id: caller.user_id,
        auth_method: caller.method,
        expires_at: caller.expires_at,
    })
}

/// Invalidate the session named by the cookie (if any) and clear the cookie.
///
/// Always succeeds; an expired, unknown or absent session is not an error.
#[utoipa::path(
    post,
    path = "/logout",
    tag = "Session",
    responses(
        (status = 204, description = "Logged out"),
        (status = 503, description = "Session store unavailable")
    )
)]
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(StatusCode, CookieJar), ApiError> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        match state.sessions.parse_cookie(cookie.value()) {
            Ok(session_id) => state.sessions.invalidate(&session_id).await?,
            Err(e) => tracing::debug!(error_code = e.error_code(), "Ignoring unusable session cookie on logout"),
        }
    }
    Ok((StatusCode::NO_CONTENT, jar.add(removal_cookie(&state))))
}
