// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Request-level authentication.
//!
//! A session cookie takes precedence over a bearer token. The gate only
//! answers "who is calling"; handlers decide what the caller may do.

use std::fmt;
use std::sync::Arc;

use axum::http::{header::AUTHORIZATION, HeaderMap};
use axum_extra::extract::CookieJar;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use super::session::{SessionId, SessionManager};
use super::token::TokenService;
use super::AuthError;
use crate::audit::{AuditEvent, AuditEventType, AuditSink};
use crate::clock::Clock;
use crate::models::UserId;

/// Session cookie name.
pub const SESSION_COOKIE: &str = "session";

/// How the caller authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Session,
    Bearer,
}

/// Verified caller identity.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: UserId,
    pub method: AuthMethod,
    /// Present for session callers only.
    pub session_id: Option<SessionId>,
    /// `scope` claim of a bearer token.
    pub scope: Option<String>,
    /// When the presented credential stops being valid.
    pub expires_at: DateTime<Utc>,
}

/// Credentials found on a request.
pub enum Credentials {
    /// Raw cookie value, MAC not yet verified.
    SessionCookie(String),
    Bearer(String),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::SessionCookie(_) => f.write_str("SessionCookie(..)"),
            Credentials::Bearer(_) => f.write_str("Bearer(..)"),
        }
    }
}

impl Credentials {
    /// Extract credentials, cookie first.
    ///
    /// An `Authorization` header that is present but not a usable bearer
    /// token is a bad credential, not an absent one.
    pub fn from_headers(headers: &HeaderMap) -> Result<Option<Self>, AuthError> {
        let jar = CookieJar::from_headers(headers);
        if let Some(cookie) = jar.get(SESSION_COOKIE) {
            return Ok(Some(Credentials::SessionCookie(cookie.value().to_string())));
        }

        let Some(value) = headers.get(AUTHORIZATION) else {
            return Ok(None);
        };
        let value = value.to_str().map_err(|_| AuthError::MalformedCredential)?;
        let token = value
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::MalformedCredential)?;
        Ok(Some(Credentials::Bearer(token.to_string())))
    }
}

pub struct AccessGate {
    sessions: Arc<SessionManager>,
    tokens: Arc<TokenService>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
}

impl AccessGate {
    pub fn new(
        sessions: Arc<SessionManager>,
        tokens: Arc<TokenService>,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            sessions,
            tokens,
            clock,
            audit,
        }
    }

    /// Authenticate a request from its headers.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Caller, AuthError> {
        let result = match Credentials::from_headers(headers) {
            Ok(Some(credentials)) => self.resolve(credentials).await,
            Ok(None) => Err(AuthError::MissingCredentials),
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            self.report_failure(e);
        }
        result
    }

    async fn resolve(&self, credentials: Credentials) -> Result<Caller, AuthError> {
        match credentials {
            Credentials::SessionCookie(value) => {
                let session_id = self.sessions.parse_cookie(&value)?;
                let session = self.sessions.validate(&session_id).await?;
                Ok(Caller {
                    user_id: session.user_id,
                    method: AuthMethod::Session,
                    session_id: Some(session.session_id),
                    scope: None,
                    expires_at: session.expires_at,
                })
            }
            Credentials::Bearer(token) => {
                let claims = self.tokens.verify(&token)?;
                Ok(Caller {
                    user_id: claims.user_id(),
                    method: AuthMethod::Bearer,
                    session_id: None,
                    expires_at: Utc
                        .timestamp_opt(claims.exp, 0)
                        .single()
                        .unwrap_or_else(|| self.clock.now()),
                    scope: claims.scope,
                })
            }
        }
    }

    fn report_failure(&self, error: &AuthError) {
        match error {
            AuthError::MissingCredentials => {}
            e if e.is_credential_failure() => {
                tracing::warn!(error_code = e.error_code(), kind = ?e.kind(), "Authentication failed");
                self.audit.record(
                    AuditEvent::new(AuditEventType::AuthFailure, self.clock.now())
                        .with_details(serde_json::json!({ "kind": e.kind() }))
                        .failed(e.error_code()),
                );
            }
            e => {
                tracing::error!(error = %e, "Authentication unavailable");
            }
        }
    }
}
