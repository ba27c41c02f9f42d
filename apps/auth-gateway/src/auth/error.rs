// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.
//!
//! Every variant is precise so logs and audit events can say exactly which
//! check failed. On the wire, credential failures collapse into one generic
//! `401` body so callers cannot tell "session not found" apart from
//! "session expired" or "signature invalid".

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Coarse error taxonomy shared by every component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No credential, or a credential that does not resolve to a caller.
    Unauthenticated,
    /// Authenticated but not allowed. Raised by resource handlers, never here.
    Forbidden,
    /// Session or token outside its validity window.
    Expired,
    /// Structurally invalid credential or input.
    Malformed,
    /// Key store, persistence or identity provider could not be reached.
    Unavailable,
    /// OAuth state mismatch or reuse.
    CsrfReplay,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Direct login with an unknown username or wrong password
    #[error("Invalid username or password")]
    InvalidCredentials,
    /// No request credentials were presented
    #[error("No session cookie or bearer token presented")]
    MissingCredentials,
    /// Cookie or authorization header failed structural or MAC checks
    #[error("Credential is malformed or has been tampered with")]
    MalformedCredential,
    /// Endpoint requires a session, caller used a bearer token
    #[error("A session is required for this operation")]
    SessionRequired,
    /// No signing key has been initialized
    #[error("No active signing key")]
    KeyUnavailable,
    /// Key id is neither active nor inside the grace window
    #[error("Signing key {0} not found")]
    KeyNotFound(String),
    #[error("Session not found")]
    SessionNotFound,
    #[error("Session has expired")]
    SessionExpired,
    #[error("Token is malformed")]
    MalformedToken,
    #[error("Token signing key is unknown")]
    UnknownKey,
    #[error("Token signature is invalid")]
    BadSignature,
    #[error("Token has expired")]
    TokenExpired,
    #[error("Token is not yet valid")]
    TokenNotYetValid,
    /// Requested token lifetime is out of range
    #[error("Token lifetime must be between 1 and {max_secs} seconds")]
    InvalidTtl { max_secs: i64 },
    /// Repository reference is not `owner/name`
    #[error("Repository must be given as owner/name")]
    InvalidRepository,
    #[error("OAuth state does not match a pending authorization")]
    StateMismatch,
    #[error("OAuth state has expired or was already used")]
    StateExpired,
    #[error("OAuth exchange failed: {0}")]
    ExchangeFailed(String),
    #[error("Provider identity could not be mapped to a local user")]
    IdentityResolutionFailed,
    #[error("Dependency unavailable: {0}")]
    Unavailable(String),
}

#[derive(Serialize)]
struct AuthErrorBody {
    error: String,
    error_code: String,
}

impl AuthError {
    /// Get the precise error code for this error (logs and audit only).
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::MissingCredentials => "missing_credentials",
            AuthError::MalformedCredential => "malformed_credential",
            AuthError::SessionRequired => "session_required",
            AuthError::KeyUnavailable => "key_unavailable",
            AuthError::KeyNotFound(_) => "key_not_found",
            AuthError::SessionNotFound => "session_not_found",
            AuthError::SessionExpired => "session_expired",
            AuthError::MalformedToken => "malformed_token",
            AuthError::UnknownKey => "unknown_key",
            AuthError::BadSignature => "bad_signature",
            AuthError::TokenExpired => "token_expired",
            AuthError::TokenNotYetValid => "token_not_yet_valid",
            AuthError::InvalidTtl { .. } => "invalid_ttl",
            AuthError::InvalidRepository => "invalid_repository",
            AuthError::StateMismatch => "state_mismatch",
            AuthError::StateExpired => "state_expired",
            AuthError::ExchangeFailed(_) => "exchange_failed",
            AuthError::IdentityResolutionFailed => "identity_resolution_failed",
            AuthError::Unavailable(_) => "unavailable",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::InvalidCredentials
            | AuthError::MissingCredentials
            | AuthError::SessionRequired
            | AuthError::KeyNotFound(_)
            | AuthError::SessionNotFound
            | AuthError::UnknownKey
            | AuthError::BadSignature
            | AuthError::IdentityResolutionFailed => ErrorKind::Unauthenticated,
            AuthError::SessionExpired | AuthError::TokenExpired | AuthError::TokenNotYetValid => {
                ErrorKind::Expired
            }
            AuthError::MalformedCredential
            | AuthError::MalformedToken
            | AuthError::InvalidTtl { .. }
            | AuthError::InvalidRepository => ErrorKind::Malformed,
            AuthError::KeyUnavailable
            | AuthError::ExchangeFailed(_)
            | AuthError::Unavailable(_) => ErrorKind::Unavailable,
            AuthError::StateMismatch | AuthError::StateExpired => ErrorKind::CsrfReplay,
        }
    }

    /// Whether this error is a rejected credential rather than a dependency
    /// or request-shape problem.
    pub fn is_credential_failure(&self) -> bool {
        !matches!(
            self,
            AuthError::InvalidTtl { .. }
                | AuthError::InvalidRepository
                | AuthError::KeyUnavailable
                | AuthError::ExchangeFailed(_)
                | AuthError::Unavailable(_)
        )
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidTtl { .. } | AuthError::InvalidRepository => {
                StatusCode::BAD_REQUEST
            }
            AuthError::ExchangeFailed(_) => StatusCode::BAD_GATEWAY,
            AuthError::KeyUnavailable | AuthError::Unavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let (error, error_code) = self.wire_message();
        let body = AuthErrorBody {
            error,
            error_code: error_code.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl AuthError {
    /// Message and code as rendered to clients. Credential failures all
    /// collapse to one body; dependency failures carry no detail.
    pub fn wire_message(&self) -> (String, &'static str) {
        if self.is_credential_failure() {
            ("authentication failed".to_string(), "unauthenticated")
        } else if self.status_code() == StatusCode::BAD_REQUEST {
            (self.to_string(), self.error_code())
        } else {
            ("service temporarily unavailable".to_string(), "unavailable")
        }
    }
}
