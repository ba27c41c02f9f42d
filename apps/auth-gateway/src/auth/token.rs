// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWT minting and verification.
//!
//! Tokens are ES256 only. Time checks run against the injected [`Clock`]
//! rather than the library's wall clock, so the signature is checked by
//! `jsonwebtoken` and the validity window is checked here.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{decode, decode_header, Validation};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::keys::{KeyStore, SIGNING_ALGORITHM};
use super::AuthError;
use crate::audit::{AuditEvent, AuditEventType, AuditSink};
use crate::clock::Clock;
use crate::models::UserId;

/// Clock skew tolerance for `iat`/`nbf` (60 seconds).
pub const CLOCK_SKEW_LEEWAY_SECS: i64 = 60;

/// Tokens longer than this are rejected before any parsing.
pub const MAX_TOKEN_BYTES: usize = 8 * 1024;

/// Claims carried by every issued token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Claims {
    /// Subject (local user ID)
    pub sub: String,
    /// Issuer
    pub iss: String,
    /// Issued at (unix seconds)
    pub iat: i64,
    /// Not before (unix seconds)
    pub nbf: i64,
    /// Expiration (unix seconds)
    pub exp: i64,
    /// Unique token ID
    pub jti: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl Claims {
    pub fn user_id(&self) -> UserId {
        UserId::new(self.sub.clone())
    }
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub key_id: String,
    pub expires_at: DateTime<Utc>,
    pub claims: Claims,
}

pub struct TokenService {
    keys: Arc<KeyStore>,
    issuer: String,
    max_ttl: Duration,
    validation: Validation,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
}

impl TokenService {
    pub fn new(
        keys: Arc<KeyStore>,
        issuer: impl Into<String>,
        max_ttl: Duration,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let mut validation = Validation::new(SIGNING_ALGORITHM);
        validation.required_spec_claims = HashSet::new();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.leeway = 0;

        Self {
            keys,
            issuer: issuer.into(),
            max_ttl,
            validation,
            clock,
            audit,
        }
    }

    pub fn max_ttl(&self) -> Duration {
        self.max_ttl
    }

    /// Mint a token for `user_id` signed by the active key.
    pub fn issue(
        &self,
        user_id: &UserId,
        scope: Option<&str>,
        ttl: Duration,
    ) -> Result<IssuedToken, AuthError> {
        if ttl <= Duration::zero() || ttl > self.max_ttl {
            return Err(AuthError::InvalidTtl {
                max_secs: self.max_ttl.num_seconds(),
            });
        }

        let signer = self.keys.active_key()?;
        let now = self.clock.now();
        let expires_at = now + ttl;
        let claims = Claims {
            sub: user_id.as_str().to_string(),
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
            scope: scope.map(str::to_string),
        };
        let token = signer.sign(&claims)?;

        tracing::info!(
            user_id = %user_id,
            jti = %claims.jti,
            key_id = %signer.key_id(),
            expires_at = %expires_at,
            "Token issued"
        );
        self.audit.record(
            AuditEvent::new(AuditEventType::TokenIssued, now)
                .with_user(user_id.as_str())
                .with_details(serde_json::json!({
                    "jti": claims.jti,
                    "key_id": signer.key_id(),
                    "scope": claims.scope,
                    "exp": claims.exp,
                })),
        );

        Ok(IssuedToken {
            token,
            key_id: signer.key_id().to_string(),
            expires_at: Utc
                .timestamp_opt(claims.exp, 0)
                .single()
                .unwrap_or(expires_at),
            claims,
        })
    }

    /// Verify a token's header, signature, issuer and validity window.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        if token.len() > MAX_TOKEN_BYTES {
            return Err(AuthError::MalformedToken);
        }

        let header = decode_header(token).map_err(|_| AuthError::MalformedToken)?;
        if header.alg != SIGNING_ALGORITHM {
            return Err(AuthError::MalformedToken);
        }
        let key_id = header.kid.ok_or(AuthError::MalformedToken)?;

        let verifier = self
            .keys
            .verifier_for(&key_id)
            .map_err(|_| AuthError::UnknownKey)?;

        let data = decode::<Claims>(token, verifier.decoding_key(), &self.validation).map_err(
            |e| match e.kind() {
                JwtErrorKind::InvalidSignature => AuthError::BadSignature,
                _ => AuthError::MalformedToken,
            },
        )?;
        let claims = data.claims;

        if claims.iss != self.issuer {
            return Err(AuthError::MalformedToken);
        }

        let now = self.clock.now().timestamp();
        if now >= claims.exp {
            return Err(AuthError::TokenExpired);
        }
        if claims.nbf > now + CLOCK_SKEW_LEEWAY_SECS || claims.iat > now + CLOCK_SKEW_LEEWAY_SECS {
            return Err(AuthError::TokenNotYetValid);
        }

        Ok(claims)
    }
}
