// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWKS (JSON Web Key Set) document served at `/jwt/publickey`.
//!
//! Third-party verifiers fetch this document and select a key by the
//! token's `kid`. It lists the active key and every retiring key still
//! inside its grace window, most recently active first.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::keys::PublicKeyInfo;

/// A single EC public key in JWK form (RFC 7517 / RFC 7518 §6.2).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct PublicJwk {
    /// Key type, always `EC`
    #[schema(example = "EC")]
    pub kty: String,
    /// Curve, always `P-256`
    #[schema(example = "P-256")]
    pub crv: String,
    /// Signature algorithm, always `ES256`
    #[schema(example = "ES256")]
    pub alg: String,
    /// Intended use, always `sig`
    #[serde(rename = "use")]
    #[schema(example = "sig")]
    pub key_use: String,
    /// Key identifier, matches the `kid` header of issued tokens
    pub kid: String,
    /// base64url x coordinate
    pub x: String,
    /// base64url y coordinate
    pub y: String,
}

impl From<PublicKeyInfo> for PublicJwk {
    fn from(info: PublicKeyInfo) -> Self {
        Self {
            kty: "EC".to_string(),
            crv: "P-256".to_string(),
            alg: format!("{:?}", info.algorithm),
            key_use: "sig".to_string(),
            kid: info.key_id,
            x: info.x,
            y: info.y,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct JwksDocument {
    pub keys: Vec<PublicJwk>,
}

impl JwksDocument {
    pub fn from_keys(keys: Vec<PublicKeyInfo>) -> Self {
        Self {
            keys: keys.into_iter().map(PublicJwk::from).collect(),
        }
    }
}
