// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Credential and key lifecycle for the gateway.
//!
//! ## Auth Flow
//!
//! 1. User logs in (directly or through GitHub OAuth)
//! 2. [`SessionManager`] creates a session and the client receives a
//!    MAC-protected `session` cookie
//! 3. With the session, the client asks [`TokenService`] for an ES256 JWT
//!    signed by the active key in [`KeyStore`]
//! 4. Downstream services verify the JWT against `/jwt/publickey`
//! 5. Every protected request passes through [`AccessGate`] (cookie first,
//!    then `Authorization: Bearer`)
//!
//! ## Security
//!
//! - Session ids and cookie values never appear in logs (fingerprints only)
//! - Private keys never leave [`KeyStore`]
//! - Credential failures are indistinguishable on the wire
//! - Clock skew tolerance for `iat`/`nbf` is 60 seconds; `exp` is strict

pub mod error;
pub mod extractor;
pub mod gate;
pub mod jwks;
pub mod keys;
pub mod session;
pub mod token;

pub use error::{AuthError, ErrorKind};
pub use extractor::{Authenticated, MaybeAuthenticated, SessionAuthenticated};
pub use gate::{AccessGate, AuthMethod, Caller, Credentials, SESSION_COOKIE};
pub use jwks::{JwksDocument, PublicJwk};
pub use keys::{KeyBlobStore, KeyStore, KeyStoreError, MemoryKeyBlobStore};
pub use session::{Session, SessionId, SessionManager, SessionSettings, SessionStore, TouchOutcome};
pub use token::{Claims, IssuedToken, TokenService};
