// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Auth Gateway - Session, Signing Key and OAuth Credential Service
//!
//! Authenticates end users, issues MAC-protected session cookies, mints
//! ES256 JWTs that downstream services verify against a published JWKS, and
//! brokers GitHub OAuth logins.
//!
//! ## Modules
//!
//! - `auth` - KeyStore, SessionManager, TokenService and AccessGate
//! - `oauth` - OAuthBroker and the GitHub provider
//! - `api` - HTTP API handlers (Axum)
//! - `storage` - redb database and key ring file
//! - `maintenance` - key rotation and expiry sweeps

pub mod api;
pub mod audit;
pub mod auth;
pub mod clock;
pub mod config;
pub mod directory;
pub mod error;
pub mod maintenance;
pub mod models;
pub mod oauth;
pub mod state;
pub mod storage;
pub mod store;
pub mod telemetry;

#[cfg(test)]
mod testutil;
