// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Shared Data Models
//!
//! Identity types that flow between the session, token and OAuth layers.
//! The user directory that owns user records is an external collaborator;
//! the gateway only needs a stable identifier for each user.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Stable local user identifier.
///
/// Used as the session owner and as the `sub` claim of issued JWTs.
///
/// # Example
///
/// ```rust,ignore
/// let user = UserId::from("42");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        UserId(value)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        UserId(value.to_string())
    }
}
