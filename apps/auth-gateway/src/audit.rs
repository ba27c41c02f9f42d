// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit logging for security-sensitive operations.
//!
//! Session lifecycle, token issuance, key rotation, identity linking and
//! authentication failures are reported to an injected [`AuditSink`].
//! Events never carry raw credentials: sessions appear as fingerprints and
//! tokens by their `jti`.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Types of auditable events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Session events
    SessionCreated,
    SessionInvalidated,

    // Token and key events
    TokenIssued,
    KeyRotated,
    KeysPruned,

    // OAuth events
    OAuthStarted,
    IdentityLinked,
    UserProvisioned,

    // Auth events
    AuthFailure,
}

/// An audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditEvent {
    /// Unique event ID.
    pub event_id: String,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Type of event.
    pub event_type: AuditEventType,
    /// User the event concerns (if known).
    pub user_id: Option<String>,
    /// Additional details as JSON.
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Precise error code if the operation failed.
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp,
            event_type,
            user_id: None,
            details: None,
            success: true,
            error: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Mark as failed with an error code.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

/// Destination for audit events.
///
/// Recording is infallible from the caller's point of view; a sink that
/// cannot persist an event reports that through its own logging.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Forwards audit events to `tracing` under the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let details = event
            .details
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_default();
        if event.success {
            tracing::info!(
                target: "audit",
                event_id = %event.event_id,
                event_type = ?event.event_type,
                user_id = event.user_id.as_deref().unwrap_or("-"),
                details = %details,
                "audit event"
            );
        } else {
            tracing::warn!(
                target: "audit",
                event_id = %event.event_id,
                event_type = ?event.event_type,
                user_id = event.user_id.as_deref().unwrap_or("-"),
                error = event.error.as_deref().unwrap_or("-"),
                details = %details,
                "audit event"
            );
        }
    }
}

/// Keeps events in memory; used by tests and embedders that ship events
/// elsewhere in batches.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn of_type(&self, event_type: AuditEventType) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_audit_event() {
        let event = AuditEvent::new(AuditEventType::SessionCreated, Utc::now())
            .with_user("user_123")
            .with_details(serde_json::json!({ "session": "abc123" }));

        assert_eq!(event.event_type, AuditEventType::SessionCreated);
        assert_eq!(event.user_id, Some("user_123".to_string()));
        assert!(event.success);
    }

    #[test]
    fn failed_event() {
        let event = AuditEvent::new(AuditEventType::AuthFailure, Utc::now()).failed("bad_signature");

        assert!(!event.success);
        assert_eq!(event.error, Some("bad_signature".to_string()));
    }

    #[test]
    fn memory_sink_filters_by_type() {
        let sink = MemoryAuditSink::new();
        sink.record(AuditEvent::new(AuditEventType::TokenIssued, Utc::now()));
        sink.record(AuditEvent::new(AuditEventType::KeyRotated, Utc::now()));
        sink.record(AuditEvent::new(AuditEventType::TokenIssued, Utc::now()));

        assert_eq!(sink.events().len(), 3);
        assert_eq!(sink.of_type(AuditEventType::TokenIssued).len(), 2);
    }

    #[test]
    fn event_type_serializes_snake_case() {
        let json = serde_json::to_string(&AuditEventType::IdentityLinked).unwrap();
        assert_eq!(json, "\"identity_linked\"");
    }
}
