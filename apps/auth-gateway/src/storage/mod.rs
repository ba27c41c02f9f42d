// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Persistent Storage
//!
//! ## Storage Layout
//!
//! ```text
//! {DATA_DIR}/
//!   auth.redb                 # sessions, linked identities, user index
//!   keys/signing-keys.json    # signing key ring (owner-only permissions)
//! ```
//!
//! Sessions and linked identities live in an embedded redb database. The
//! signing key ring is a single JSON blob written atomically through
//! [`FileKeyBlobStore`]; the key store never sees the path.

pub mod database;
pub mod keyfile;

pub use database::AuthDatabase;
pub use keyfile::FileKeyBlobStore;

/// Errors raised by the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("blocking store task failed: {0}")]
    Blocking(String),
}

impl StoreError {
    /// Whether retrying the same operation could plausibly succeed.
    ///
    /// Corrupt rows, schema mismatches and serialization failures are
    /// permanent; I/O and transaction contention are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Io(_)
                | StoreError::RedbStorage(_)
                | StoreError::RedbTransaction(_)
                | StoreError::RedbCommit(_)
                | StoreError::Poisoned
        )
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Run a synchronous store call on the blocking pool.
pub async fn blocking<T, F>(f: F) -> StoreResult<T>
where
    F: FnOnce() -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Blocking(e.to_string()))?
}

/// Pause before the single retry of a transient store failure.
pub const RETRY_BACKOFF: std::time::Duration = std::time::Duration::from_millis(50);

/// Run a store operation, retrying once after [`RETRY_BACKOFF`] if the first
/// attempt failed transiently.
pub async fn retry_transient<T, F>(operation: &'static str, f: F) -> StoreResult<T>
where
    F: Fn() -> StoreResult<T>,
{
    match f() {
        Err(e) if e.is_transient() => {
            tracing::warn!(operation, error = %e, "Transient store failure, retrying once");
            tokio::time::sleep(RETRY_BACKOFF).await;
            f()
        }
        result => result,
    }
}

/// [`retry_transient`] with each attempt run through [`blocking`], for
/// calls that commit a write transaction.
pub async fn retry_blocking<T, F>(operation: &'static str, f: F) -> StoreResult<T>
where
    F: Fn() -> StoreResult<T> + Clone + Send + 'static,
    T: Send + 'static,
{
    match blocking(f.clone()).await {
        Err(e) if e.is_transient() => {
            tracing::warn!(operation, error = %e, "Transient store failure, retrying once");
            tokio::time::sleep(RETRY_BACKOFF).await;
            blocking(f).await
        }
        result => result,
    }
}
