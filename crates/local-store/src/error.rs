use thiserror::Error;

use crate::Revision;

/// Errors that can occur when interacting with the local store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The record was written by someone else since it was read.
    #[error(
        "Revision conflict for {namespace}/{key}: expected revision {expected}, found {actual}"
    )]
    RevisionConflict {
        namespace: String,
        key: String,
        expected: Revision,
        actual: Revision,
    },

    /// The store cannot be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Builds a `RevisionConflict` and counts it under `backend`.
    pub(crate) fn conflict(
        backend: &'static str,
        namespace: &str,
        key: &str,
        expected: Revision,
        actual: Revision,
    ) -> Self {
        metrics::counter!("local_store_conflicts_total", "backend" => backend).increment(1);
        tracing::debug!(backend, namespace, key, %expected, %actual, "revision conflict");
        StoreError::RevisionConflict {
            namespace: namespace.to_string(),
            key: key.to_string(),
            expected,
            actual,
        }
    }
}

/// Result type for local store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
