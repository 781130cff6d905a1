//! Error types for the sync engine

use authz_relationships::AuthzError;
use std::time::Duration;
use thiserror::Error;

/// Failures of the distributed lock service. Contention is not an error:
/// it is reported as `Acquisition::AlreadyHeld`.
#[derive(Error, Debug)]
pub enum LockError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Lock call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Unknown role '{role}' for member {member_id}")]
    InvalidRole { member_id: String, role: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// A failed sync run, tagged with the phase that failed
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("failed to lock: {0}")]
    Lock(#[source] LockError),

    #[error("failed to check if should sync: {0}")]
    ShouldSync(#[source] SourceError),

    #[error("failed to delete {category} relationships: {source}")]
    Delete {
        category: &'static str,
        source: AuthzError,
    },

    #[error("failed to query {category}: {source}")]
    Enumerate {
        category: &'static str,
        source: SourceError,
    },

    #[error("failed to write {category} chunk {chunk}: {source}")]
    Write {
        category: &'static str,
        chunk: usize,
        source: AuthzError,
    },

    /// The lock entry expired or was taken over while the run held it
    #[error("lost the sync lock during the run")]
    LockLost,

    #[error("failed to mark sync completed: {0}")]
    MarkCompleted(#[source] SourceError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for SyncError {
    fn from(err: config::ConfigError) -> Self {
        SyncError::Config(err.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
