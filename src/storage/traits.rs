//! Storage traits and error types
//!
//! This module defines the trait interface for checkpoint backends and
//! associated error types.

use crate::checkpoint::{CheckpointRecord, CheckpointStatus, JobType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt checkpoint row {id}: {message}")]
    Corrupt { id: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for checkpoint backend implementations
///
/// Every write is an atomic upsert of a whole record keyed by
/// `checkpoint_id`. Implementations must be safe to share between tasks.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    // ===== Records =====

    /// Inserts the record, or replaces the stored record with the same id
    async fn upsert(&self, record: &CheckpointRecord) -> StorageResult<()>;

    async fn get(&self, id: Uuid) -> StorageResult<Option<CheckpointRecord>>;

    /// Removes a record, returning whether it existed
    async fn delete(&self, id: Uuid) -> StorageResult<bool>;

    // ===== Queries =====

    /// Most recently updated record for a site and job type
    ///
    /// With `status` set only records in that status are considered.
    async fn find_latest(
        &self,
        site_domain: &str,
        job_type: JobType,
        status: Option<CheckpointStatus>,
    ) -> StorageResult<Option<CheckpointRecord>>;

    /// Deletes every record whose `expires_at` is at or before `now`
    ///
    /// # Returns
    ///
    /// The number of records removed
    async fn purge_expired(&self, now: DateTime<Utc>) -> StorageResult<usize>;
}
