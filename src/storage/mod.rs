//! Storage module for persisting crawl checkpoints
//!
//! This module handles all checkpoint persistence, including:
//! - SQLite database initialization and schema management
//! - Atomic upserts keyed by checkpoint id
//! - Lookup of the active checkpoint a job can resume
//! - Application-level expiry

mod memory;
mod schema;
mod sqlite;
mod traits;

pub use memory::MemoryCheckpointStore;
pub use schema::SCHEMA_VERSION;
pub use sqlite::SqliteCheckpointStore;
pub use traits::{CheckpointStore, StorageError, StorageResult};

use crate::CrawlError;

use std::path::Path;

/// Initializes or opens a checkpoint database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteCheckpointStore)` - Successfully initialized storage
/// * `Err(CrawlError)` - Failed to initialize storage
pub fn open_store(path: &Path) -> Result<SqliteCheckpointStore, CrawlError> {
    Ok(SqliteCheckpointStore::new(path)?)
}
