//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the
//! [`CheckpointStore`] trait.

use crate::checkpoint::{
    parse_step, CheckpointRecord, CheckpointStatus, ErrorDetails, JobType, PipelineData,
};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{CheckpointStore, StorageError, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

const SELECT_COLUMNS: &str = "checkpoint_id, site_domain, job_type, pipeline_step, current_page,
    pipeline_data, status, created_at, updated_at, expires_at, error_details";

/// SQLite checkpoint backend
pub struct SqliteCheckpointStore {
    conn: Mutex<Connection>,
}

impl SqliteCheckpointStore {
    /// Creates a new SqliteCheckpointStore instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file; missing parent
    ///   directories are created
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteCheckpointStore)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database (for tests and dry runs)
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fixed-width RFC 3339, so text order matches time order
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// A checkpoint row as stored, before conversion
struct RawCheckpoint {
    checkpoint_id: String,
    site_domain: String,
    job_type: String,
    pipeline_step: f64,
    current_page: f64,
    pipeline_data: String,
    status: String,
    created_at: String,
    updated_at: String,
    expires_at: String,
    error_details: Option<String>,
}

impl RawCheckpoint {
    /// Reads numeric columns as REAL so rows written with fractional values
    /// still load
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            checkpoint_id: row.get(0)?,
            site_domain: row.get(1)?,
            job_type: row.get(2)?,
            pipeline_step: row.get(3)?,
            current_page: row.get(4)?,
            pipeline_data: row.get(5)?,
            status: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
            expires_at: row.get(9)?,
            error_details: row.get(10)?,
        })
    }

    fn into_record(self) -> StorageResult<CheckpointRecord> {
        let id = self.checkpoint_id.clone();
        let corrupt = |message: String| StorageError::Corrupt {
            id: id.clone(),
            message,
        };
        let timestamp = |value: &str| {
            DateTime::parse_from_rfc3339(value)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|e| corrupt(format!("bad timestamp '{}': {}", value, e)))
        };

        let checkpoint_id = Uuid::parse_str(&self.checkpoint_id)
            .map_err(|e| corrupt(format!("bad id: {}", e)))?;
        let job_type = JobType::from_db_string(&self.job_type)
            .ok_or_else(|| corrupt(format!("unknown job type '{}'", self.job_type)))?;
        let status = CheckpointStatus::from_db_string(&self.status)
            .ok_or_else(|| corrupt(format!("unknown status '{}'", self.status)))?;
        let pipeline_step = parse_step(self.pipeline_step).map_err(corrupt)?;

        let mut pipeline_data: PipelineData = serde_json::from_str(&self.pipeline_data)?;
        pipeline_data.current_page = self.current_page.max(0.0).trunc() as u32;

        let error_details: Option<ErrorDetails> = self
            .error_details
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(CheckpointRecord {
            checkpoint_id,
            site_domain: self.site_domain,
            job_type,
            pipeline_step,
            pipeline_data,
            status,
            created_at: timestamp(&self.created_at)?,
            updated_at: timestamp(&self.updated_at)?,
            expires_at: timestamp(&self.expires_at)?,
            error_details,
        })
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    // ===== Records =====

    async fn upsert(&self, record: &CheckpointRecord) -> StorageResult<()> {
        let pipeline_data = serde_json::to_string(&record.pipeline_data)?;
        let error_details = record
            .error_details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.conn().execute(
            "INSERT INTO checkpoints (checkpoint_id, site_domain, job_type, pipeline_step,
                current_page, pipeline_data, status, created_at, updated_at, expires_at,
                error_details)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(checkpoint_id) DO UPDATE SET
                site_domain = excluded.site_domain,
                job_type = excluded.job_type,
                pipeline_step = excluded.pipeline_step,
                current_page = excluded.current_page,
                pipeline_data = excluded.pipeline_data,
                status = excluded.status,
                updated_at = excluded.updated_at,
                expires_at = excluded.expires_at,
                error_details = excluded.error_details",
            params![
                record.checkpoint_id.to_string(),
                record.site_domain,
                record.job_type.to_db_string(),
                i64::from(record.pipeline_step.get()),
                i64::from(record.pipeline_data.current_page),
                pipeline_data,
                record.status.to_db_string(),
                format_timestamp(&record.created_at),
                format_timestamp(&record.updated_at),
                format_timestamp(&record.expires_at),
                error_details,
            ],
        )?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StorageResult<Option<CheckpointRecord>> {
        let raw = self
            .conn()
            .query_row(
                &format!("SELECT {} FROM checkpoints WHERE checkpoint_id = ?1", SELECT_COLUMNS),
                params![id.to_string()],
                RawCheckpoint::from_row,
            )
            .optional()?;

        raw.map(RawCheckpoint::into_record).transpose()
    }

    async fn delete(&self, id: Uuid) -> StorageResult<bool> {
        let removed = self.conn().execute(
            "DELETE FROM checkpoints WHERE checkpoint_id = ?1",
            params![id.to_string()],
        )?;
        Ok(removed > 0)
    }

    // ===== Queries =====

    async fn find_latest(
        &self,
        site_domain: &str,
        job_type: JobType,
        status: Option<CheckpointStatus>,
    ) -> StorageResult<Option<CheckpointRecord>> {
        let raw = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {} FROM checkpoints
                     WHERE site_domain = ?1 AND job_type = ?2
                       AND (?3 IS NULL OR status = ?3)
                     ORDER BY updated_at DESC LIMIT 1",
                    SELECT_COLUMNS
                ),
                params![
                    site_domain,
                    job_type.to_db_string(),
                    status.map(|s| s.to_db_string())
                ],
                RawCheckpoint::from_row,
            )
            .optional()?;

        raw.map(RawCheckpoint::into_record).transpose()
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StorageResult<usize> {
        let removed = self.conn().execute(
            "DELETE FROM checkpoints WHERE expires_at <= ?1",
            params![format_timestamp(&now)],
        )?;
        Ok(removed)
    }
}
