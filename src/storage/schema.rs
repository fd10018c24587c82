//! Database schema definitions
//!
//! This module contains the SQL schema for the checkpoint database.

/// Current schema version, stored in `PRAGMA user_version`
pub const SCHEMA_VERSION: u32 = 1;

/// SQL schema for the checkpoint database
///
/// Step and page counters are INTEGER columns. Timestamps are fixed-width
/// RFC 3339 UTC strings, so they order correctly as text.
pub const SCHEMA_SQL: &str = r#"
-- One row per crawl job
CREATE TABLE IF NOT EXISTS checkpoints (
    checkpoint_id TEXT PRIMARY KEY,
    site_domain TEXT NOT NULL,
    job_type TEXT NOT NULL CHECK (job_type IN ('product_catalog', 'product_detail', 'category_discovery')),
    pipeline_step INTEGER NOT NULL CHECK (pipeline_step BETWEEN 1 AND 4),
    current_page INTEGER NOT NULL DEFAULT 0,
    pipeline_data TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('active', 'completed', 'failed', 'expired')),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    error_details TEXT
);

CREATE INDEX IF NOT EXISTS idx_checkpoints_resume ON checkpoints(site_domain, job_type, status);
CREATE INDEX IF NOT EXISTS idx_checkpoints_expires ON checkpoints(expires_at);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

/// Reads the schema version recorded in the database
pub fn get_schema_version(conn: &rusqlite::Connection) -> Result<u32, rusqlite::Error> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
}
