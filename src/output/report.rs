//! Job report types
//!
//! A [`JobReport`] is derived entirely from a checkpoint record, so the same
//! report can be produced right after a job or later from the database.

use crate::catalog::ListingItem;
use crate::checkpoint::{CheckpointRecord, CheckpointStatus, ErrorDetails, JobType, PipelineStep};
use crate::crawler::CategoryResult;
use crate::output::stats::{dedup_products, DataQuality};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to write output: {0}")]
    Write(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// A category that ended in error
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryFailure {
    pub category_url: String,
    pub category_name: String,
    pub message: String,
    pub code: String,
}

/// Summary of one crawl job
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub checkpoint_id: Uuid,
    pub site_domain: String,
    pub job_type: JobType,
    pub status: CheckpointStatus,
    pub pipeline_step: PipelineStep,

    /// Nodes in the category tree
    pub categories_discovered: usize,

    /// Categories selected for extraction
    pub categories_targeted: usize,

    pub categories_succeeded: usize,
    pub categories_failed: usize,

    /// Listing pages loaded across all categories
    pub pages_visited: u64,

    /// Products, deduplicated by item key across categories
    pub products: Vec<ListingItem>,

    pub errors: Vec<CategoryFailure>,
    pub quality: DataQuality,
    pub elapsed: Duration,

    /// Why the job failed, if it did
    pub error_details: Option<ErrorDetails>,
}

impl JobReport {
    /// Builds a report from a checkpoint's recorded results
    ///
    /// Entries of `extraction_results` that do not parse as category results
    /// are skipped with a warning.
    pub fn from_record(record: &CheckpointRecord, elapsed: Duration) -> Self {
        let results: Vec<CategoryResult> = record
            .pipeline_data
            .extraction_results
            .iter()
            .filter_map(|value| match serde_json::from_value(value.clone()) {
                Ok(result) => Some(result),
                Err(e) => {
                    tracing::warn!("Skipping unreadable extraction result: {}", e);
                    None
                }
            })
            .collect();

        let errors: Vec<CategoryFailure> = results
            .iter()
            .filter(|r| !r.is_success())
            .map(|r| {
                let (message, code) = r
                    .error
                    .as_ref()
                    .map(|e| (e.message.clone(), e.code.clone()))
                    .unwrap_or_else(|| ("unknown error".to_string(), "unknown".to_string()));
                CategoryFailure {
                    category_url: r.category_url.clone(),
                    category_name: r.category_name.clone(),
                    message,
                    code,
                }
            })
            .collect();

        let total_records: usize = results.iter().map(|r| r.products.len()).sum();
        let products = dedup_products(&results);
        let quality = DataQuality::measure(total_records, &products);

        Self {
            checkpoint_id: record.checkpoint_id,
            site_domain: record.site_domain.clone(),
            job_type: record.job_type,
            status: record.status,
            pipeline_step: record.pipeline_step,
            categories_discovered: record.pipeline_data.categories.len(),
            categories_targeted: record.pipeline_data.targets().count(),
            categories_succeeded: results.len() - errors.len(),
            categories_failed: errors.len(),
            pages_visited: results.iter().map(|r| u64::from(r.pages_visited)).sum(),
            products,
            errors,
            quality,
            elapsed,
            error_details: record.error_details.clone(),
        }
    }

    /// Share of processed categories that succeeded, as a percentage
    pub fn success_rate(&self) -> f64 {
        let processed = self.categories_succeeded + self.categories_failed;
        if processed == 0 {
            0.0
        } else {
            self.categories_succeeded as f64 / processed as f64 * 100.0
        }
    }
}
