//! Crawl job orchestration
//!
//! This module contains the pipeline that turns a storefront root URL into
//! product records:
//! - Navigation discovery of top-level categories
//! - Bounded breadth-first category expansion
//! - Paginated listing extraction, a batch of categories at a time
//! - Finalization into a [`JobReport`](crate::output::JobReport)
//!
//! Every stage boundary and every finished category is written to the job's
//! checkpoint, so a restarted job resumes instead of starting over.

mod orchestrator;

pub use orchestrator::CrawlOrchestrator;

use crate::catalog::ListingItem;
use crate::checkpoint::{CategoryEntry, ErrorDetails, JobType};
use crate::config::CrawlerConfig;
use crate::pagination::{PaginationType, StopReason};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Hard limits applied to one job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobLimits {
    pub max_depth: u32,
    pub max_categories_per_level: usize,
    pub max_pages: u32,
    pub max_products_per_category: usize,
    pub parallel_categories: usize,
}

impl From<&CrawlerConfig> for JobLimits {
    fn from(config: &CrawlerConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            max_categories_per_level: config.max_categories_per_level,
            max_pages: config.max_pages,
            max_products_per_category: config.max_products_per_category,
            parallel_categories: config.parallel_categories,
        }
    }
}

/// A crawl job submission
#[derive(Debug, Clone)]
pub struct CrawlJob {
    /// Checkpoint to continue or create; a fresh id is generated when absent
    pub job_id: Option<Uuid>,
    pub root_url: String,
    pub job_type: JobType,
    /// Whether to pick up the latest active checkpoint for the site
    pub resume: bool,
    pub limits: JobLimits,
    pub cancel: CancellationToken,
}

impl CrawlJob {
    pub fn new(root_url: &str, config: &CrawlerConfig) -> Self {
        Self {
            job_id: None,
            root_url: root_url.to_string(),
            job_type: JobType::ProductCatalog,
            resume: true,
            limits: JobLimits::from(config),
            cancel: CancellationToken::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryStatus {
    Success,
    Error,
}

/// Outcome of extracting one category, stored in `extraction_results`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryResult {
    pub category_url: String,
    pub category_name: String,
    pub status: CategoryStatus,
    pub pagination_type: Option<PaginationType>,
    pub pages_visited: u32,
    pub stop_reason: Option<StopReason>,
    #[serde(default)]
    pub products: Vec<ListingItem>,
    pub error: Option<ErrorDetails>,
    pub elapsed_ms: u64,
}

impl CategoryResult {
    pub fn new(category: &CategoryEntry) -> Self {
        Self {
            category_url: category.url.clone(),
            category_name: category.name.clone(),
            status: CategoryStatus::Success,
            pagination_type: None,
            pages_visited: 0,
            stop_reason: None,
            products: Vec::new(),
            error: None,
            elapsed_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CategoryStatus::Success
    }

    /// Summary written to the checkpoint's `pagination_state`
    pub fn pagination_state(&self) -> serde_json::Value {
        serde_json::json!({
            "category_url": self.category_url,
            "pagination_type": self.pagination_type,
            "pages_visited": self.pages_visited,
            "stop_reason": self.stop_reason,
        })
    }
}
