//! Resumable crawl checkpoints
//!
//! One [`CheckpointRecord`] exists per crawl job. The orchestrator mirrors its
//! pipeline stage in `pipeline_step` and merges progress into `pipeline_data`
//! after every unit of work, so a restarted job picks up where the last one
//! stopped.
//!
//! # Lifecycle
//!
//! ```text
//! active ──► completed
//!    │
//!    ├─────► failed
//!    │
//!    └─────► expired
//! ```
//!
//! Terminal records are immutable. `pipeline_step` never decreases and every
//! processed URL is also a discovered URL.

mod manager;
mod validation;

pub use manager::CheckpointManager;
pub use validation::{parse_step, validate_draft, validate_record, FieldError, ValidationError};

use crate::storage::StorageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Days a checkpoint lives unless the draft says otherwise
pub const DEFAULT_TTL_DAYS: i64 = 30;

/// Errors raised by checkpoint operations
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    #[error("Checkpoint {id} is {status} and can no longer change")]
    Terminal { id: Uuid, status: CheckpointStatus },

    #[error("pipeline_step may not decrease from {from} to {to}")]
    StepRegression { from: PipelineStep, to: PipelineStep },

    #[error("Store error: {0}")]
    Store(#[from] StorageError),
}

/// Kind of crawl a checkpoint tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    ProductCatalog,
    ProductDetail,
    CategoryDiscovery,
}

impl JobType {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::ProductCatalog => "product_catalog",
            Self::ProductDetail => "product_detail",
            Self::CategoryDiscovery => "category_discovery",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "product_catalog" => Some(Self::ProductCatalog),
            "product_detail" => Some(Self::ProductDetail),
            "category_discovery" => Some(Self::CategoryDiscovery),
            _ => None,
        }
    }

    /// Whether the job runs paginated extraction after expansion
    pub fn extracts_listings(&self) -> bool {
        !matches!(self, Self::CategoryDiscovery)
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_string(&s.replace('-', "_"))
            .ok_or_else(|| format!("unknown job type '{}'", s))
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// Lifecycle status of a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Active,
    Completed,
    Failed,
    Expired,
}

impl CheckpointStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

impl std::fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// Pipeline stage a job has reached, always within `1..=4`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct PipelineStep(u8);

impl PipelineStep {
    pub const NAVIGATION: Self = Self(1);
    pub const CATEGORY_EXPANSION: Self = Self(2);
    pub const EXTRACTION: Self = Self(3);
    pub const FINALIZE: Self = Self(4);

    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for PipelineStep {
    fn default() -> Self {
        Self::NAVIGATION
    }
}

impl TryFrom<u8> for PipelineStep {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if (Self::NAVIGATION.0..=Self::FINALIZE.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(format!("pipeline_step {} is outside 1..=4", value))
        }
    }
}

impl From<PipelineStep> for u8 {
    fn from(step: PipelineStep) -> Self {
        step.0
    }
}

impl std::fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A category recorded by discovery and expansion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryEntry {
    pub name: String,
    pub url: String,
    pub depth: u32,
    pub parent: Option<String>,
    pub has_products: bool,
    /// Whether the category is extracted in stage 3
    pub is_target: bool,
}

/// Progress carried by a checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineData {
    pub urls_discovered: Vec<String>,
    pub urls_processed: Vec<String>,
    pub current_page: u32,
    pub pagination_state: Value,
    pub extraction_results: Vec<Value>,
    pub categories: Vec<CategoryEntry>,
}

impl Default for PipelineData {
    fn default() -> Self {
        Self {
            urls_discovered: Vec::new(),
            urls_processed: Vec::new(),
            current_page: 0,
            pagination_state: Value::Object(Map::new()),
            extraction_results: Vec::new(),
            categories: Vec::new(),
        }
    }
}

impl PipelineData {
    pub fn is_processed(&self, url: &str) -> bool {
        self.urls_processed.iter().any(|u| u == url)
    }

    /// Categories stage 3 extracts, in discovery order
    pub fn targets(&self) -> impl Iterator<Item = &CategoryEntry> {
        self.categories.iter().filter(|c| c.is_target)
    }
}

/// Why a job failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub message: String,
    pub code: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorDetails {
    pub fn new(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A persisted checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub checkpoint_id: Uuid,
    pub site_domain: String,
    pub job_type: JobType,
    pub pipeline_step: PipelineStep,
    pub pipeline_data: PipelineData,
    pub status: CheckpointStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub error_details: Option<ErrorDetails>,
}

impl CheckpointRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Seconds since creation
    pub fn age(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_seconds()
    }
}

/// Unvalidated input to [`CheckpointManager::create`]
///
/// Fields arrive loosely typed, as they would from a job submission, and are
/// checked all at once by [`validate_draft`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointDraft {
    /// Generated when absent
    pub checkpoint_id: Option<String>,
    pub site_domain: String,
    pub job_type: String,
    /// Truncated toward zero; defaults to 1
    pub pipeline_step: Option<f64>,
    pub pipeline_data: Option<PipelineData>,
    /// Defaults to creation time plus the manager's TTL
    pub expires_at: Option<DateTime<Utc>>,
}

impl CheckpointDraft {
    pub fn new(site_domain: &str, job_type: JobType) -> Self {
        Self {
            site_domain: site_domain.to_string(),
            job_type: job_type.to_db_string().to_string(),
            ..Self::default()
        }
    }
}

impl From<&CheckpointRecord> for CheckpointDraft {
    fn from(record: &CheckpointRecord) -> Self {
        Self {
            checkpoint_id: Some(record.checkpoint_id.to_string()),
            site_domain: record.site_domain.clone(),
            job_type: record.job_type.to_db_string().to_string(),
            pipeline_step: Some(f64::from(record.pipeline_step.get())),
            pipeline_data: Some(record.pipeline_data.clone()),
            expires_at: Some(record.expires_at),
        }
    }
}

/// Replacement values for an existing checkpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointPatch {
    pub checkpoint_id: String,
    pub pipeline_step: Option<f64>,
    pub pipeline_data: Option<PipelineData>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CheckpointPatch {
    pub fn new(checkpoint_id: Uuid) -> Self {
        Self {
            checkpoint_id: checkpoint_id.to_string(),
            ..Self::default()
        }
    }
}

/// Merge-only progress update
///
/// Applying deltas is order-independent for everything but
/// `pagination_state`: URL lists are unioned, extraction results appended,
/// and the step and page counter only move forward.
#[derive(Debug, Clone, Default)]
pub struct PipelineDelta {
    pub pipeline_step: Option<PipelineStep>,
    pub urls_discovered: Vec<String>,
    pub urls_processed: Vec<String>,
    pub extraction_results: Vec<Value>,
    /// Merged by URL; an incoming entry replaces a stored one
    pub categories: Vec<CategoryEntry>,
    pub current_page: Option<u32>,
    pub pagination_state: Option<Value>,
}

impl PipelineDelta {
    pub fn step(step: PipelineStep) -> Self {
        Self {
            pipeline_step: Some(step),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pipeline_step.is_none()
            && self.urls_discovered.is_empty()
            && self.urls_processed.is_empty()
            && self.extraction_results.is_empty()
            && self.categories.is_empty()
            && self.current_page.is_none()
            && self.pagination_state.is_none()
    }

    /// Folds the delta into a record's step and data
    pub fn apply_to(self, record: &mut CheckpointRecord) {
        if let Some(step) = self.pipeline_step {
            record.pipeline_step = record.pipeline_step.max(step);
        }

        let data = &mut record.pipeline_data;
        union_into(&mut data.urls_discovered, self.urls_discovered);
        // A processed URL is discovered by definition
        union_into(&mut data.urls_discovered, self.urls_processed.clone());
        union_into(&mut data.urls_processed, self.urls_processed);
        data.extraction_results.extend(self.extraction_results);

        for entry in self.categories {
            match data.categories.iter_mut().find(|c| c.url == entry.url) {
                Some(existing) => *existing = entry,
                None => data.categories.push(entry),
            }
        }

        if let Some(page) = self.current_page {
            data.current_page = data.current_page.max(page);
        }
        if let Some(state) = self.pagination_state {
            data.pagination_state = state;
        }
    }
}

/// Appends the values of `incoming` not already in `target`, keeping order
fn union_into(target: &mut Vec<String>, incoming: Vec<String>) {
    let mut seen: HashSet<String> = target.iter().cloned().collect();
    for value in incoming {
        if seen.insert(value.clone()) {
            target.push(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> CheckpointRecord {
        let now = Utc::now();
        CheckpointRecord {
            checkpoint_id: Uuid::new_v4(),
            site_domain: "shop.test".to_string(),
            job_type: JobType::ProductCatalog,
            pipeline_step: PipelineStep::CATEGORY_EXPANSION,
            pipeline_data: PipelineData::default(),
            status: CheckpointStatus::Active,
            created_at: now,
            updated_at: now,
            expires_at: now + chrono::Duration::days(DEFAULT_TTL_DAYS),
            error_details: None,
        }
    }

    fn urls(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_job_type_parsing() {
        assert_eq!("product_catalog".parse::<JobType>(), Ok(JobType::ProductCatalog));
        assert_eq!("category-discovery".parse::<JobType>(), Ok(JobType::CategoryDiscovery));
        assert!("sitemap".parse::<JobType>().is_err());
    }

    #[test]
    fn test_status_terminal() {
        assert!(!CheckpointStatus::Active.is_terminal());
        assert!(CheckpointStatus::Completed.is_terminal());
        assert!(CheckpointStatus::Failed.is_terminal());
        assert!(CheckpointStatus::Expired.is_terminal());
    }

    #[test]
    fn test_pipeline_step_bounds() {
        assert!(PipelineStep::try_from(0).is_err());
        assert!(PipelineStep::try_from(5).is_err());
        assert_eq!(PipelineStep::try_from(3), Ok(PipelineStep::EXTRACTION));
        assert!(serde_json::from_str::<PipelineStep>("9").is_err());
        assert_eq!(serde_json::to_string(&PipelineStep::FINALIZE).unwrap(), "4");
    }

    #[test]
    fn test_pipeline_data_defaults_missing_fields() {
        let data: PipelineData =
            serde_json::from_str(r#"{"urls_discovered": ["https://shop.test/c/1"]}"#).unwrap();
        assert_eq!(data.urls_discovered.len(), 1);
        assert!(data.urls_processed.is_empty());
        assert!(data.extraction_results.is_empty());
        assert_eq!(data.pagination_state, serde_json::json!({}));
    }

    #[test]
    fn test_delta_unions_urls() {
        let mut record = record();
        record.pipeline_data.urls_discovered = urls(&["a", "b"]);

        PipelineDelta {
            urls_discovered: urls(&["b", "c"]),
            urls_processed: urls(&["a", "d"]),
            ..PipelineDelta::default()
        }
        .apply_to(&mut record);

        assert_eq!(record.pipeline_data.urls_discovered, urls(&["a", "b", "c", "d"]));
        assert_eq!(record.pipeline_data.urls_processed, urls(&["a", "d"]));
    }

    #[test]
    fn test_delta_step_never_decreases() {
        let mut record = record();
        PipelineDelta::step(PipelineStep::NAVIGATION).apply_to(&mut record);
        assert_eq!(record.pipeline_step, PipelineStep::CATEGORY_EXPANSION);

        PipelineDelta::step(PipelineStep::EXTRACTION).apply_to(&mut record);
        assert_eq!(record.pipeline_step, PipelineStep::EXTRACTION);
    }

    #[test]
    fn test_deltas_commute() {
        let first = PipelineDelta {
            urls_processed: urls(&["x"]),
            extraction_results: vec![serde_json::json!({"category_url": "x"})],
            ..PipelineDelta::default()
        };
        let second = PipelineDelta {
            urls_processed: urls(&["y"]),
            extraction_results: vec![serde_json::json!({"category_url": "y"})],
            ..PipelineDelta::default()
        };

        let mut a = record();
        first.clone().apply_to(&mut a);
        second.clone().apply_to(&mut a);
        let mut b = record();
        second.apply_to(&mut b);
        first.apply_to(&mut b);

        let sorted = |r: &CheckpointRecord| {
            let mut v = r.pipeline_data.urls_processed.clone();
            v.sort();
            v
        };
        assert_eq!(sorted(&a), sorted(&b));
        assert_eq!(
            a.pipeline_data.extraction_results.len(),
            b.pipeline_data.extraction_results.len()
        );
    }

    #[test]
    fn test_delta_replaces_category_by_url() {
        let entry = |is_target| CategoryEntry {
            name: "Boots".to_string(),
            url: "https://shop.test/c/boots".to_string(),
            depth: 1,
            parent: None,
            has_products: false,
            is_target,
        };
        let mut record = record();
        PipelineDelta {
            categories: vec![entry(false)],
            ..PipelineDelta::default()
        }
        .apply_to(&mut record);
        PipelineDelta {
            categories: vec![entry(true)],
            ..PipelineDelta::default()
        }
        .apply_to(&mut record);

        assert_eq!(record.pipeline_data.categories, vec![entry(true)]);
        assert_eq!(record.pipeline_data.targets().count(), 1);
    }

    #[test]
    fn test_expiry_and_age() {
        let record = record();
        let later = record.created_at + chrono::Duration::seconds(90);
        assert_eq!(record.age(later), 90);
        assert!(!record.is_expired(later));
        assert!(record.is_expired(record.expires_at));
    }
}
