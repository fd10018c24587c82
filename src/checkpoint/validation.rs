use crate::checkpoint::{
    CheckpointDraft, CheckpointRecord, CheckpointStatus, JobType, PipelineData, PipelineStep,
};
use crate::url::is_valid_domain;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

/// One offending field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// Every field a checkpoint failed validation on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub fields: Vec<FieldError>,
}

impl ValidationError {
    pub fn has_field(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f.field == field)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .fields
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        write!(f, "invalid checkpoint ({})", parts.join("; "))
    }
}

impl std::error::Error for ValidationError {}

#[derive(Default)]
struct Collector {
    fields: Vec<FieldError>,
}

impl Collector {
    fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.fields.push(FieldError {
            field,
            message: message.into(),
        });
    }

    fn finish(self) -> Result<(), ValidationError> {
        if self.fields.is_empty() {
            Ok(())
        } else {
            Err(ValidationError {
                fields: self.fields,
            })
        }
    }
}

/// Converts a loosely typed step to a [`PipelineStep`], truncating toward zero
pub fn parse_step(raw: f64) -> Result<PipelineStep, String> {
    if !raw.is_finite() {
        return Err(format!("{} is not a number", raw));
    }
    let truncated = raw.trunc();
    if !(1.0..=4.0).contains(&truncated) {
        return Err(format!("{} is outside 1..=4", raw));
    }
    PipelineStep::try_from(truncated as u8)
}

fn parse_id(raw: &str) -> Result<Uuid, String> {
    let id = Uuid::parse_str(raw).map_err(|e| format!("'{}' is not a UUID: {}", raw, e))?;
    if id.get_version() != Some(uuid::Version::Random) {
        return Err(format!("'{}' is not a version 4 UUID", raw));
    }
    Ok(id)
}

fn check_domain(domain: &str, errors: &mut Collector) {
    if !is_valid_domain(domain) {
        errors.push("site_domain", format!("'{}' is not a valid domain", domain));
    }
}

fn check_data(data: &PipelineData, errors: &mut Collector) {
    let discovered: HashSet<&str> = data.urls_discovered.iter().map(String::as_str).collect();
    let stray: Vec<&str> = data
        .urls_processed
        .iter()
        .map(String::as_str)
        .filter(|url| !discovered.contains(url))
        .collect();
    if !stray.is_empty() {
        errors.push(
            "pipeline_data.urls_processed",
            format!("{} URL(s) were never discovered: {}", stray.len(), stray.join(", ")),
        );
    }

    if !data.pagination_state.is_object() {
        errors.push("pipeline_data.pagination_state", "must be an object");
    }
}

/// Validates a draft and builds the active record it describes
///
/// # Arguments
///
/// * `draft` - Loosely typed creation input
/// * `now` - Creation timestamp
/// * `ttl` - Lifetime applied when the draft has no `expires_at`
///
/// # Returns
///
/// * `Ok(CheckpointRecord)` - The new record, status `active`
/// * `Err(ValidationError)` - Every field that failed, not just the first
pub fn validate_draft(
    draft: CheckpointDraft,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Result<CheckpointRecord, ValidationError> {
    let mut errors = Collector::default();

    let checkpoint_id = match draft.checkpoint_id.as_deref() {
        None => Some(Uuid::new_v4()),
        Some(raw) => parse_id(raw)
            .map_err(|message| errors.push("checkpoint_id", message))
            .ok(),
    };

    let site_domain = draft.site_domain.trim().to_lowercase();
    check_domain(&site_domain, &mut errors);

    let job_type = JobType::from_db_string(&draft.job_type);
    if job_type.is_none() {
        errors.push(
            "job_type",
            format!(
                "'{}' is not one of product_catalog, product_detail, category_discovery",
                draft.job_type
            ),
        );
    }

    let pipeline_step = match draft.pipeline_step {
        None => Some(PipelineStep::default()),
        Some(raw) => parse_step(raw)
            .map_err(|message| errors.push("pipeline_step", message))
            .ok(),
    };

    let pipeline_data = draft.pipeline_data.unwrap_or_default();
    check_data(&pipeline_data, &mut errors);

    let expires_at = draft.expires_at.unwrap_or(now + ttl);

    errors.finish()?;

    match (checkpoint_id, job_type, pipeline_step) {
        (Some(checkpoint_id), Some(job_type), Some(pipeline_step)) => Ok(CheckpointRecord {
            checkpoint_id,
            site_domain,
            job_type,
            pipeline_step,
            pipeline_data,
            status: CheckpointStatus::Active,
            created_at: now,
            updated_at: now,
            expires_at,
            error_details: None,
        }),
        // Each None above pushed a field error
        _ => Err(ValidationError { fields: Vec::new() }),
    }
}

/// Re-checks the invariants of an already typed record
pub fn validate_record(record: &CheckpointRecord) -> Result<(), ValidationError> {
    let mut errors = Collector::default();

    if record.checkpoint_id.get_version() != Some(uuid::Version::Random) {
        errors.push("checkpoint_id", "not a version 4 UUID");
    }
    check_domain(&record.site_domain, &mut errors);
    check_data(&record.pipeline_data, &mut errors);

    if record.updated_at < record.created_at {
        errors.push("updated_at", "precedes created_at");
    }
    if record.status == CheckpointStatus::Failed && record.error_details.is_none() {
        errors.push("error_details", "required on a failed checkpoint");
    }

    errors.finish()
}
