use crate::checkpoint::{
    parse_step, validate_draft, validate_record, CheckpointDraft, CheckpointError,
    CheckpointPatch, CheckpointRecord, CheckpointStatus, ErrorDetails, FieldError, JobType,
    PipelineDelta, ValidationError,
};
use crate::storage::CheckpointStore;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

/// Validating front end over a [`CheckpointStore`]
///
/// Read-merge-write sequences on one checkpoint are serialized by a
/// per-id lock held only for that one write. Different checkpoints never
/// contend.
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    ttl: Duration,
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>, ttl_days: i64) -> Self {
        Self {
            store,
            ttl: Duration::days(ttl_days),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Validates a draft and persists the new active record
    pub async fn create(&self, draft: CheckpointDraft) -> Result<CheckpointRecord, CheckpointError> {
        let record = validate_draft(draft, Utc::now(), self.ttl)?;
        self.store.upsert(&record).await?;
        tracing::debug!(
            "Created checkpoint {} for {} ({})",
            record.checkpoint_id,
            record.site_domain,
            record.job_type
        );
        Ok(record)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<CheckpointRecord>, CheckpointError> {
        Ok(self.store.get(id).await?)
    }

    async fn require(&self, id: Uuid) -> Result<CheckpointRecord, CheckpointError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| CheckpointError::NotFound(id.to_string()))
    }

    /// Replaces the step, data or expiry of an active checkpoint
    ///
    /// The merged record is validated again before it is written.
    pub async fn update(&self, patch: CheckpointPatch) -> Result<CheckpointRecord, CheckpointError> {
        let id = Uuid::parse_str(patch.checkpoint_id.trim()).map_err(|e| ValidationError {
            fields: vec![FieldError {
                field: "checkpoint_id",
                message: if patch.checkpoint_id.trim().is_empty() {
                    "is required".to_string()
                } else {
                    format!("is not a valid UUID: {}", e)
                },
            }],
        })?;

        self.modify(id, |record| {
            if let Some(raw) = patch.pipeline_step {
                let step = parse_step(raw).map_err(|message| ValidationError {
                    fields: vec![FieldError {
                        field: "pipeline_step",
                        message,
                    }],
                })?;
                if step < record.pipeline_step {
                    return Err(CheckpointError::StepRegression {
                        from: record.pipeline_step,
                        to: step,
                    });
                }
                record.pipeline_step = step;
            }
            if let Some(data) = patch.pipeline_data {
                record.pipeline_data = data;
            }
            if let Some(expires_at) = patch.expires_at {
                record.expires_at = expires_at;
            }
            Ok(())
        })
        .await
    }

    /// Merges progress into an active checkpoint
    pub async fn apply_delta(
        &self,
        id: Uuid,
        delta: PipelineDelta,
    ) -> Result<CheckpointRecord, CheckpointError> {
        self.modify(id, |record| {
            delta.apply_to(record);
            Ok(())
        })
        .await
    }

    pub async fn mark_completed(&self, id: Uuid) -> Result<CheckpointRecord, CheckpointError> {
        self.finish(id, CheckpointStatus::Completed, None).await
    }

    /// Marks a checkpoint failed, keeping its partial progress
    pub async fn mark_failed(
        &self,
        id: Uuid,
        details: ErrorDetails,
    ) -> Result<CheckpointRecord, CheckpointError> {
        self.finish(id, CheckpointStatus::Failed, Some(details)).await
    }

    pub async fn mark_expired(&self, id: Uuid) -> Result<CheckpointRecord, CheckpointError> {
        self.finish(id, CheckpointStatus::Expired, None).await
    }

    /// Most recent active checkpoint a job for `site_domain` can resume
    ///
    /// An active checkpoint found past its expiry is marked expired and not
    /// returned.
    pub async fn find_resumable(
        &self,
        site_domain: &str,
        job_type: JobType,
    ) -> Result<Option<CheckpointRecord>, CheckpointError> {
        let Some(record) = self
            .store
            .find_latest(site_domain, job_type, Some(CheckpointStatus::Active))
            .await?
        else {
            return Ok(None);
        };

        if record.is_expired(Utc::now()) {
            tracing::info!(
                "Checkpoint {} expired at {}, starting fresh",
                record.checkpoint_id,
                record.expires_at
            );
            self.mark_expired(record.checkpoint_id).await?;
            return Ok(None);
        }

        Ok(Some(record))
    }

    /// Failed checkpoint a job for `site_domain` can retry
    ///
    /// Only a failed record that is still the newest record for the site and
    /// job type qualifies, so a later completed run or an earlier retry hides
    /// it. Expired records are never retried.
    pub async fn find_retryable(
        &self,
        site_domain: &str,
        job_type: JobType,
    ) -> Result<Option<CheckpointRecord>, CheckpointError> {
        let latest = self.store.find_latest(site_domain, job_type, None).await?;
        Ok(latest.filter(|r| {
            r.status == CheckpointStatus::Failed && !r.is_expired(Utc::now())
        }))
    }

    /// Starts a new active checkpoint carrying a failed checkpoint's progress
    ///
    /// The failed record is left untouched. The new record gets a fresh id
    /// and expiry and keeps the step and pipeline data of `failed`.
    pub async fn retry(
        &self,
        failed: &CheckpointRecord,
    ) -> Result<CheckpointRecord, CheckpointError> {
        if failed.status != CheckpointStatus::Failed {
            return Err(CheckpointError::Terminal {
                id: failed.checkpoint_id,
                status: failed.status,
            });
        }

        let draft = CheckpointDraft {
            checkpoint_id: None,
            expires_at: None,
            ..CheckpointDraft::from(failed)
        };
        let record = self.create(draft).await?;
        tracing::info!(
            "Retrying failed checkpoint {} as {} from step {}",
            failed.checkpoint_id,
            record.checkpoint_id,
            record.pipeline_step
        );
        Ok(record)
    }

    /// Deletes every checkpoint past its expiry
    pub async fn purge_expired(&self) -> Result<usize, CheckpointError> {
        let removed = self.store.purge_expired(Utc::now()).await?;
        if removed > 0 {
            tracing::info!("Purged {} expired checkpoints", removed);
        }
        Ok(removed)
    }

    async fn finish(
        &self,
        id: Uuid,
        status: CheckpointStatus,
        details: Option<ErrorDetails>,
    ) -> Result<CheckpointRecord, CheckpointError> {
        let lock = self.lock_for(id);
        let result = {
            let _guard = lock.lock().await;
            self.finish_locked(id, status, details).await
        };
        self.release_lock(id, lock);
        result
    }

    async fn finish_locked(
        &self,
        id: Uuid,
        status: CheckpointStatus,
        details: Option<ErrorDetails>,
    ) -> Result<CheckpointRecord, CheckpointError> {
        let mut record = self.require(id).await?;

        if record.status == status {
            return Ok(record);
        }
        if record.status.is_terminal() {
            return Err(CheckpointError::Terminal {
                id,
                status: record.status,
            });
        }

        record.status = status;
        record.error_details = details;
        record.updated_at = Utc::now();
        validate_record(&record)?;
        self.store.upsert(&record).await?;
        tracing::debug!("Checkpoint {} is now {}", id, status);
        Ok(record)
    }

    /// Read, change and write one active record under its lock
    async fn modify<F>(&self, id: Uuid, change: F) -> Result<CheckpointRecord, CheckpointError>
    where
        F: FnOnce(&mut CheckpointRecord) -> Result<(), CheckpointError>,
    {
        let lock = self.lock_for(id);
        let result = {
            let _guard = lock.lock().await;
            self.modify_locked(id, change).await
        };
        self.release_lock(id, lock);
        result
    }

    async fn modify_locked<F>(
        &self,
        id: Uuid,
        change: F,
    ) -> Result<CheckpointRecord, CheckpointError>
    where
        F: FnOnce(&mut CheckpointRecord) -> Result<(), CheckpointError>,
    {
        let mut record = self.require(id).await?;
        if record.status.is_terminal() {
            return Err(CheckpointError::Terminal {
                id,
                status: record.status,
            });
        }

        change(&mut record)?;
        record.updated_at = Utc::now();
        validate_record(&record)?;
        self.store.upsert(&record).await?;
        Ok(record)
    }

    fn lock_for(&self, id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(id).or_default().clone()
    }

    /// Drops the map entry once no other task holds the lock
    fn release_lock(&self, id: Uuid, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one here
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(&id);
        }
    }
}
