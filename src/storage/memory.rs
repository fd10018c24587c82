//! In-memory checkpoint backend for tests and dry runs

use crate::checkpoint::{CheckpointRecord, CheckpointStatus, JobType};
use crate::storage::traits::{CheckpointStore, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Checkpoints kept in a map for the life of the process
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    records: RwLock<HashMap<Uuid, CheckpointRecord>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn upsert(&self, record: &CheckpointRecord) -> StorageResult<()> {
        self.records
            .write()
            .await
            .insert(record.checkpoint_id, record.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StorageResult<Option<CheckpointRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn delete(&self, id: Uuid) -> StorageResult<bool> {
        Ok(self.records.write().await.remove(&id).is_some())
    }

    async fn find_latest(
        &self,
        site_domain: &str,
        job_type: JobType,
        status: Option<CheckpointStatus>,
    ) -> StorageResult<Option<CheckpointRecord>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| {
                r.site_domain == site_domain
                    && r.job_type == job_type
                    && status.map_or(true, |s| r.status == s)
            })
            .max_by_key(|r| r.updated_at)
            .cloned())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StorageResult<usize> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| !r.is_expired(now));
        Ok(before - records.len())
    }
}
