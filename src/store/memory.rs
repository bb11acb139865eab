use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{JobStore, StoreError};
use crate::pipeline::{JobId, JobRecord, JobUpdate};

/// Process-local store; the write lock makes each save atomic
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    records: RwLock<HashMap<JobId, JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, record: JobRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id));
        }
        records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn load(&self, job_id: &JobId) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.records.read().await.get(job_id).cloned())
    }

    async fn save(&self, job_id: &JobId, update: JobUpdate) -> Result<JobRecord, StoreError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.clone()))?;
        update.apply(record);
        Ok(record.clone())
    }

    async fn list(&self) -> Result<Vec<JobId>, StoreError> {
        let mut ids: Vec<_> = self.records.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PayloadField, StageId, StageStatus};

    #[tokio::test]
    async fn insert_load_and_save() {
        let store = MemoryJobStore::new();
        let id = JobId::from("job-1");
        store.insert(JobRecord::new(id.clone(), "src")).await.unwrap();

        let written = store
            .save(
                &id,
                JobUpdate::new()
                    .done(StageId::Download)
                    .set(PayloadField::MediaPath("/media/1.mp4".into())),
            )
            .await
            .unwrap();
        assert_eq!(written.status_of(StageId::Download), StageStatus::Done);

        let loaded = store.load(&id).await.unwrap().unwrap();
        assert_eq!(loaded, written);
        assert_eq!(store.list().await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let store = MemoryJobStore::new();
        store.insert(JobRecord::new("a".into(), "src")).await.unwrap();
        let err = store.insert(JobRecord::new("a".into(), "src")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn save_to_missing_job_is_not_found() {
        let store = MemoryJobStore::new();
        let err = store
            .save(&"ghost".into(), JobUpdate::new().done(StageId::Download))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(store.load(&"ghost".into()).await.unwrap().is_none());
    }
}
