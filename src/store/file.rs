use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{JobStore, StoreError};
use crate::pipeline::{JobId, JobRecord, JobUpdate};

/// One pretty-printed JSON file per job under a directory
pub struct FileJobStore {
    directory: PathBuf,
    // Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl FileJobStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn record_path(&self, job_id: &JobId) -> Result<PathBuf, StoreError> {
        let id = job_id.as_str();
        let safe = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !safe {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("job id {id:?} cannot be used as a file name"),
            )));
        }
        Ok(self.directory.join(format!("{id}.job.json")))
    }

    async fn read(&self, path: &Path) -> Result<Option<JobRecord>, StoreError> {
        match fs::read_to_string(path).await {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // Write to a temporary file first, then rename over the target
    async fn write(&self, path: &Path, record: &JobRecord) -> Result<(), StoreError> {
        fs::create_dir_all(&self.directory).await?;
        let serialized = serde_json::to_string_pretty(record)?;
        let temp_file = path.with_extension("json.tmp");
        fs::write(&temp_file, serialized).await?;
        fs::rename(&temp_file, path).await?;
        debug!(job_id = %record.id, file = ?path, "Job record written");
        Ok(())
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn insert(&self, record: JobRecord) -> Result<(), StoreError> {
        let path = self.record_path(&record.id)?;
        let _guard = self.write_lock.lock().await;
        if fs::try_exists(&path).await? {
            return Err(StoreError::AlreadyExists(record.id));
        }
        self.write(&path, &record).await?;
        info!(job_id = %record.id, source = %record.source_url, "Job record created");
        Ok(())
    }

    async fn load(&self, job_id: &JobId) -> Result<Option<JobRecord>, StoreError> {
        let path = self.record_path(job_id)?;
        self.read(&path).await
    }

    async fn save(&self, job_id: &JobId, update: JobUpdate) -> Result<JobRecord, StoreError> {
        let path = self.record_path(job_id)?;
        let _guard = self.write_lock.lock().await;
        let mut record = self
            .read(&path)
            .await?
            .ok_or_else(|| StoreError::NotFound(job_id.clone()))?;
        update.apply(&mut record);
        self.write(&path, &record).await?;
        Ok(record)
    }

    async fn list(&self) -> Result<Vec<JobId>, StoreError> {
        let mut entries = match fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if let Some(id) = name.to_str().and_then(|n| n.strip_suffix(".job.json")) {
                ids.push(JobId::from(id));
            }
        }
        ids.sort();
        Ok(ids)
    }
}
