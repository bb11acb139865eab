//! Job record persistence
//!
//! The store is the only shared mutable resource in the pipeline. Every
//! write goes through [`JobStore::save`], which applies a [`JobUpdate`] as a
//! single read-modify-write against the current row.

mod file;
mod memory;

pub use file::FileJobStore;
pub use memory::MemoryJobStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::pipeline::{JobId, JobRecord, JobUpdate};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job already exists: {0}")]
    AlreadyExists(JobId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Persistence interface consumed by the pipeline
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Add a new record; fails if the id is taken
    async fn insert(&self, record: JobRecord) -> Result<(), StoreError>;

    async fn load(&self, job_id: &JobId) -> Result<Option<JobRecord>, StoreError>;

    /// Apply a partial update and return the record as written
    async fn save(&self, job_id: &JobId, update: JobUpdate) -> Result<JobRecord, StoreError>;

    async fn list(&self) -> Result<Vec<JobId>, StoreError>;
}
