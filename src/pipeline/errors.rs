use thiserror::Error;

use super::types::{JobId, StageId, StageStatus};
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Stage {0} is not part of this pipeline")]
    StageNotRegistered(StageId),

    #[error("Cannot retry {stage} for job {job_id}: stage is {status} ({reason})")]
    PreconditionFailed {
        job_id: JobId,
        stage: StageId,
        status: StageStatus,
        reason: String,
    },

    #[error("Stage {stage} cannot be started or retried on its own; it runs as part of {produced_by}")]
    NotIndependentlyRetriable { stage: StageId, produced_by: StageId },

    #[error("Could not hand off {stage} for job {job_id}: {reason}")]
    DispatchUnavailable {
        job_id: JobId,
        stage: StageId,
        reason: String,
    },

    #[error("Job {job_id} already has {stage} dispatched")]
    DispatchInFlight { job_id: JobId, stage: StageId },

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),
}

impl PipelineError {
    /// Job or stage id was unknown
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            PipelineError::JobNotFound(_)
                | PipelineError::UnknownStage(_)
                | PipelineError::UnknownTopic(_)
                | PipelineError::StageNotRegistered(_)
        ) || matches!(self, PipelineError::Store(StoreError::NotFound(_)))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Pipeline must contain at least one stage")]
    Empty,
    #[error("Stage {0} is defined more than once")]
    Duplicate(StageId),
    #[error("Stage {stage} points to {found:?}, expected {expected:?}")]
    BrokenChain {
        stage: StageId,
        expected: Option<StageId>,
        found: Option<StageId>,
    },
    #[error("Stage {0} must be implicit exactly when its retry names a producing stage")]
    ProducerMismatch(StageId),
}
