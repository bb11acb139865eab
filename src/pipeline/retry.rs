// Operator-requested retries. A retry resets the stage and re-enters the
// same hand-off the trigger uses, skipping the "already complete" guard.

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::dispatcher::{Dispatcher, HandOffError};
use super::errors::PipelineError;
use super::registry::{RetryPolicy, Stage, StageRegistry};
use super::types::{JobId, JobRecord, StageId, StageStatus};
use super::update::JobUpdate;
use crate::observability::pipeline_metrics;
use crate::store::JobStore;

/// A retry that reached its collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dispatched {
    pub job_id: JobId,
    pub stage: StageId,
    pub ticket: u64,
}

pub struct RetryCoordinator {
    registry: Arc<StageRegistry>,
    store: Arc<dyn JobStore>,
    dispatcher: Arc<Dispatcher>,
}

impl RetryCoordinator {
    pub fn new(
        registry: Arc<StageRegistry>,
        store: Arc<dyn JobStore>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            registry,
            store,
            dispatcher,
        }
    }

    pub async fn retry(&self, job_id: &JobId, stage: StageId) -> Result<Dispatched, PipelineError> {
        let target = self.registry.stage_by_id(stage)?;
        let _guard = self.dispatcher.lock_job(job_id).await;
        let record = self
            .store
            .load(job_id)
            .await?
            .ok_or_else(|| PipelineError::JobNotFound(job_id.clone()))?;

        check_retriable(job_id, target, &record)?;

        if let Some(existing) = self.dispatcher.ledger().current(job_id) {
            return Err(PipelineError::DispatchInFlight {
                job_id: job_id.clone(),
                stage: existing.stage,
            });
        }
        // Refuse before the reset so an unreachable collaborator leaves the
        // failure on the record.
        self.dispatcher.preflight(stage).map_err(|e| {
            e.log(job_id, stage);
            unavailable(job_id, stage, e)
        })?;

        let prior = record.stage(stage).clone();
        self.store.save(job_id, JobUpdate::new().reset(stage)).await?;
        pipeline_metrics().record_retry();
        info!(job_id = %job_id, stage = %stage, "Stage reset for retry");

        let ticket = match self.dispatcher.hand_off(job_id, target) {
            Ok(ticket) => ticket,
            Err(e) => {
                e.log(job_id, stage);
                // The collaborator went away after the preflight; put the
                // stage back so its earlier outcome stays visible.
                if let Err(restore_err) = self
                    .store
                    .save(job_id, JobUpdate::new().restore(stage, &prior))
                    .await
                {
                    warn!(job_id = %job_id, stage = %stage, error = %restore_err, "Could not restore stage after failed retry hand-off");
                }
                return Err(unavailable(job_id, stage, e));
            }
        };

        Ok(Dispatched {
            job_id: job_id.clone(),
            stage,
            ticket,
        })
    }
}

fn check_retriable(job_id: &JobId, stage: &Stage, record: &JobRecord) -> Result<(), PipelineError> {
    let status = stage.status(record);
    let rejected = |reason: String| PipelineError::PreconditionFailed {
        job_id: job_id.clone(),
        stage: stage.id,
        status,
        reason,
    };

    match stage.retry {
        RetryPolicy::OnFailure if status == StageStatus::Failed => Ok(()),
        RetryPolicy::OnFailure => Err(rejected("only a failed stage can be retried".to_string())),
        RetryPolicy::AfterPrerequisite { .. } if status == StageStatus::Failed => Ok(()),
        RetryPolicy::AfterPrerequisite { .. } if status == StageStatus::InProgress => {
            Err(rejected("stage is already running".to_string()))
        }
        RetryPolicy::AfterPrerequisite { requirement, ready } => {
            if ready(record) {
                Ok(())
            } else {
                Err(rejected(format!("requires {requirement}")))
            }
        }
        RetryPolicy::NotIndependent { produced_by } => Err(PipelineError::NotIndependentlyRetriable {
            stage: stage.id,
            produced_by,
        }),
    }
}

fn unavailable(job_id: &JobId, stage: StageId, error: HandOffError) -> PipelineError {
    match error {
        HandOffError::Unavailable(reason) => PipelineError::DispatchUnavailable {
            job_id: job_id.clone(),
            stage,
            reason,
        },
        HandOffError::InFlight(existing) => PipelineError::DispatchInFlight {
            job_id: job_id.clone(),
            stage: existing.stage,
        },
    }
}
