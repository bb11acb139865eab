// Auto-progression: when a collaborator reports its stage complete, decide
// whether the next stage should be dispatched. The trigger never writes job
// fields; it reads the record, checks its guards and hands off.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use super::dispatcher::{Dispatcher, HandOffError};
use super::errors::PipelineError;
use super::registry::{DispatchMode, Stage, StageRegistry};
use super::resolver::PipelineResolver;
use super::types::{JobId, JobRecord, StageId};
use crate::observability::pipeline_metrics;
use crate::store::JobStore;

/// Result of one trigger evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TriggerOutcome {
    /// The next stage was handed to its collaborator
    Dispatched { stage: StageId, ticket: u64 },
    /// The completed stage is the last one
    NoNextStage,
    /// The next stage waits for a manual start
    NotAutoDispatchable { stage: StageId },
    /// The next stage is written by another stage's run and is still missing
    AwaitingProducer { stage: StageId, produced_by: StageId },
    /// The reported stage is not actually complete on the record
    StaleCompletion { stage: StageId },
    AlreadyComplete { stage: StageId },
    AlreadyInProgress { stage: StageId },
    /// Earlier stages are still incomplete
    Blocked { stage: StageId, waiting_on: StageId },
    /// Another dispatch for this job has not finished
    DispatchInFlight { stage: StageId, in_flight: StageId },
    /// The hand-off could not start; the job was left untouched
    Unavailable { stage: StageId, reason: String },
}

impl TriggerOutcome {
    pub fn dispatched(&self) -> bool {
        matches!(self, TriggerOutcome::Dispatched { .. })
    }

    pub fn stage(&self) -> Option<StageId> {
        match self {
            TriggerOutcome::NoNextStage => None,
            TriggerOutcome::Dispatched { stage, .. }
            | TriggerOutcome::NotAutoDispatchable { stage }
            | TriggerOutcome::AwaitingProducer { stage, .. }
            | TriggerOutcome::StaleCompletion { stage }
            | TriggerOutcome::AlreadyComplete { stage }
            | TriggerOutcome::AlreadyInProgress { stage }
            | TriggerOutcome::Blocked { stage, .. }
            | TriggerOutcome::DispatchInFlight { stage, .. }
            | TriggerOutcome::Unavailable { stage, .. } => Some(*stage),
        }
    }
}

pub struct AutoProgressionTrigger {
    registry: Arc<StageRegistry>,
    store: Arc<dyn JobStore>,
    dispatcher: Arc<Dispatcher>,
}

impl AutoProgressionTrigger {
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

    async fn load(&self, job_id: &JobId) -> Result<JobRecord, PipelineError> {
        self.store
            .load(job_id)
            .await?
            .ok_or_else(|| PipelineError::JobNotFound(job_id.clone()))
    }

    /// Called by a collaborator once `completed` is done for the job
    pub async fn on_stage_completed(
        &self,
        job_id: &JobId,
        completed: StageId,
    ) -> Result<TriggerOutcome, PipelineError> {
        let completed_stage = self.registry.stage_by_id(completed)?;
        let _guard = self.dispatcher.lock_job(job_id).await;
        let record = self.load(job_id).await?;

        self.dispatcher.ledger().release_stage(job_id, completed);

        let outcome = if !completed_stage.complete(&record) {
            TriggerOutcome::StaleCompletion { stage: completed }
        } else {
            self.progress_from(job_id, &record, completed)
        };

        if !outcome.dispatched() {
            if !matches!(outcome, TriggerOutcome::Unavailable { .. }) {
                pipeline_metrics().record_short_circuit();
            }
            debug!(job_id = %job_id, completed = %completed, outcome = ?outcome, "Auto-progression stopped");
        }
        Ok(outcome)
    }

    // Implicit stages already written by their producer are passed over, so
    // the first stage that actually needs a run decides the outcome.
    fn progress_from(&self, job_id: &JobId, record: &JobRecord, completed: StageId) -> TriggerOutcome {
        let mut next = self.registry.next_stage(completed);
        while let Some(stage) = next {
            match stage.dispatch {
                DispatchMode::Auto => return self.guarded_hand_off(job_id, record, stage),
                DispatchMode::Manual => return TriggerOutcome::NotAutoDispatchable { stage: stage.id },
                DispatchMode::Implicit { produced_by } if !stage.complete(record) => {
                    return TriggerOutcome::AwaitingProducer {
                        stage: stage.id,
                        produced_by,
                    };
                }
                DispatchMode::Implicit { .. } => {
                    debug!(job_id = %job_id, stage = %stage.id, "Implicit stage already produced");
                    next = self.registry.next_stage(stage.id);
                }
            }
        }
        TriggerOutcome::NoNextStage
    }

    /// Operator-requested start of a stage, e.g. a manual one. Gated on
    /// every earlier stage being complete. Implicit stages are refused.
    pub async fn start_stage(
        &self,
        job_id: &JobId,
        stage: StageId,
    ) -> Result<TriggerOutcome, PipelineError> {
        let target = self.registry.stage_by_id(stage)?;
        let _guard = self.dispatcher.lock_job(job_id).await;
        let record = self.load(job_id).await?;

        if let Some(produced_by) = target.produced_by() {
            return Err(PipelineError::NotIndependentlyRetriable { stage, produced_by });
        }

        let resolver = PipelineResolver::new(&self.registry);
        if !resolver.can_proceed_to(&record, stage) {
            let waiting_on = self
                .registry
                .first_incomplete_stage(&record)
                .map(|s| s.id)
                .unwrap_or(stage);
            return Ok(TriggerOutcome::Blocked { stage, waiting_on });
        }

        info!(job_id = %job_id, stage = %stage, "Manual stage start requested");
        Ok(self.guarded_hand_off(job_id, &record, target))
    }

    // Idempotency guards, then hand-off. Caller holds the job lock.
    fn guarded_hand_off(&self, job_id: &JobId, record: &JobRecord, next: &Stage) -> TriggerOutcome {
        if next.complete(record) {
            return TriggerOutcome::AlreadyComplete { stage: next.id };
        }
        if next.in_progress(record) {
            return TriggerOutcome::AlreadyInProgress { stage: next.id };
        }

        match self.dispatcher.hand_off(job_id, next) {
            Ok(ticket) => TriggerOutcome::Dispatched {
                stage: next.id,
                ticket,
            },
            Err(e) => {
                e.log(job_id, next.id);
                match e {
                    HandOffError::Unavailable(reason) => TriggerOutcome::Unavailable {
                        stage: next.id,
                        reason,
                    },
                    HandOffError::InFlight(existing) => TriggerOutcome::DispatchInFlight {
                        stage: next.id,
                        in_flight: existing.stage,
                    },
                }
            }
        }
    }
}
