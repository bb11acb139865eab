//! Pipeline manager
//!
//! Facade wiring the registry, store, broadcaster, trigger and retry
//! coordinator together. Collaborators report through it: every write it
//! makes is followed by a status publish.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::dispatcher::Dispatcher;
use super::errors::PipelineError;
use super::registry::StageRegistry;
use super::resolver::PipelineResolver;
use super::retry::{Dispatched, RetryCoordinator};
use super::trigger::{AutoProgressionTrigger, TriggerOutcome};
use super::types::{JobId, JobRecord, PipelineStatus, StageId};
use super::update::{JobUpdate, PayloadField};
use crate::broadcaster::{JobSnapshot, StatusBroadcaster, Subscription, Topic};
use crate::collaborators::CollaboratorSet;
use crate::store::JobStore;

pub struct PipelineManager {
    registry: Arc<StageRegistry>,
    store: Arc<dyn JobStore>,
    broadcaster: Arc<StatusBroadcaster>,
    dispatcher: Arc<Dispatcher>,
    trigger: AutoProgressionTrigger,
    retries: RetryCoordinator,
}

impl PipelineManager {
    pub fn new(
        registry: StageRegistry,
        store: Arc<dyn JobStore>,
        collaborators: CollaboratorSet,
        broadcast_capacity: usize,
    ) -> Self {
        let registry = Arc::new(registry);
        let broadcaster = Arc::new(StatusBroadcaster::new(
            registry.clone(),
            store.clone(),
            broadcast_capacity,
        ));
        let dispatcher = Arc::new(Dispatcher::new(collaborators, broadcaster.clone()));

        for stage in registry.stages() {
            if dispatcher.collaborators().get(stage.id).is_none() {
                warn!(stage = %stage.id, "No collaborator registered; hand-offs will be unavailable");
            }
        }

        Self {
            trigger: AutoProgressionTrigger::new(registry.clone(), store.clone(), dispatcher.clone()),
            retries: RetryCoordinator::new(registry.clone(), store.clone(), dispatcher.clone()),
            registry,
            store,
            broadcaster,
            dispatcher,
        }
    }

    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn broadcaster(&self) -> &Arc<StatusBroadcaster> {
        &self.broadcaster
    }

    /// Register a new content item with every stage not started
    pub async fn create_job(
        &self,
        source_url: impl Into<String>,
        title: Option<String>,
    ) -> Result<JobRecord, PipelineError> {
        let mut record = JobRecord::new(JobId::generate(), source_url);
        record.title = title;
        self.store.insert(record.clone()).await?;
        info!(job_id = %record.id, source_url = %record.source_url, "Job created");
        self.publish(&record);
        Ok(record)
    }

    pub async fn load(&self, job_id: &JobId) -> Result<JobRecord, PipelineError> {
        self.store
            .load(job_id)
            .await?
            .ok_or_else(|| PipelineError::JobNotFound(job_id.clone()))
    }

    pub async fn list_jobs(&self) -> Result<Vec<JobId>, PipelineError> {
        Ok(self.store.list().await?)
    }

    pub async fn status(&self, job_id: &JobId) -> Result<PipelineStatus, PipelineError> {
        let record = self.load(job_id).await?;
        Ok(PipelineResolver::new(&self.registry).status(&record))
    }

    pub async fn snapshot(&self, job_id: &JobId) -> Result<JobSnapshot, PipelineError> {
        let record = self.load(job_id).await?;
        Ok(JobSnapshot::build(record, &self.registry))
    }

    /// Write a collaborator's update and publish the result
    pub async fn record(&self, job_id: &JobId, update: JobUpdate) -> Result<JobRecord, PipelineError> {
        let record = self.store.save(job_id, update).await?;
        self.publish(&record);
        Ok(record)
    }

    /// A collaborator started work on its stage
    pub async fn begin_stage(&self, job_id: &JobId, stage: StageId) -> Result<JobRecord, PipelineError> {
        self.registry.stage_by_id(stage)?;
        self.record(job_id, JobUpdate::new().started(stage)).await
    }

    /// Mark the stage done with its outputs, then let auto-progression run
    pub async fn complete_stage(
        &self,
        job_id: &JobId,
        stage: StageId,
        payload: Vec<PayloadField>,
    ) -> Result<TriggerOutcome, PipelineError> {
        self.registry.stage_by_id(stage)?;
        let mut update = JobUpdate::new().done(stage);
        for field in payload {
            update = update.set(field);
        }
        self.record(job_id, update).await?;
        self.trigger.on_stage_completed(job_id, stage).await
    }

    /// Record a stage failure. Recovery is an explicit retry.
    pub async fn fail_stage(
        &self,
        job_id: &JobId,
        stage: StageId,
        message: impl Into<String>,
    ) -> Result<JobRecord, PipelineError> {
        self.registry.stage_by_id(stage)?;
        let record = self
            .record(job_id, JobUpdate::new().failed(stage, message))
            .await?;
        self.dispatcher.ledger().release_stage(job_id, stage);
        warn!(
            job_id = %job_id,
            stage = %stage,
            error = record.stage(stage).error().unwrap_or_default(),
            "Stage failed"
        );
        Ok(record)
    }

    /// Completion report for a stage whose fields were already written
    pub async fn on_stage_completed(
        &self,
        job_id: &JobId,
        stage: StageId,
    ) -> Result<TriggerOutcome, PipelineError> {
        self.trigger.on_stage_completed(job_id, stage).await
    }

    pub async fn start_stage(
        &self,
        job_id: &JobId,
        stage: StageId,
    ) -> Result<TriggerOutcome, PipelineError> {
        self.trigger.start_stage(job_id, stage).await
    }

    /// Start whatever stage the job is waiting on, if it may run now
    pub async fn start_next(&self, job_id: &JobId) -> Result<TriggerOutcome, PipelineError> {
        let record = self.load(job_id).await?;
        let resolver = PipelineResolver::new(&self.registry);
        match resolver.next_runnable(&record) {
            Some(stage) => match stage.produced_by() {
                Some(produced_by) => Ok(TriggerOutcome::AwaitingProducer {
                    stage: stage.id,
                    produced_by,
                }),
                None => self.trigger.start_stage(job_id, stage.id).await,
            },
            None => match resolver.current_stage(&record) {
                Some(stage) if stage.in_progress(&record) => {
                    Ok(TriggerOutcome::AlreadyInProgress { stage: stage.id })
                }
                _ => Ok(TriggerOutcome::NoNextStage),
            },
        }
    }

    pub async fn retry(&self, job_id: &JobId, stage: StageId) -> Result<Dispatched, PipelineError> {
        let dispatched = self.retries.retry(job_id, stage).await?;
        self.broadcaster.refresh(job_id).await;
        Ok(dispatched)
    }

    pub async fn subscribe(&self, topic: &Topic) -> Result<Subscription, PipelineError> {
        self.broadcaster.subscribe(topic).await
    }

    pub fn in_flight_count(&self) -> usize {
        self.dispatcher.ledger().len()
    }

    /// Wait for outstanding hand-offs. Returns false on timeout.
    pub async fn wait_for_idle(&self, limit: Duration) -> bool {
        self.dispatcher.ledger().wait_idle(limit).await
    }

    fn publish(&self, record: &JobRecord) {
        self.broadcaster
            .publish(&record.id, JobSnapshot::build(record.clone(), &self.registry));
    }
}
