// Test doubles for stage collaborators - in-memory, no external processes

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Semaphore};

use crate::collaborators::StageCollaborator;
use crate::pipeline::{JobId, JobUpdate, StageId};
use crate::store::JobStore;

/// Collaborator that records every hand-off it receives.
///
/// On `enter` it waits for the gate (if any), marks its stage in progress
/// in the store, and reports `(job, stage)` on the channel.
pub struct RecordingCollaborator {
    pub name: String,
    pub stage: StageId,
    pub store: Arc<dyn JobStore>,
    pub entered: Mutex<Vec<JobId>>,
    pub gate: Option<Arc<Semaphore>>,
    pub available: bool,
    pub fail_with: Option<String>,
    events: mpsc::UnboundedSender<(JobId, StageId)>,
}

impl RecordingCollaborator {
    pub fn new(
        stage: StageId,
        store: Arc<dyn JobStore>,
    ) -> (Self, mpsc::UnboundedReceiver<(JobId, StageId)>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let collaborator = Self {
            name: format!("Recording.{stage}"),
            stage,
            store,
            entered: Mutex::new(Vec::new()),
            gate: None,
            available: true,
            fail_with: None,
            events,
        };
        (collaborator, receiver)
    }

    /// Hold every `enter` until a permit is added to the returned semaphore
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(gate.clone());
        (self, gate)
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.fail_with = Some(message.to_string());
        self
    }

    pub fn entered_count(&self) -> usize {
        self.entered.lock().map(|e| e.len()).unwrap_or(0)
    }
}

#[async_trait]
impl StageCollaborator for RecordingCollaborator {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn enter(&self, job_id: JobId) -> Result<()> {
        if let Some(gate) = &self.gate {
            gate.acquire().await?.forget();
        }
        self.entered
            .lock()
            .map_err(|_| anyhow!("entered list poisoned"))?
            .push(job_id.clone());
        self.store
            .save(&job_id, JobUpdate::new().started(self.stage))
            .await?;
        let _ = self.events.send((job_id, self.stage));

        match &self.fail_with {
            Some(message) => Err(anyhow!(message.clone())),
            None => Ok(()),
        }
    }
}
