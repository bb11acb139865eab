//! Stage collaborators
//!
//! A collaborator owns the real work of one or more stages (fetching media,
//! transcribing, rendering audio...). The pipeline only hands a job id to
//! [`StageCollaborator::enter`]; the collaborator writes its own stage fields
//! and reports completion back through the pipeline manager.

mod command;

pub use command::{CommandCollaborator, StageCommand};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use crate::pipeline::{JobId, StageId};

/// Entry point of the component that owns a stage
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait StageCollaborator: Send + Sync {
    /// Name used in logs, e.g. `Transcriber.transcribe`
    fn name(&self) -> String;

    /// Whether a hand-off can currently be accepted
    fn is_available(&self) -> bool {
        true
    }

    /// Run the stage for a job. Called on a detached task.
    async fn enter(&self, job_id: JobId) -> anyhow::Result<()>;
}

/// Maps each stage to the collaborator that owns it
#[derive(Clone, Default)]
pub struct CollaboratorSet {
    owners: HashMap<StageId, Arc<dyn StageCollaborator>>,
}

impl CollaboratorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, stage: StageId, collaborator: Arc<dyn StageCollaborator>) {
        self.owners.insert(stage, collaborator);
    }

    pub fn with(mut self, stage: StageId, collaborator: Arc<dyn StageCollaborator>) -> Self {
        self.register(stage, collaborator);
        self
    }

    pub fn get(&self, stage: StageId) -> Option<Arc<dyn StageCollaborator>> {
        self.owners.get(&stage).cloned()
    }

    pub fn stages(&self) -> Vec<StageId> {
        let mut stages: Vec<_> = self.owners.keys().copied().collect();
        stages.sort();
        stages
    }
}

impl std::fmt::Debug for CollaboratorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for stage in self.stages() {
            if let Some(owner) = self.owners.get(&stage) {
                map.entry(&stage.as_str(), &owner.name());
            }
        }
        map.finish()
    }
}
