pub mod dispatcher;
pub mod errors;
pub mod manager;
pub mod registry;
pub mod resolver;
pub mod retry;
pub mod trigger;
pub mod types;
pub mod update;

#[cfg(test)]
mod mocks;

pub use dispatcher::{Dispatcher, InFlight, InFlightLedger};
pub use errors::{PipelineError, RegistryError};
pub use manager::PipelineManager;
pub use registry::{DispatchMode, RetryPolicy, Stage, StagePredicate, StageRegistry};
pub use resolver::PipelineResolver;
pub use retry::{Dispatched, RetryCoordinator};
pub use trigger::{AutoProgressionTrigger, TriggerOutcome};
pub use types::{
    present, JobId, JobPayload, JobRecord, PipelineStatus, StageId, StageState, StageStatus,
};
pub use update::{JobUpdate, PayloadField, StagePatch};
