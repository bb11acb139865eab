// Clipflow Library - content pipeline orchestration
// This exposes the core components for testing and integration

pub mod broadcaster;
pub mod cli;
pub mod collaborators;
pub mod config;
pub mod database;
pub mod observability;
pub mod pipeline;
pub mod shutdown;
pub mod store;
pub mod telemetry;

// Re-export key types for easy access
pub use broadcaster::{JobSnapshot, StatusBroadcaster, Subscription, Topic};
pub use collaborators::{CollaboratorSet, CommandCollaborator, StageCollaborator, StageCommand};
pub use config::{config, init_config, ClipflowConfig};
#[cfg(feature = "database")]
pub use database::SqliteJobStore;
pub use observability::{pipeline_metrics, OperationTimer, PipelineMetrics};
pub use pipeline::{
    Dispatched, JobId, JobRecord, JobUpdate, PayloadField, PipelineError, PipelineManager,
    PipelineResolver, PipelineStatus, Stage, StageId, StageRegistry, StageStatus, TriggerOutcome,
};
pub use shutdown::ShutdownCoordinator;
pub use store::{FileJobStore, JobStore, MemoryJobStore, StoreError};
pub use telemetry::{create_dispatch_span, generate_correlation_id, init_telemetry, shutdown_telemetry};
