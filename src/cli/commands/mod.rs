use anyhow::Result;
use std::sync::Arc;
use tracing::warn;

use crate::collaborators::{CollaboratorSet, CommandCollaborator};
use crate::config::{ClipflowConfig, StoreBackend, StoreConfig};
use crate::pipeline::{PayloadField, PipelineManager, StageRegistry, TriggerOutcome};
use crate::shutdown::ShutdownCoordinator;
use crate::store::{FileJobStore, JobStore, MemoryJobStore};

pub mod jobs;
pub mod stage;
pub mod watch;

#[allow(async_fn_in_trait)]
pub trait Command {
    async fn execute(&self) -> Result<()>;
}

/// Open the configured store
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn JobStore>> {
    match config.backend {
        StoreBackend::Memory => {
            warn!("Memory store selected; jobs will not outlive this process");
            Ok(Arc::new(MemoryJobStore::new()))
        }
        StoreBackend::File => Ok(Arc::new(FileJobStore::new(&config.path))),
        #[cfg(feature = "database")]
        StoreBackend::Sqlite => Ok(Arc::new(
            crate::database::SqliteJobStore::connect(&config.url)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to open database {}: {e}", config.url))?,
        )),
        #[cfg(not(feature = "database"))]
        StoreBackend::Sqlite => Err(anyhow::anyhow!(
            "The sqlite store requires clipflow to be built with the `database` feature"
        )),
    }
}

/// One `CommandCollaborator` per configured `[stages.<id>]` hook
pub fn configured_collaborators(config: &ClipflowConfig) -> CollaboratorSet {
    config
        .stages
        .iter()
        .fold(CollaboratorSet::new(), |set, (stage, command)| {
            set.with(
                *stage,
                Arc::new(CommandCollaborator::new(*stage, command.clone())),
            )
        })
}

pub async fn build_manager(config: &ClipflowConfig) -> Result<Arc<PipelineManager>> {
    let store = open_store(&config.store).await?;
    Ok(Arc::new(PipelineManager::new(
        StageRegistry::standard(),
        store,
        configured_collaborators(config),
        config.broadcast.capacity,
    )))
}

/// Run `f` against a manager built from the global configuration, then
/// drain any stage it handed off before the process exits
pub async fn with_pipeline<F, Fut, R>(f: F) -> Result<R>
where
    F: FnOnce(Arc<PipelineManager>) -> Fut,
    Fut: std::future::Future<Output = Result<R>>,
{
    let config = crate::config::config()?;
    let manager = build_manager(config).await?;
    let result = f(manager.clone()).await;

    ShutdownCoordinator::new(manager, config.shutdown.drain_timeout())
        .shutdown()
        .await?;
    result
}

/// Parse `field=value` into a payload write
pub fn parse_payload_field(raw: &str) -> Result<PayloadField, String> {
    let (field, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected FIELD=VALUE, got '{raw}'"))?;
    let value = value.to_string();
    let flag = |v: &str| {
        v.parse::<bool>()
            .map_err(|_| format!("{field} expects true or false, got '{v}'"))
    };

    Ok(match field.trim() {
        "title" => PayloadField::Title(value),
        "media_path" => PayloadField::MediaPath(value),
        "frame_count" => PayloadField::FrameCount(
            value
                .parse()
                .map_err(|_| format!("frame_count expects a number, got '{value}'"))?,
        ),
        "visual_description" => PayloadField::VisualDescription(value),
        "transcript" => PayloadField::Transcript(value),
        "speech_transcript" => PayloadField::SpeechTranscript(value),
        "ai_summary" => PayloadField::AiSummary(value),
        "enhanced_transcript" => PayloadField::EnhancedTranscript(value),
        "script" => PayloadField::Script(value),
        "script_generated" => PayloadField::ScriptGenerated(flag(&value)?),
        "audio_path" => PayloadField::AudioPath(value),
        "audio_synthesized" => PayloadField::AudioSynthesized(flag(&value)?),
        "final_video_url" => PayloadField::FinalVideoUrl(value),
        "remote_url" => PayloadField::RemoteUrl(value),
        "sheet_synced" => PayloadField::SheetSynced(flag(&value)?),
        other => return Err(format!("unknown payload field '{other}'")),
    })
}

pub fn describe_outcome(outcome: &TriggerOutcome) -> String {
    match outcome {
        TriggerOutcome::Dispatched { stage, ticket } => {
            format!("🚀 Dispatched {stage} (ticket {ticket})")
        }
        TriggerOutcome::NoNextStage => "🏁 Pipeline finished; nothing left to dispatch".to_string(),
        TriggerOutcome::NotAutoDispatchable { stage } => {
            format!("⏸️  Next stage {stage} waits for a manual start")
        }
        TriggerOutcome::AwaitingProducer { stage, produced_by } => {
            format!("⏸️  {stage} is written by {produced_by} and is still missing")
        }
        TriggerOutcome::StaleCompletion { stage } => {
            format!("⚠️  {stage} is not complete on the record; nothing dispatched")
        }
        TriggerOutcome::AlreadyComplete { stage } => format!("✅ {stage} is already complete"),
        TriggerOutcome::AlreadyInProgress { stage } => format!("🔄 {stage} is already running"),
        TriggerOutcome::Blocked { stage, waiting_on } => {
            format!("⛔ {stage} is blocked until {waiting_on} completes")
        }
        TriggerOutcome::DispatchInFlight { stage, in_flight } => {
            format!("⏳ {stage} not dispatched; {in_flight} is still in flight")
        }
        TriggerOutcome::Unavailable { stage, reason } => {
            format!("❌ Could not hand off {stage}: {reason}")
        }
    }
}
