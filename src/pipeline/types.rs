// Core types for the job pipeline: stage ids, per-stage state and job records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::errors::PipelineError;

/// Identifier of a content item moving through the pipeline
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random job id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// The ten pipeline stages, in pipeline order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Download,
    FrameExtraction,
    VisualAnalysis,
    Transcription,
    AiProcessing,
    ScriptGeneration,
    Synthesis,
    FinalVideo,
    CloudUpload,
    SheetSync,
}

impl StageId {
    pub const ALL: [StageId; 10] = [
        StageId::Download,
        StageId::FrameExtraction,
        StageId::VisualAnalysis,
        StageId::Transcription,
        StageId::AiProcessing,
        StageId::ScriptGeneration,
        StageId::Synthesis,
        StageId::FinalVideo,
        StageId::CloudUpload,
        StageId::SheetSync,
    ];

    /// Wire name used in topics, config keys and the CLI
    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::Download => "download",
            StageId::FrameExtraction => "frame_extraction",
            StageId::VisualAnalysis => "visual_analysis",
            StageId::Transcription => "transcription",
            StageId::AiProcessing => "ai_processing",
            StageId::ScriptGeneration => "script_generation",
            StageId::Synthesis => "synthesis",
            StageId::FinalVideo => "final_video",
            StageId::CloudUpload => "cloud_upload",
            StageId::SheetSync => "sheet_sync",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for StageId {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        StageId::ALL
            .iter()
            .copied()
            .find(|id| id.as_str() == wanted)
            .ok_or_else(|| PipelineError::UnknownStage(wanted.to_string()))
    }
}

/// Explicit status a collaborator records against its own stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    NotStarted,
    InProgress,
    Done,
    Failed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageStatus::NotStarted => write!(f, "not_started"),
            StageStatus::InProgress => write!(f, "in_progress"),
            StageStatus::Done => write!(f, "done"),
            StageStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Status, timestamps and error message of a single stage
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StageState {
    #[serde(default)]
    pub status: StageStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_message: Option<String>,
}

static NOT_STARTED: StageState = StageState {
    status: StageStatus::NotStarted,
    started_at: None,
    finished_at: None,
    error_message: None,
};

impl StageState {
    /// Error message, treating whitespace-only messages as absent
    pub fn error(&self) -> Option<&str> {
        self.error_message
            .as_deref()
            .map(str::trim)
            .filter(|msg| !msg.is_empty())
    }
}

/// Stage-specific output fields read by the completion predicates
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobPayload {
    pub media_path: Option<String>,
    pub frame_count: u32,
    pub visual_description: Option<String>,
    /// Transcript pulled from platform captions
    pub transcript: Option<String>,
    /// Transcript produced by the speech-to-text engine
    pub speech_transcript: Option<String>,
    pub ai_summary: Option<String>,
    pub enhanced_transcript: Option<String>,
    pub script: Option<String>,
    pub script_generated: bool,
    pub audio_path: Option<String>,
    pub audio_synthesized: bool,
    pub final_video_url: Option<String>,
    pub remote_url: Option<String>,
    pub sheet_synced: bool,
}

/// True when an optional text field holds something other than whitespace
pub fn present(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|value| !value.trim().is_empty())
}

/// Persisted per-item record tracking every stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub source_url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub stages: BTreeMap<StageId, StageState>,
    #[serde(default)]
    pub payload: JobPayload,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Create a record with every stage not started
    pub fn new(id: JobId, source_url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            source_url: source_url.into(),
            title: None,
            stages: StageId::ALL
                .iter()
                .map(|id| (*id, StageState::default()))
                .collect(),
            payload: JobPayload::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// State of a stage; stages missing from a stored row read as not started
    pub fn stage(&self, id: StageId) -> &StageState {
        self.stages.get(&id).unwrap_or(&NOT_STARTED)
    }

    pub fn stage_mut(&mut self, id: StageId) -> &mut StageState {
        self.stages.entry(id).or_default()
    }

    pub fn status_of(&self, id: StageId) -> StageStatus {
        self.stage(id).status
    }

    pub fn with_status(mut self, id: StageId, status: StageStatus) -> Self {
        let state = self.stage_mut(id);
        state.status = status;
        if status == StageStatus::Failed && state.error().is_none() {
            state.error_message = Some("stage failed".to_string());
        }
        self
    }
}

/// Derived view of a job's progress, computed fresh from a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub current_stage: Option<StageId>,
    pub completed_stages: Vec<StageId>,
    pub in_progress_stages: Vec<StageId>,
    pub pending_stages: Vec<StageId>,
    pub failed_stages: Vec<StageId>,
    pub progress_percent: f64,
    pub total_stages: usize,
    pub completed_count: usize,
}

impl PipelineStatus {
    pub fn is_finished(&self) -> bool {
        self.total_stages > 0 && self.completed_count == self.total_stages
    }
}
