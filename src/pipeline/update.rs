// Partial updates applied read-modify-write by a job store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{JobRecord, StageId, StageState, StageStatus};

/// Field-level patch for one stage. `None` leaves a field untouched;
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StagePatch {
    pub status: Option<StageStatus>,
    pub started_at: Option<Option<DateTime<Utc>>>,
    pub finished_at: Option<Option<DateTime<Utc>>>,
    pub error_message: Option<Option<String>>,
}

/// A single payload field write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum PayloadField {
    Title(String),
    MediaPath(String),
    FrameCount(u32),
    VisualDescription(String),
    Transcript(String),
    SpeechTranscript(String),
    AiSummary(String),
    EnhancedTranscript(String),
    Script(String),
    ScriptGenerated(bool),
    AudioPath(String),
    AudioSynthesized(bool),
    FinalVideoUrl(String),
    RemoteUrl(String),
    SheetSynced(bool),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobUpdate {
    pub stages: Vec<(StageId, StagePatch)>,
    pub payload: Vec<PayloadField>,
}

impl JobUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty() && self.payload.is_empty()
    }

    pub fn stage(mut self, id: StageId, patch: StagePatch) -> Self {
        self.stages.push((id, patch));
        self
    }

    pub fn set(mut self, field: PayloadField) -> Self {
        self.payload.push(field);
        self
    }

    /// Mark a stage in progress, clearing any previous outcome
    pub fn started(self, id: StageId) -> Self {
        self.stage(
            id,
            StagePatch {
                status: Some(StageStatus::InProgress),
                started_at: Some(Some(Utc::now())),
                finished_at: Some(None),
                error_message: Some(None),
            },
        )
    }

    /// Mark a stage done with a finish time and no error
    pub fn done(self, id: StageId) -> Self {
        self.stage(
            id,
            StagePatch {
                status: Some(StageStatus::Done),
                started_at: None,
                finished_at: Some(Some(Utc::now())),
                error_message: Some(None),
            },
        )
    }

    /// Mark a stage failed. A blank message is replaced so the failure
    /// always carries an explanation.
    pub fn failed(self, id: StageId, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            format!("{id} failed without an error message")
        } else {
            message
        };
        self.stage(
            id,
            StagePatch {
                status: Some(StageStatus::Failed),
                started_at: None,
                finished_at: Some(Some(Utc::now())),
                error_message: Some(Some(message)),
            },
        )
    }

    /// Return a stage to not-started with no error or timestamps
    pub fn reset(self, id: StageId) -> Self {
        self.stage(
            id,
            StagePatch {
                status: Some(StageStatus::NotStarted),
                started_at: Some(None),
                finished_at: Some(None),
                error_message: Some(None),
            },
        )
    }

    /// Put a stage back exactly as it was captured
    pub fn restore(self, id: StageId, state: &StageState) -> Self {
        self.stage(
            id,
            StagePatch {
                status: Some(state.status),
                started_at: Some(state.started_at),
                finished_at: Some(state.finished_at),
                error_message: Some(state.error_message.clone()),
            },
        )
    }

    pub fn apply(&self, record: &mut JobRecord) {
        for (id, patch) in &self.stages {
            let state = record.stage_mut(*id);
            if let Some(status) = patch.status {
                state.status = status;
            }
            if let Some(started_at) = patch.started_at {
                state.started_at = started_at;
            }
            if let Some(finished_at) = patch.finished_at {
                state.finished_at = finished_at;
            }
            if let Some(error_message) = &patch.error_message {
                state.error_message = error_message.clone();
            }
        }

        let payload = &mut record.payload;
        for field in &self.payload {
            match field.clone() {
                PayloadField::Title(v) => record.title = Some(v),
                PayloadField::MediaPath(v) => payload.media_path = Some(v),
                PayloadField::FrameCount(v) => payload.frame_count = v,
                PayloadField::VisualDescription(v) => payload.visual_description = Some(v),
                PayloadField::Transcript(v) => payload.transcript = Some(v),
                PayloadField::SpeechTranscript(v) => payload.speech_transcript = Some(v),
                PayloadField::AiSummary(v) => payload.ai_summary = Some(v),
                PayloadField::EnhancedTranscript(v) => payload.enhanced_transcript = Some(v),
                PayloadField::Script(v) => payload.script = Some(v),
                PayloadField::ScriptGenerated(v) => payload.script_generated = v,
                PayloadField::AudioPath(v) => payload.audio_path = Some(v),
                PayloadField::AudioSynthesized(v) => payload.audio_synthesized = v,
                PayloadField::FinalVideoUrl(v) => payload.final_video_url = Some(v),
                PayloadField::RemoteUrl(v) => payload.remote_url = Some(v),
                PayloadField::SheetSynced(v) => payload.sheet_synced = v,
            }
        }

        record.updated_at = Utc::now();
    }
}
