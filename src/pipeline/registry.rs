//! Stage registry
//!
//! The pipeline is a fixed, declarative table of [`Stage`] records linked by
//! their `next` field. [`StageRegistry::standard`] builds the production
//! table once at startup; custom tables are validated by [`StageRegistry::new`].

use super::errors::{PipelineError, RegistryError};
use super::types::{present, JobPayload, JobRecord, StageId, StageStatus};

/// Predicate evaluated against a job record
pub type StagePredicate = fn(&JobRecord) -> bool;

/// How a stage may be retried by an operator
#[derive(Debug, Clone, Copy)]
pub enum RetryPolicy {
    /// Only a stage whose status is `failed` may be retried
    OnFailure,
    /// A failed stage, or any stage not in progress whose prerequisite holds
    AfterPrerequisite {
        requirement: &'static str,
        ready: StagePredicate,
    },
    /// Produced as a side effect of another stage's run
    NotIndependent { produced_by: StageId },
}

/// How a stage is started once its predecessor completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Waits for an operator start
    Manual,
    /// Handed to its collaborator as soon as the predecessor completes
    Auto,
    /// Written by another stage's run and never dispatched on its own
    Implicit { produced_by: StageId },
}

impl DispatchMode {
    pub fn label(&self) -> &'static str {
        match self {
            DispatchMode::Manual => "manual",
            DispatchMode::Auto => "auto",
            DispatchMode::Implicit { .. } => "implicit",
        }
    }
}

/// One ordered step of the pipeline
#[derive(Debug, Clone, Copy)]
pub struct Stage {
    pub id: StageId,
    pub display_name: &'static str,
    pub is_complete: StagePredicate,
    pub is_in_progress: StagePredicate,
    pub next: Option<StageId>,
    pub dispatch: DispatchMode,
    pub retry: RetryPolicy,
}

impl Stage {
    pub fn complete(&self, record: &JobRecord) -> bool {
        (self.is_complete)(record)
    }

    pub fn in_progress(&self, record: &JobRecord) -> bool {
        (self.is_in_progress)(record)
    }

    pub fn status(&self, record: &JobRecord) -> StageStatus {
        record.status_of(self.id)
    }

    /// The stage whose run writes this one, for implicit stages
    pub fn produced_by(&self) -> Option<StageId> {
        match self.dispatch {
            DispatchMode::Implicit { produced_by } => Some(produced_by),
            DispatchMode::Manual | DispatchMode::Auto => None,
        }
    }
}

// A stage is complete when marked done, or when its payload is present and
// nobody is re-running or has failed it.
fn completed_by(record: &JobRecord, id: StageId, payload_ready: fn(&JobPayload) -> bool) -> bool {
    match record.status_of(id) {
        StageStatus::Done => true,
        StageStatus::NotStarted => payload_ready(&record.payload),
        StageStatus::InProgress | StageStatus::Failed => false,
    }
}

macro_rules! stage_predicates {
    ($($complete:ident, $running:ident => $id:expr, |$p:ident| $ready:expr;)*) => {
        $(
            fn $complete(record: &JobRecord) -> bool {
                completed_by(record, $id, |$p| $ready)
            }

            fn $running(record: &JobRecord) -> bool {
                record.status_of($id) == StageStatus::InProgress
            }
        )*
    };
}

stage_predicates! {
    download_complete, download_running => StageId::Download, |p| present(&p.media_path);
    frames_complete, frames_running => StageId::FrameExtraction, |p| p.frame_count > 0;
    vision_complete, vision_running => StageId::VisualAnalysis, |p| present(&p.visual_description);
    transcription_complete, transcription_running => StageId::Transcription,
        |p| present(&p.transcript) || present(&p.speech_transcript);
    ai_complete, ai_running => StageId::AiProcessing,
        |p| present(&p.ai_summary) && present(&p.enhanced_transcript);
    script_complete, script_running => StageId::ScriptGeneration, |p| p.script_generated;
    synthesis_complete, synthesis_running => StageId::Synthesis, |p| p.audio_synthesized;
    final_video_complete, final_video_running => StageId::FinalVideo, |p| present(&p.final_video_url);
    upload_complete, upload_running => StageId::CloudUpload, |p| present(&p.remote_url);
    sheet_complete, sheet_running => StageId::SheetSync, |p| p.sheet_synced;
}

fn has_frames(record: &JobRecord) -> bool {
    record.payload.frame_count > 0
}

fn has_transcript(record: &JobRecord) -> bool {
    present(&record.payload.transcript) || present(&record.payload.speech_transcript)
}

fn has_script(record: &JobRecord) -> bool {
    present(&record.payload.script)
}

fn has_audio(record: &JobRecord) -> bool {
    record.payload.audio_synthesized
}

const STANDARD_STAGES: [Stage; 10] = [
    Stage {
        id: StageId::Download,
        display_name: "Download",
        is_complete: download_complete,
        is_in_progress: download_running,
        next: Some(StageId::FrameExtraction),
        dispatch: DispatchMode::Manual,
        retry: RetryPolicy::OnFailure,
    },
    Stage {
        id: StageId::FrameExtraction,
        display_name: "Frame Extraction",
        is_complete: frames_complete,
        is_in_progress: frames_running,
        next: Some(StageId::VisualAnalysis),
        dispatch: DispatchMode::Manual,
        retry: RetryPolicy::OnFailure,
    },
    Stage {
        id: StageId::VisualAnalysis,
        display_name: "Visual Analysis",
        is_complete: vision_complete,
        is_in_progress: vision_running,
        next: Some(StageId::Transcription),
        dispatch: DispatchMode::Manual,
        retry: RetryPolicy::AfterPrerequisite {
            requirement: "extracted frames",
            ready: has_frames,
        },
    },
    Stage {
        id: StageId::Transcription,
        display_name: "Transcription",
        is_complete: transcription_complete,
        is_in_progress: transcription_running,
        next: Some(StageId::AiProcessing),
        dispatch: DispatchMode::Auto,
        retry: RetryPolicy::OnFailure,
    },
    Stage {
        id: StageId::AiProcessing,
        display_name: "AI Processing",
        is_complete: ai_complete,
        is_in_progress: ai_running,
        next: Some(StageId::ScriptGeneration),
        dispatch: DispatchMode::Auto,
        retry: RetryPolicy::AfterPrerequisite {
            requirement: "a transcript",
            ready: has_transcript,
        },
    },
    Stage {
        id: StageId::ScriptGeneration,
        display_name: "Script Generation",
        is_complete: script_complete,
        is_in_progress: script_running,
        next: Some(StageId::Synthesis),
        dispatch: DispatchMode::Implicit {
            produced_by: StageId::AiProcessing,
        },
        retry: RetryPolicy::NotIndependent {
            produced_by: StageId::AiProcessing,
        },
    },
    Stage {
        id: StageId::Synthesis,
        display_name: "Speech Synthesis",
        is_complete: synthesis_complete,
        is_in_progress: synthesis_running,
        next: Some(StageId::FinalVideo),
        dispatch: DispatchMode::Auto,
        retry: RetryPolicy::AfterPrerequisite {
            requirement: "a generated script",
            ready: has_script,
        },
    },
    Stage {
        id: StageId::FinalVideo,
        display_name: "Final Video",
        is_complete: final_video_complete,
        is_in_progress: final_video_running,
        next: Some(StageId::CloudUpload),
        dispatch: DispatchMode::Auto,
        retry: RetryPolicy::AfterPrerequisite {
            requirement: "synthesized audio",
            ready: has_audio,
        },
    },
    Stage {
        id: StageId::CloudUpload,
        display_name: "Cloud Upload",
        is_complete: upload_complete,
        is_in_progress: upload_running,
        next: Some(StageId::SheetSync),
        dispatch: DispatchMode::Implicit {
            produced_by: StageId::FinalVideo,
        },
        retry: RetryPolicy::NotIndependent {
            produced_by: StageId::FinalVideo,
        },
    },
    Stage {
        id: StageId::SheetSync,
        display_name: "Sheet Sync",
        is_complete: sheet_complete,
        is_in_progress: sheet_running,
        next: None,
        dispatch: DispatchMode::Implicit {
            produced_by: StageId::FinalVideo,
        },
        retry: RetryPolicy::NotIndependent {
            produced_by: StageId::FinalVideo,
        },
    },
];

/// Immutable ordered set of stages
#[derive(Debug, Clone)]
pub struct StageRegistry {
    stages: Vec<Stage>,
}

impl StageRegistry {
    /// Validate a custom table: ids unique and each `next` pointing at the
    /// following entry, with the last entry terminal
    pub fn new(stages: Vec<Stage>) -> Result<Self, RegistryError> {
        if stages.is_empty() {
            return Err(RegistryError::Empty);
        }

        for (i, stage) in stages.iter().enumerate() {
            if stages[..i].iter().any(|s| s.id == stage.id) {
                return Err(RegistryError::Duplicate(stage.id));
            }
        }

        for stage in &stages {
            let retry_producer = match stage.retry {
                RetryPolicy::NotIndependent { produced_by } => Some(produced_by),
                RetryPolicy::OnFailure | RetryPolicy::AfterPrerequisite { .. } => None,
            };
            if stage.produced_by() != retry_producer {
                return Err(RegistryError::ProducerMismatch(stage.id));
            }
        }

        for (i, stage) in stages.iter().enumerate() {
            let expected = stages.get(i + 1).map(|s| s.id);
            if stage.next != expected {
                return Err(RegistryError::BrokenChain {
                    stage: stage.id,
                    expected,
                    found: stage.next,
                });
            }
        }

        Ok(Self { stages })
    }

    /// The production ten-stage pipeline
    pub fn standard() -> Self {
        Self {
            stages: STANDARD_STAGES.to_vec(),
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn position(&self, id: StageId) -> Option<usize> {
        self.stages.iter().position(|s| s.id == id)
    }

    pub fn stage_by_id(&self, id: StageId) -> Result<&Stage, PipelineError> {
        self.stages
            .iter()
            .find(|s| s.id == id)
            .ok_or(PipelineError::StageNotRegistered(id))
    }

    pub fn next_stage(&self, id: StageId) -> Option<&Stage> {
        let next = self.stage_by_id(id).ok()?.next?;
        self.stage_by_id(next).ok()
    }

    pub fn previous_stage(&self, id: StageId) -> Option<&Stage> {
        self.stages.iter().find(|s| s.next == Some(id))
    }

    /// The earliest stage whose completion predicate is false
    pub fn first_incomplete_stage(&self, record: &JobRecord) -> Option<&Stage> {
        self.stages.iter().find(|s| !s.complete(record))
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
