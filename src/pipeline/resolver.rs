// Pure functions deriving pipeline position and progress from a job record.
// Nothing here is cached; every call reads the record it is given.

use super::registry::{Stage, StageRegistry};
use super::types::{JobRecord, PipelineStatus, StageId, StageStatus};

/// Stateless view over a registry
#[derive(Debug, Clone, Copy)]
pub struct PipelineResolver<'a> {
    registry: &'a StageRegistry,
}

impl<'a> PipelineResolver<'a> {
    pub fn new(registry: &'a StageRegistry) -> Self {
        Self { registry }
    }

    /// True only if every stage before `stage` is complete.
    /// Unregistered stages have no predecessors to satisfy and never proceed.
    pub fn can_proceed_to(&self, record: &JobRecord, stage: StageId) -> bool {
        for candidate in self.registry.stages() {
            if candidate.id == stage {
                return true;
            }
            if !candidate.complete(record) {
                return false;
            }
        }
        false
    }

    /// Current stage: the first in-progress stage, else the earliest gap
    pub fn current_stage(&self, record: &JobRecord) -> Option<&'a Stage> {
        self.registry
            .stages()
            .iter()
            .find(|s| s.in_progress(record))
            .or_else(|| self.registry.first_incomplete_stage(record))
    }

    /// The stage an operator could start right now, if any
    pub fn next_runnable(&self, record: &JobRecord) -> Option<&'a Stage> {
        let stage = self.registry.first_incomplete_stage(record)?;
        if stage.in_progress(record) || !self.can_proceed_to(record, stage.id) {
            return None;
        }
        Some(stage)
    }

    pub fn status(&self, record: &JobRecord) -> PipelineStatus {
        let mut current = None;
        let mut completed = Vec::new();
        let mut in_progress = Vec::new();
        let mut pending = Vec::new();
        let mut failed = Vec::new();

        for stage in self.registry.stages() {
            if stage.in_progress(record) {
                current.get_or_insert(stage.id);
                in_progress.push(stage.id);
            } else if stage.complete(record) {
                completed.push(stage.id);
            } else if stage.status(record) == StageStatus::Failed {
                failed.push(stage.id);
            } else {
                pending.push(stage.id);
            }
        }

        if current.is_none() {
            current = self.registry.first_incomplete_stage(record).map(|s| s.id);
        }

        let total_stages = self.registry.len();
        let completed_count = completed.len();
        let progress_percent = if total_stages == 0 {
            0.0
        } else {
            completed_count as f64 / total_stages as f64 * 100.0
        };

        PipelineStatus {
            current_stage: current,
            completed_stages: completed,
            in_progress_stages: in_progress,
            pending_stages: pending,
            failed_stages: failed,
            progress_percent,
            total_stages,
            completed_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::JobId;

    fn fresh() -> JobRecord {
        JobRecord::new(JobId::from("job-1"), "https://example.com/v/1")
    }

    fn with_done(stages: &[StageId]) -> JobRecord {
        stages
            .iter()
            .fold(fresh(), |r, id| r.with_status(*id, StageStatus::Done))
    }

    #[test]
    fn fresh_job_starts_at_download() {
        let registry = StageRegistry::standard();
        let status = PipelineResolver::new(&registry).status(&fresh());

        assert_eq!(status.current_stage, Some(StageId::Download));
        assert_eq!(status.progress_percent, 0.0);
        assert_eq!(status.completed_count, 0);
        assert_eq!(status.pending_stages.len(), 10);
        assert_eq!(status.total_stages, 10);
    }

    #[test]
    fn seven_of_ten_done_is_seventy_percent() {
        let registry = StageRegistry::standard();
        let record = with_done(&StageId::ALL[..7]);
        let status = PipelineResolver::new(&registry).status(&record);

        assert_eq!(status.completed_count, 7);
        assert_eq!(status.completed_stages.len(), status.completed_count);
        assert_eq!(status.progress_percent, 70.0);
        assert_eq!(status.current_stage, Some(StageId::FinalVideo));
    }

    #[test]
    fn everything_done_has_no_current_stage() {
        let registry = StageRegistry::standard();
        let status = PipelineResolver::new(&registry).status(&with_done(&StageId::ALL));
        assert_eq!(status.current_stage, None);
        assert_eq!(status.progress_percent, 100.0);
        assert!(status.is_finished());
    }

    #[test]
    fn in_progress_stage_wins_current() {
        let registry = StageRegistry::standard();
        let record = with_done(&[StageId::Download])
            .with_status(StageId::Transcription, StageStatus::InProgress);
        let status = PipelineResolver::new(&registry).status(&record);

        assert_eq!(status.current_stage, Some(StageId::Transcription));
        assert_eq!(status.in_progress_stages, vec![StageId::Transcription]);
    }

    #[test]
    fn first_of_several_in_progress_is_current() {
        let registry = StageRegistry::standard();
        let record = fresh()
            .with_status(StageId::Synthesis, StageStatus::InProgress)
            .with_status(StageId::FrameExtraction, StageStatus::InProgress);
        let status = PipelineResolver::new(&registry).status(&record);

        assert_eq!(status.current_stage, Some(StageId::FrameExtraction));
        assert_eq!(status.in_progress_stages.len(), 2);
    }

    #[test]
    fn failed_stage_is_classified_and_current_when_idle() {
        let registry = StageRegistry::standard();
        let record = with_done(&[StageId::Download, StageId::FrameExtraction, StageId::VisualAnalysis])
            .with_status(StageId::Transcription, StageStatus::Failed);
        let status = PipelineResolver::new(&registry).status(&record);

        assert_eq!(status.failed_stages, vec![StageId::Transcription]);
        assert!(!status.pending_stages.contains(&StageId::Transcription));
        assert_eq!(status.current_stage, Some(StageId::Transcription));
    }

    #[test]
    fn can_proceed_requires_every_predecessor() {
        let registry = StageRegistry::standard();
        let resolver = PipelineResolver::new(&registry);
        let record = with_done(&[StageId::Download, StageId::FrameExtraction]);

        assert!(resolver.can_proceed_to(&record, StageId::Download));
        assert!(resolver.can_proceed_to(&record, StageId::VisualAnalysis));
        assert!(!resolver.can_proceed_to(&record, StageId::Transcription));

        // A later completion does not fill the gap.
        let record = record.with_status(StageId::Transcription, StageStatus::Done);
        assert!(!resolver.can_proceed_to(&record, StageId::AiProcessing));
    }

    #[test]
    fn next_runnable_skips_running_stage() {
        let registry = StageRegistry::standard();
        let resolver = PipelineResolver::new(&registry);

        let record = with_done(&[StageId::Download]);
        assert_eq!(
            resolver.next_runnable(&record).map(|s| s.id),
            Some(StageId::FrameExtraction)
        );

        let record = record.with_status(StageId::FrameExtraction, StageStatus::InProgress);
        assert!(resolver.next_runnable(&record).is_none());
    }
}
