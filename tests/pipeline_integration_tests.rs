// End-to-end pipeline tests through the public API
// Simulated stage workers report back the way external collaborators do

use async_trait::async_trait;
use clipflow::{
    CollaboratorSet, FileJobStore, JobId, JobStore, MemoryJobStore, PayloadField,
    PipelineManager, StageCollaborator, StageId, StageRegistry, StageStatus, Topic,
    TriggerOutcome,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Hands every job it receives to the test's driver loop
struct SimulatedWorker {
    stage: StageId,
    events: mpsc::UnboundedSender<(JobId, StageId)>,
}

#[async_trait]
impl StageCollaborator for SimulatedWorker {
    fn name(&self) -> String {
        format!("Simulated.{}", self.stage)
    }

    async fn enter(&self, job_id: JobId) -> anyhow::Result<()> {
        self.events.send((job_id, self.stage))?;
        Ok(())
    }
}

fn workers() -> (CollaboratorSet, mpsc::UnboundedReceiver<(JobId, StageId)>) {
    let (events, receiver) = mpsc::unbounded_channel();
    let set = StageId::ALL.iter().fold(CollaboratorSet::new(), |set, stage| {
        set.with(
            *stage,
            Arc::new(SimulatedWorker {
                stage: *stage,
                events: events.clone(),
            }),
        )
    });
    (set, receiver)
}

// What each worker writes; ai_processing also writes the script and
// final_video also uploads and syncs
fn output_of(stage: StageId) -> Vec<PayloadField> {
    match stage {
        StageId::Download => vec![PayloadField::MediaPath("/media/clip.mp4".into())],
        StageId::FrameExtraction => vec![PayloadField::FrameCount(48)],
        StageId::VisualAnalysis => {
            vec![PayloadField::VisualDescription("A chef plating pasta".into())]
        }
        StageId::Transcription => vec![PayloadField::Transcript("today we cook".into())],
        StageId::AiProcessing => vec![
            PayloadField::AiSummary("Cooking demo".into()),
            PayloadField::EnhancedTranscript("Today, we cook.".into()),
            PayloadField::Script("Scene 1: the kitchen".into()),
            PayloadField::ScriptGenerated(true),
        ],
        StageId::ScriptGeneration => vec![
            PayloadField::Script("Scene 1: the kitchen".into()),
            PayloadField::ScriptGenerated(true),
        ],
        StageId::Synthesis => vec![
            PayloadField::AudioPath("/media/voice.wav".into()),
            PayloadField::AudioSynthesized(true),
        ],
        StageId::FinalVideo => vec![
            PayloadField::FinalVideoUrl("https://cdn/final.mp4".into()),
            PayloadField::RemoteUrl("https://drive/final.mp4".into()),
            PayloadField::SheetSynced(true),
        ],
        StageId::CloudUpload => vec![PayloadField::RemoteUrl("https://drive/final.mp4".into())],
        StageId::SheetSync => vec![PayloadField::SheetSynced(true)],
    }
}

#[tokio::test]
async fn job_runs_through_every_stage() {
    let (collaborators, mut events) = workers();
    let manager = PipelineManager::new(
        StageRegistry::standard(),
        Arc::new(MemoryJobStore::new()),
        collaborators,
        256,
    );
    let job = manager
        .create_job("https://example.com/v/42", None)
        .await
        .unwrap()
        .id;
    let mut observer = manager.subscribe(&Topic::Job(job.clone())).await.unwrap();

    assert!(manager.start_next(&job).await.unwrap().dispatched());

    let mut order = Vec::new();
    let mut manual_starts = 0;
    loop {
        let (id, stage) = timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("pipeline stalled")
            .unwrap();
        assert_eq!(id, job);
        order.push(stage);

        manager.begin_stage(&job, stage).await.unwrap();
        match manager.complete_stage(&job, stage, output_of(stage)).await.unwrap() {
            TriggerOutcome::Dispatched { .. } => {}
            TriggerOutcome::NotAutoDispatchable { .. } => {
                manual_starts += 1;
                assert!(manager.start_next(&job).await.unwrap().dispatched());
            }
            TriggerOutcome::NoNextStage => break,
            other => panic!("unexpected outcome after {stage}: {other:?}"),
        }
    }

    let dispatched: Vec<_> = StageId::ALL
        .iter()
        .copied()
        .filter(|id| {
            !matches!(
                id,
                StageId::ScriptGeneration | StageId::CloudUpload | StageId::SheetSync
            )
        })
        .collect();
    assert_eq!(order, dispatched);
    // frame extraction and visual analysis wait for an explicit start
    assert_eq!(manual_starts, 2);

    let status = manager.status(&job).await.unwrap();
    assert!(status.is_finished());
    assert_eq!(status.progress_percent, 100.0);
    assert_eq!(status.current_stage, None);
    assert!(manager.wait_for_idle(Duration::from_secs(2)).await);

    let mut seen = 0;
    let mut finished = false;
    while let Ok(Some(snapshot)) = timeout(Duration::from_millis(100), observer.recv()).await {
        seen += 1;
        finished |= snapshot.status.is_finished();
    }
    assert!(seen > dispatched.len());
    assert!(finished);
}

#[tokio::test]
async fn failed_stage_is_visible_then_recovered_by_retry() {
    let (collaborators, mut events) = workers();
    let manager = PipelineManager::new(
        StageRegistry::standard(),
        Arc::new(MemoryJobStore::new()),
        collaborators,
        64,
    );
    let job = manager.create_job("https://example.com/v/7", None).await.unwrap().id;
    let mut all = manager.subscribe(&Topic::AllJobs).await.unwrap();

    for stage in [StageId::Download, StageId::FrameExtraction, StageId::VisualAnalysis] {
        manager
            .complete_stage(&job, stage, output_of(stage))
            .await
            .unwrap();
    }
    manager
        .fail_stage(&job, StageId::Transcription, "speech service timed out")
        .await
        .unwrap();

    let status = manager.status(&job).await.unwrap();
    assert_eq!(status.failed_stages, vec![StageId::Transcription]);
    assert_eq!(status.current_stage, Some(StageId::Transcription));

    let mut saw_failure = false;
    while let Ok(Some(snapshot)) = timeout(Duration::from_millis(100), all.recv()).await {
        saw_failure |= snapshot.status.failed_stages.contains(&StageId::Transcription);
    }
    assert!(saw_failure);

    manager.retry(&job, StageId::Transcription).await.unwrap();
    let (_, stage) = timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stage, StageId::Transcription);

    let outcome = manager
        .complete_stage(&job, StageId::Transcription, output_of(StageId::Transcription))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        TriggerOutcome::Dispatched {
            stage: StageId::AiProcessing,
            ..
        }
    ));
    let record = manager.load(&job).await.unwrap();
    assert!(record.stage(StageId::Transcription).error().is_none());
}

#[tokio::test]
async fn file_store_keeps_progress_across_restarts() {
    let dir = TempDir::new().unwrap();
    let job = {
        let manager = PipelineManager::new(
            StageRegistry::standard(),
            Arc::new(FileJobStore::new(dir.path())),
            CollaboratorSet::new(),
            8,
        );
        let job = manager.create_job("https://example.com/v/3", None).await.unwrap().id;
        manager
            .complete_stage(&job, StageId::Download, output_of(StageId::Download))
            .await
            .unwrap();
        job
    };

    let store = Arc::new(FileJobStore::new(dir.path()));
    assert_eq!(store.list().await.unwrap(), vec![job.clone()]);
    let manager = PipelineManager::new(StageRegistry::standard(), store, CollaboratorSet::new(), 8);

    let status = manager.status(&job).await.unwrap();
    assert_eq!(status.completed_stages, vec![StageId::Download]);
    assert_eq!(status.current_stage, Some(StageId::FrameExtraction));

    let record = manager.load(&job).await.unwrap();
    assert_eq!(record.status_of(StageId::Download), StageStatus::Done);
    assert_eq!(record.payload.media_path.as_deref(), Some("/media/clip.mp4"));
}
