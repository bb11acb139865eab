// Stage hand-off: per-job serialization, the in-flight ledger and the
// detached task that runs a collaborator.
//
// Dispatch is at-least-once. Callers hold the job's lock while they read the
// record, check their guards and hand off, so two triggers for the same job
// never interleave their decisions. The ledger keeps at most one outstanding
// dispatch per job until the collaborator returns or reports completion.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, Notify, OwnedMutexGuard};
use tracing::{error, info, warn, Instrument};

use super::registry::Stage;
use super::types::{JobId, StageId};
use crate::broadcaster::StatusBroadcaster;
use crate::collaborators::{CollaboratorSet, StageCollaborator};
use crate::observability::{pipeline_metrics, OperationTimer};
use crate::telemetry::{create_dispatch_span, generate_correlation_id};

/// An outstanding hand-off for a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlight {
    pub stage: StageId,
    pub ticket: u64,
    pub since: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandOffError {
    /// The collaborator could not be reached; nothing was started
    Unavailable(String),
    /// Another dispatch for this job has not finished yet
    InFlight(InFlight),
}

#[derive(Debug, Default)]
pub struct InFlightLedger {
    entries: Mutex<HashMap<JobId, InFlight>>,
    next_ticket: AtomicU64,
    idle: Notify,
}

impl InFlightLedger {
    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, InFlight>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn current(&self, job_id: &JobId) -> Option<InFlight> {
        self.entries().get(job_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn claim(&self, job_id: &JobId, stage: StageId) -> Result<u64, InFlight> {
        let mut entries = self.entries();
        if let Some(existing) = entries.get(job_id) {
            return Err(existing.clone());
        }
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed) + 1;
        entries.insert(
            job_id.clone(),
            InFlight {
                stage,
                ticket,
                since: Utc::now(),
            },
        );
        Ok(ticket)
    }

    /// Drop the entry only if it is still the one this ticket created
    fn release(&self, job_id: &JobId, ticket: u64) {
        let mut entries = self.entries();
        if entries.get(job_id).is_some_and(|e| e.ticket == ticket) {
            entries.remove(job_id);
        }
        if entries.is_empty() {
            self.idle.notify_waiters();
        }
    }

    /// The collaborator reported `stage` complete, so its dispatch is over
    pub fn release_stage(&self, job_id: &JobId, stage: StageId) {
        let mut entries = self.entries();
        if entries.get(job_id).is_some_and(|e| e.stage == stage) {
            entries.remove(job_id);
        }
        if entries.is_empty() {
            self.idle.notify_waiters();
        }
    }

    /// Wait until no dispatch is outstanding. Returns false on timeout.
    pub async fn wait_idle(&self, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_empty() {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.is_empty();
            }
        }
    }
}

/// Per-job async locks, removed again once nobody holds or waits on them
#[derive(Debug, Default)]
pub struct JobLocks {
    locks: Mutex<HashMap<JobId, Arc<AsyncMutex<()>>>>,
}

pub struct JobGuard<'a> {
    locks: &'a JobLocks,
    job_id: JobId,
    lock: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl JobLocks {
    pub async fn lock(&self, job_id: &JobId) -> JobGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            locks.entry(job_id.clone()).or_default().clone()
        };
        let guard = lock.clone().lock_owned().await;
        JobGuard {
            locks: self,
            job_id: job_id.clone(),
            lock,
            guard: Some(guard),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for JobGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.locks.lock().unwrap_or_else(|p| p.into_inner());
        // Only the map and this guard still reference the lock.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.job_id);
        }
    }
}

pub struct Dispatcher {
    collaborators: CollaboratorSet,
    broadcaster: Arc<StatusBroadcaster>,
    ledger: Arc<InFlightLedger>,
    locks: JobLocks,
}

impl Dispatcher {
    pub fn new(collaborators: CollaboratorSet, broadcaster: Arc<StatusBroadcaster>) -> Self {
        Self {
            collaborators,
            broadcaster,
            ledger: Arc::new(InFlightLedger::default()),
            locks: JobLocks::default(),
        }
    }

    pub fn ledger(&self) -> &InFlightLedger {
        &self.ledger
    }

    pub fn collaborators(&self) -> &CollaboratorSet {
        &self.collaborators
    }

    pub async fn lock_job(&self, job_id: &JobId) -> JobGuard<'_> {
        self.locks.lock(job_id).await
    }

    /// Resolve the stage's collaborator and confirm a hand-off could start
    pub fn preflight(&self, stage: StageId) -> Result<Arc<dyn StageCollaborator>, HandOffError> {
        let collaborator = self.collaborators.get(stage).ok_or_else(|| {
            HandOffError::Unavailable(format!("no collaborator registered for {stage}"))
        })?;
        if !collaborator.is_available() {
            return Err(HandOffError::Unavailable(format!(
                "{} is not accepting work",
                collaborator.name()
            )));
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(HandOffError::Unavailable(
                "no async runtime to run the stage on".to_string(),
            ));
        }
        Ok(collaborator)
    }

    /// Start the stage's collaborator on a detached task and return its
    /// ledger ticket. Callers must hold the job's lock.
    pub fn hand_off(&self, job_id: &JobId, stage: &Stage) -> Result<u64, HandOffError> {
        let collaborator = self.preflight(stage.id)?;
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| HandOffError::Unavailable(e.to_string()))?;
        let ticket = self
            .ledger
            .claim(job_id, stage.id)
            .map_err(HandOffError::InFlight)?;

        let correlation_id = generate_correlation_id();
        let span = create_dispatch_span(job_id.as_str(), stage.id.as_str(), &correlation_id);
        let ledger = self.ledger.clone();
        let broadcaster = self.broadcaster.clone();
        let job = job_id.clone();
        let stage_id = stage.id;

        handle.spawn(
            async move {
                let timer = OperationTimer::new(&format!("{} {}", collaborator.name(), stage_id));
                if let Err(e) = collaborator.enter(job.clone()).await {
                    pipeline_metrics().record_stage_error();
                    error!(job_id = %job, stage = %stage_id, error = %e, "Stage run returned an error");
                }
                timer.finish();
                ledger.release(&job, ticket);
                broadcaster.refresh(&job).await;
            }
            .instrument(span),
        );

        pipeline_metrics().record_dispatch();
        info!(
            job_id = %job_id,
            stage = %stage.id,
            ticket,
            correlation_id = %correlation_id,
            "Stage dispatched"
        );
        Ok(ticket)
    }
}

impl HandOffError {
    pub(crate) fn log(&self, job_id: &JobId, stage: StageId) {
        match self {
            HandOffError::Unavailable(reason) => {
                pipeline_metrics().record_unavailable();
                warn!(job_id = %job_id, stage = %stage, reason = %reason, "Stage hand-off unavailable");
            }
            HandOffError::InFlight(existing) => {
                pipeline_metrics().record_short_circuit();
                info!(
                    job_id = %job_id,
                    stage = %stage,
                    in_flight = %existing.stage,
                    "Dispatch already in flight for job"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_allows_one_dispatch_per_job() {
        let ledger = InFlightLedger::default();
        let job = JobId::from("job-1");

        let ticket = ledger.claim(&job, StageId::Transcription).unwrap();
        let existing = ledger.claim(&job, StageId::AiProcessing).unwrap_err();
        assert_eq!(existing.stage, StageId::Transcription);

        // Other jobs are independent.
        assert!(ledger.claim(&"job-2".into(), StageId::Transcription).is_ok());

        ledger.release(&job, ticket);
        assert!(ledger.current(&job).is_none());
    }

    #[test]
    fn stale_ticket_does_not_release_newer_claim() {
        let ledger = InFlightLedger::default();
        let job = JobId::from("job-1");

        let old = ledger.claim(&job, StageId::Transcription).unwrap();
        ledger.release_stage(&job, StageId::Transcription);
        let new = ledger.claim(&job, StageId::AiProcessing).unwrap();

        ledger.release(&job, old);
        assert_eq!(ledger.current(&job).map(|e| e.ticket), Some(new));
    }

    #[test]
    fn completion_of_other_stage_keeps_entry() {
        let ledger = InFlightLedger::default();
        let job = JobId::from("job-1");
        ledger.claim(&job, StageId::Synthesis).unwrap();
        ledger.release_stage(&job, StageId::AiProcessing);
        assert!(ledger.current(&job).is_some());
    }

    #[tokio::test]
    async fn wait_idle_returns_once_released() {
        let ledger = Arc::new(InFlightLedger::default());
        let job = JobId::from("job-1");
        let ticket = ledger.claim(&job, StageId::FinalVideo).unwrap();

        let waiter = {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.wait_idle(Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        ledger.release(&job, ticket);

        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn wait_idle_times_out() {
        let ledger = InFlightLedger::default();
        ledger.claim(&"job-1".into(), StageId::FinalVideo).unwrap();
        assert!(!ledger.wait_idle(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn job_locks_are_released_and_pruned() {
        let locks = JobLocks::default();
        let job = JobId::from("job-1");
        {
            let _guard = locks.lock(&job).await;
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }
}
