//! Live status broadcasting
//!
//! Every state change produces a full [`JobSnapshot`] that is sent to the
//! job's own topic (`job:{id}`) and to the shared list topic (`jobs:all`).
//! Receivers replace their local view wholesale, so a slow receiver that
//! lags simply skips to the newest snapshot.

use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::observability::pipeline_metrics;
use crate::pipeline::{
    JobId, JobRecord, PipelineError, PipelineResolver, PipelineStatus, StageRegistry,
};
use crate::store::JobStore;

const JOB_TOPIC_PREFIX: &str = "job:";
const ALL_JOBS_TOPIC: &str = "jobs:all";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Job(JobId),
    AllJobs,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Job(id) => write!(f, "{JOB_TOPIC_PREFIX}{id}"),
            Topic::AllJobs => f.write_str(ALL_JOBS_TOPIC),
        }
    }
}

impl FromStr for Topic {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == ALL_JOBS_TOPIC {
            return Ok(Topic::AllJobs);
        }
        match s.strip_prefix(JOB_TOPIC_PREFIX) {
            Some(id) if !id.is_empty() => Ok(Topic::Job(JobId::from(id))),
            _ => Err(PipelineError::UnknownTopic(s.to_string())),
        }
    }
}

/// Full, self-contained rendering of a job at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub record: JobRecord,
    pub status: PipelineStatus,
    pub published_at: DateTime<Utc>,
}

impl JobSnapshot {
    pub fn build(record: JobRecord, registry: &StageRegistry) -> Self {
        let status = PipelineResolver::new(registry).status(&record);
        Self {
            job_id: record.id.clone(),
            record,
            status,
            published_at: Utc::now(),
        }
    }
}

pub struct StatusBroadcaster {
    registry: Arc<StageRegistry>,
    store: Arc<dyn JobStore>,
    capacity: usize,
    all_jobs: broadcast::Sender<Arc<JobSnapshot>>,
    per_job: Mutex<HashMap<JobId, broadcast::Sender<Arc<JobSnapshot>>>>,
}

impl StatusBroadcaster {
    pub fn new(registry: Arc<StageRegistry>, store: Arc<dyn JobStore>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (all_jobs, _) = broadcast::channel(capacity);
        Self {
            registry,
            store,
            capacity,
            all_jobs,
            per_job: Mutex::new(HashMap::new()),
        }
    }

    /// Send a snapshot to the job topic and the list topic. Never fails:
    /// topics without subscribers simply drop the snapshot.
    pub fn publish(&self, job_id: &JobId, snapshot: JobSnapshot) {
        let snapshot = Arc::new(snapshot);
        let metrics = pipeline_metrics();

        let job_sender = match self.per_job.lock() {
            Ok(mut channels) => {
                let sender = channels.get(job_id).cloned();
                if sender.as_ref().is_some_and(|s| s.receiver_count() == 0) {
                    channels.remove(job_id);
                }
                sender
            }
            Err(_) => {
                warn!(job_id = %job_id, "Job topic registry poisoned; skipping job topic");
                None
            }
        };

        if let Some(sender) = job_sender {
            match sender.send(snapshot.clone()) {
                Ok(receivers) => metrics.record_delivery(receivers),
                Err(_) => metrics.record_undelivered(),
            }
        }

        match self.all_jobs.send(snapshot) {
            Ok(receivers) => metrics.record_delivery(receivers),
            Err(_) => metrics.record_undelivered(),
        }

        debug!(job_id = %job_id, "Status snapshot published");
    }

    /// Load the job and publish its current state; failures are logged only
    pub async fn refresh(&self, job_id: &JobId) {
        match self.store.load(job_id).await {
            Ok(Some(record)) => self.publish(job_id, JobSnapshot::build(record, &self.registry)),
            Ok(None) => debug!(job_id = %job_id, "Nothing to publish for missing job"),
            Err(e) => warn!(job_id = %job_id, error = %e, "Could not load job for status publish"),
        }
    }

    pub async fn subscribe(&self, topic: &Topic) -> Result<Subscription, PipelineError> {
        match topic {
            Topic::AllJobs => Ok(Subscription {
                topic: topic.clone(),
                initial: None,
                receiver: self.all_jobs.subscribe(),
            }),
            Topic::Job(job_id) => {
                // Attach before reading so no update slips in between.
                let receiver = self.attach(job_id);
                let record = match self.store.load(job_id).await {
                    Ok(Some(record)) => record,
                    outcome => {
                        drop(receiver);
                        self.prune(job_id);
                        return Err(match outcome {
                            Err(e) => e.into(),
                            _ => PipelineError::JobNotFound(job_id.clone()),
                        });
                    }
                };
                Ok(Subscription {
                    topic: topic.clone(),
                    initial: Some(Arc::new(JobSnapshot::build(record, &self.registry))),
                    receiver,
                })
            }
        }
    }

    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        match topic {
            Topic::AllJobs => self.all_jobs.receiver_count(),
            Topic::Job(job_id) => self
                .per_job
                .lock()
                .ok()
                .and_then(|channels| channels.get(job_id).map(|s| s.receiver_count()))
                .unwrap_or(0),
        }
    }

    fn prune(&self, job_id: &JobId) {
        if let Ok(mut channels) = self.per_job.lock() {
            if channels.get(job_id).is_some_and(|s| s.receiver_count() == 0) {
                channels.remove(job_id);
            }
        }
    }

    /// Receiver on the job's channel, created under the registry lock so a
    /// concurrent publish cannot prune the channel before it is counted
    fn attach(&self, job_id: &JobId) -> broadcast::Receiver<Arc<JobSnapshot>> {
        let mut channels = self
            .per_job
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        channels
            .entry(job_id.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }
}

/// Stream of snapshots for one topic
pub struct Subscription {
    topic: Topic,
    initial: Option<Arc<JobSnapshot>>,
    receiver: broadcast::Receiver<Arc<JobSnapshot>>,
}

impl Subscription {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Next snapshot; `None` once the broadcaster is gone
    pub async fn recv(&mut self) -> Option<Arc<JobSnapshot>> {
        if let Some(initial) = self.initial.take() {
            return Some(initial);
        }
        loop {
            match self.receiver.recv().await {
                Ok(snapshot) => return Some(snapshot),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(topic = %self.topic, skipped, "Subscriber lagged; skipping to newest");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Arc<JobSnapshot>> {
        stream::unfold(self, |mut sub| async move {
            let next = sub.recv().await?;
            Some((next, sub))
        })
    }
}
