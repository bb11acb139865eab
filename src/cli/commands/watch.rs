use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::jobs::print_snapshot;
use super::{build_manager, Command};
use crate::broadcaster::{JobSnapshot, Topic};
use crate::pipeline::{JobId, PipelineManager};

pub struct WatchCommand {
    pub job: Option<JobId>,
    pub interval: Duration,
}

impl Command for WatchCommand {
    async fn execute(&self) -> Result<()> {
        let config = crate::config::config()?;
        let manager = build_manager(config).await?;
        let topic = match &self.job {
            Some(job) => Topic::Job(job.clone()),
            None => Topic::AllJobs,
        };

        let mut subscription = manager.subscribe(&topic).await?;
        let mut seen: HashMap<JobId, DateTime<Utc>> = HashMap::new();
        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(100)));
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        println!("👀 Watching {topic} (Ctrl-C to stop)");
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                snapshot = subscription.recv() => match snapshot {
                    Some(snapshot) => {
                        seen.insert(snapshot.job_id.clone(), snapshot.record.updated_at);
                        println!();
                        print_snapshot(&snapshot, manager.registry());
                    }
                    None => break,
                },
                _ = ticker.tick() => publish_changes(&manager, self.job.as_ref(), &mut seen).await?,
            }
        }

        println!("👋 Stopped watching");
        Ok(())
    }
}

/// Other processes write to the same store; republish records whose
/// `updated_at` moved since they were last seen.
async fn publish_changes(
    manager: &PipelineManager,
    only: Option<&JobId>,
    seen: &mut HashMap<JobId, DateTime<Utc>>,
) -> Result<()> {
    let jobs = match only {
        Some(job) => vec![job.clone()],
        None => manager.list_jobs().await?,
    };

    for job in jobs {
        let Some(record) = manager.store().load(&job).await? else {
            continue;
        };
        if seen.get(&job) == Some(&record.updated_at) {
            continue;
        }
        debug!(job_id = %job, "Job changed on disk; republishing");
        seen.insert(job.clone(), record.updated_at);
        manager
            .broadcaster()
            .publish(&job, JobSnapshot::build(record, manager.registry()));
    }
    Ok(())
}
