use anyhow::Result;

use super::{with_pipeline, Command};
use crate::broadcaster::JobSnapshot;
use crate::pipeline::{DispatchMode, JobId, PipelineResolver, StageRegistry, StageStatus};

pub struct StagesCommand;

impl Command for StagesCommand {
    async fn execute(&self) -> Result<()> {
        let registry = StageRegistry::standard();
        println!("🎬 CLIPFLOW PIPELINE");
        println!("====================");
        for (i, stage) in registry.stages().iter().enumerate() {
            match stage.dispatch {
                DispatchMode::Implicit { produced_by } => println!(
                    "{:>2}. {:<18} {:<20} implicit (from {produced_by})",
                    i + 1,
                    stage.id,
                    stage.display_name
                ),
                mode => println!(
                    "{:>2}. {:<18} {:<20} {}",
                    i + 1,
                    stage.id,
                    stage.display_name,
                    mode.label()
                ),
            }
        }
        Ok(())
    }
}

pub struct CreateCommand {
    pub source_url: String,
    pub title: Option<String>,
}

impl Command for CreateCommand {
    async fn execute(&self) -> Result<()> {
        with_pipeline(|manager| async move {
            let record = manager
                .create_job(self.source_url.clone(), self.title.clone())
                .await?;
            println!("✅ Created job {}", record.id);
            println!("   🔗 Source: {}", record.source_url);
            println!("   💡 Next: clipflow start {}", record.id);
            Ok(())
        })
        .await
    }
}

pub struct StatusCommand {
    pub job: Option<JobId>,
    pub json: bool,
}

impl Command for StatusCommand {
    async fn execute(&self) -> Result<()> {
        with_pipeline(|manager| async move {
            let jobs = match &self.job {
                Some(job) => vec![job.clone()],
                None => manager.list_jobs().await?,
            };
            if jobs.is_empty() {
                println!("📋 No jobs yet");
                println!("   💡 Create one with: clipflow create <source_url>");
                return Ok(());
            }

            for job in jobs {
                let snapshot = manager.snapshot(&job).await?;
                if self.json {
                    println!("{}", serde_json::to_string_pretty(&snapshot)?);
                } else {
                    print_snapshot(&snapshot, manager.registry());
                }
            }
            Ok(())
        })
        .await
    }
}

pub fn print_snapshot(snapshot: &JobSnapshot, registry: &StageRegistry) {
    let status = &snapshot.status;
    let title = snapshot.record.title.as_deref().unwrap_or("(untitled)");
    println!("🎞️  {} - {}", snapshot.job_id, title);
    println!(
        "   📊 {:.0}% ({}/{} stages)",
        status.progress_percent, status.completed_count, status.total_stages
    );
    match status.current_stage {
        Some(stage) => println!("   🎯 Current: {stage}"),
        None => println!("   🏁 Finished"),
    }

    for stage in registry.stages() {
        let state = snapshot.record.stage(stage.id);
        let icon = if status.completed_stages.contains(&stage.id) {
            "✅"
        } else if state.status == StageStatus::InProgress {
            "🔄"
        } else if state.status == StageStatus::Failed {
            "❌"
        } else {
            "⬜"
        };
        match state.error() {
            Some(error) => println!("   {icon} {:<18} {error}", stage.id),
            None => println!("   {icon} {}", stage.id),
        }
    }

    if let Some(next) = PipelineResolver::new(registry).next_runnable(&snapshot.record) {
        match next.dispatch {
            DispatchMode::Manual => {
                println!("   💡 {} waits for: clipflow start {} {}", next.id, snapshot.job_id, next.id);
            }
            DispatchMode::Implicit { produced_by } => {
                println!(
                    "   💡 {} comes from {produced_by}: clipflow retry {} {produced_by}",
                    next.id, snapshot.job_id
                );
            }
            DispatchMode::Auto => {}
        }
    }
}
