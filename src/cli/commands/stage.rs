use anyhow::Result;

use super::{describe_outcome, with_pipeline, Command};
use crate::pipeline::{JobId, PayloadField, StageId};

pub struct BeginCommand {
    pub job: JobId,
    pub stage: StageId,
}

impl Command for BeginCommand {
    async fn execute(&self) -> Result<()> {
        with_pipeline(|manager| async move {
            manager.begin_stage(&self.job, self.stage).await?;
            println!("🔄 {} started for job {}", self.stage, self.job);
            Ok(())
        })
        .await
    }
}

pub struct CompleteCommand {
    pub job: JobId,
    pub stage: StageId,
    pub fields: Vec<PayloadField>,
}

impl Command for CompleteCommand {
    async fn execute(&self) -> Result<()> {
        with_pipeline(|manager| async move {
            let outcome = manager
                .complete_stage(&self.job, self.stage, self.fields.clone())
                .await?;
            println!("✅ {} complete for job {}", self.stage, self.job);
            println!("   {}", describe_outcome(&outcome));
            Ok(())
        })
        .await
    }
}

pub struct FailCommand {
    pub job: JobId,
    pub stage: StageId,
    pub message: String,
}

impl Command for FailCommand {
    async fn execute(&self) -> Result<()> {
        with_pipeline(|manager| async move {
            manager
                .fail_stage(&self.job, self.stage, self.message.clone())
                .await?;
            println!("❌ {} marked failed for job {}", self.stage, self.job);
            println!("   💡 Retry with: clipflow retry {} {}", self.job, self.stage);
            Ok(())
        })
        .await
    }
}

pub struct StartCommand {
    pub job: JobId,
    pub stage: Option<StageId>,
}

impl Command for StartCommand {
    async fn execute(&self) -> Result<()> {
        with_pipeline(|manager| async move {
            let outcome = match self.stage {
                Some(stage) => manager.start_stage(&self.job, stage).await?,
                None => manager.start_next(&self.job).await?,
            };
            println!("{}", describe_outcome(&outcome));
            Ok(())
        })
        .await
    }
}

pub struct RetryCommand {
    pub job: JobId,
    pub stage: StageId,
}

impl Command for RetryCommand {
    async fn execute(&self) -> Result<()> {
        with_pipeline(|manager| async move {
            let dispatched = manager.retry(&self.job, self.stage).await?;
            println!(
                "🔁 Retrying {} for job {} (ticket {})",
                dispatched.stage, dispatched.job_id, dispatched.ticket
            );
            Ok(())
        })
        .await
    }
}
