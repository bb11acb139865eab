use clap::{Parser, Subcommand};

use crate::pipeline::{JobId, PayloadField, StageId};

pub mod commands;

#[derive(Parser)]
#[command(name = "clipflow")]
#[command(about = "Drive content jobs through the clip production pipeline")]
#[command(long_about = "Clipflow tracks each content item through ten ordered stages, from media \
                       download to spreadsheet sync, advancing to the next stage automatically \
                       when one completes. Start with 'clipflow create <url>'.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the pipeline stages in order
    Stages,
    /// Register a new content item
    Create {
        /// Source URL of the content item
        source_url: String,
        /// Optional human-readable title
        #[arg(long)]
        title: Option<String>,
    },
    /// Show a job's pipeline status (all jobs when no id is given)
    Status {
        job: Option<JobId>,
        /// Print the full snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Mark a stage as started (called by stage workers)
    Begin { job: JobId, stage: StageId },
    /// Mark a stage done and auto-advance to the next stage
    Complete {
        job: JobId,
        stage: StageId,
        /// Payload field written with the completion, e.g. `--set transcript="..."`
        #[arg(long = "set", value_name = "FIELD=VALUE", value_parser = commands::parse_payload_field)]
        fields: Vec<PayloadField>,
    },
    /// Record a stage failure (called by stage workers)
    Fail {
        job: JobId,
        stage: StageId,
        /// What went wrong
        message: String,
    },
    /// Start a stage by hand, or the next runnable stage when none is given
    Start { job: JobId, stage: Option<StageId> },
    /// Reset a failed stage and run it again
    Retry { job: JobId, stage: StageId },
    /// Stream status snapshots until Ctrl-C (all jobs when no id is given)
    Watch {
        job: Option<JobId>,
        /// Seconds between store polls for changes made by other processes
        #[arg(long, default_value = "2")]
        interval: u64,
    },
}
