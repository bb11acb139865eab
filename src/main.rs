use anyhow::Result;
use clap::Parser;
use std::time::Duration;

use clipflow::cli::commands::jobs::{CreateCommand, StagesCommand, StatusCommand};
use clipflow::cli::commands::stage::{
    BeginCommand, CompleteCommand, FailCommand, RetryCommand, StartCommand,
};
use clipflow::cli::commands::watch::WatchCommand;
use clipflow::cli::commands::Command;
use clipflow::cli::{Cli, Commands};
use clipflow::{config, init_config, init_telemetry, shutdown_telemetry};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config()?;
    init_telemetry(&config.observability)?;
    init_config()?;

    let result = tokio::runtime::Runtime::new()?.block_on(async {
        match cli.command {
            Commands::Stages => StagesCommand.execute().await,
            Commands::Create { source_url, title } => {
                CreateCommand { source_url, title }.execute().await
            }
            Commands::Status { job, json } => StatusCommand { job, json }.execute().await,
            Commands::Begin { job, stage } => BeginCommand { job, stage }.execute().await,
            Commands::Complete { job, stage, fields } => {
                CompleteCommand { job, stage, fields }.execute().await
            }
            Commands::Fail {
                job,
                stage,
                message,
            } => FailCommand {
                job,
                stage,
                message,
            }
            .execute()
            .await,
            Commands::Start { job, stage } => StartCommand { job, stage }.execute().await,
            Commands::Retry { job, stage } => RetryCommand { job, stage }.execute().await,
            Commands::Watch { job, interval } => {
                WatchCommand {
                    job,
                    interval: Duration::from_secs(interval),
                }
                .execute()
                .await
            }
        }
    });

    shutdown_telemetry();
    result
}
