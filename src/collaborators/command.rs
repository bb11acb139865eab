//! External command collaborator
//!
//! Hands a job to an external program (`program args... <job_id>`). The
//! program is responsible for updating the job record and reporting the
//! stage's completion, e.g. by calling `clipflow complete <job> <stage>`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

use super::StageCollaborator;
use crate::pipeline::{JobId, StageId};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Command not found: {command}")]
    CommandNotFound { command: String },
    #[error("Command {command} exited with status {status_code}: {stderr}")]
    Failed {
        command: String,
        status_code: i32,
        stderr: String,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Program invoked for a stage, configured under `[stages.<id>]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

pub struct CommandCollaborator {
    stage: StageId,
    command: StageCommand,
}

impl CommandCollaborator {
    pub fn new(stage: StageId, command: StageCommand) -> Self {
        Self { stage, command }
    }

    fn program_on_path(&self) -> bool {
        let program = std::path::Path::new(&self.command.program);
        if program.components().count() > 1 {
            return program.is_file();
        }
        std::env::var_os("PATH")
            .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
            .unwrap_or(false)
    }

    async fn run(&self, job_id: &JobId) -> Result<(), CommandError> {
        let output = Command::new(&self.command.program)
            .args(&self.command.args)
            .arg(job_id.as_str())
            .env("CLIPFLOW_STAGE", self.stage.as_str())
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    CommandError::CommandNotFound {
                        command: self.command.program.clone(),
                    }
                } else {
                    CommandError::Io(e)
                }
            })?;

        if !output.status.success() {
            return Err(CommandError::Failed {
                command: self.command.program.clone(),
                status_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl StageCollaborator for CommandCollaborator {
    fn name(&self) -> String {
        format!("{} ({})", self.command.program, self.stage)
    }

    fn is_available(&self) -> bool {
        self.program_on_path()
    }

    async fn enter(&self, job_id: JobId) -> anyhow::Result<()> {
        info!(
            job_id = %job_id,
            stage = %self.stage,
            program = %self.command.program,
            "Starting stage command"
        );
        match self.run(&job_id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(job_id = %job_id, stage = %self.stage, error = %e, "Stage command failed");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collaborator(program: &str, args: &[&str]) -> CommandCollaborator {
        CommandCollaborator::new(
            StageId::Transcription,
            StageCommand {
                program: program.to_string(),
                args: args.iter().map(|a| a.to_string()).collect(),
            },
        )
    }

    #[test]
    fn missing_program_is_unavailable() {
        let c = collaborator("clipflow-definitely-not-installed", &[]);
        assert!(!c.is_available());
    }

    #[tokio::test]
    async fn job_id_is_passed_as_last_argument() {
        let c = collaborator("sh", &["-c", "test \"$0\" = job-7"]);
        assert!(c.is_available());
        c.enter(JobId::from("job-7")).await.unwrap();
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        let c = collaborator("sh", &["-c", "echo boom >&2; exit 3"]);
        let err = c.enter(JobId::from("job-7")).await.unwrap_err();
        let err = err.downcast::<CommandError>().unwrap();
        assert!(matches!(err, CommandError::Failed { status_code: 3, .. }));
    }
}
