use super::{ExecuteError, Executor};
use crate::database::{Command, Database, Run};
use crate::run_status::RunStatus;
use crate::shell;
use anyhow::Context;
use async_trait::async_trait;
use log::{info, warn};
use std::sync::Arc;

/// Executes commands in the server process and waits for them to finish
pub struct LocalExecutor {
    db: Arc<Database>,
    shell: String,
}

impl LocalExecutor {
    pub fn new(db: Arc<Database>, shell: String) -> Self {
        Self { db, shell }
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    async fn execute(&self, command: &Command) -> Result<Run, ExecuteError> {
        let run = self.db.insert_run(command)?;
        let slug = &command.slug;
        info!("{slug}: started local run {}", run.id);

        let result = shell::execute(&self.shell, &run.command_run).await;
        let status = RunStatus::from_exit_code(result.code);
        if self.db.complete_run(run.id, status, &result.output)? {
            info!("{slug}: run {} {status}", run.id);
        } else {
            // The run's webhook was called while the command was executing
            warn!("{slug}: run {} was already completed, discarding local result", run.id);
        }

        let run = self
            .db
            .get_run(slug, run.id)?
            .with_context(|| format!("Run {} of {slug} no longer exists", run.id))?;
        Ok(run)
    }
}
