use crate::database::{Command, Database, Run};
use crate::run_status::NOT_RUN_YET;
use anyhow::Result;
use serde::Serialize;

/// A command along with its derived status
#[derive(Serialize)]
pub struct CommandInfo {
    #[serde(flatten)]
    pub command: Command,
    pub status: String,
    pub status_display: String,
    pub url: String,
}

impl CommandInfo {
    pub fn load(db: &Database, command: Command) -> Result<Self> {
        let status = db.get_command_status(&command.slug)?;
        Ok(Self {
            status: status.map_or(NOT_RUN_YET, |status| status.as_str()).to_owned(),
            status_display: status.map_or_else(|| NOT_RUN_YET.to_owned(), |status| status.to_string()),
            url: format!("/commands/{}/", command.slug),
            command,
        })
    }
}

#[derive(Serialize)]
pub struct RunInfo {
    #[serde(flatten)]
    pub run: Run,
    pub status_display: String,
    pub url: String,
}

impl From<Run> for RunInfo {
    fn from(run: Run) -> Self {
        Self {
            status_display: run.status.to_string(),
            url: run.url(),
            run,
        }
    }
}
