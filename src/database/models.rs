use crate::run_status::RunStatus;
use crate::schema::{command, run};
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::Serialize;

/// A named, reusable shell command
#[derive(Clone, Debug, Eq, PartialEq, Queryable, Serialize)]
pub struct Command {
    pub slug: String,
    pub title: String,
    pub description: Option<String>,
    pub command_to_run: String,
    pub created_date: NaiveDateTime,
    pub updated_date: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = command)]
pub struct NewCommand<'a> {
    pub slug: &'a str,
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub command_to_run: &'a str,
    pub created_date: NaiveDateTime,
    pub updated_date: NaiveDateTime,
}

/// One execution attempt of a command
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Run {
    pub id: i32,
    pub command_slug: String,
    /// The command text at the time the run was created
    pub command_run: String,
    pub status: RunStatus,
    pub output: Option<String>,
    pub created_date: NaiveDateTime,
    pub updated_date: NaiveDateTime,
}

impl Run {
    /// The path of the run's detail page
    pub fn url(&self) -> String {
        format!("/commands/{}/{}/", self.command_slug, self.id)
    }
}

#[derive(Insertable)]
#[diesel(table_name = run)]
pub struct NewRun<'a> {
    pub command_slug: &'a str,
    pub command_run: &'a str,
    pub status: &'a str,
    pub created_date: NaiveDateTime,
    pub updated_date: NaiveDateTime,
}

/// A run as stored in the database, before its status is parsed
#[derive(Queryable)]
pub struct RawRun {
    pub id: i32,
    pub command_slug: String,
    pub command_run: String,
    pub status: String,
    pub output: Option<String>,
    pub created_date: NaiveDateTime,
    pub updated_date: NaiveDateTime,
}

impl TryFrom<RawRun> for Run {
    type Error = anyhow::Error;

    fn try_from(raw: RawRun) -> Result<Self> {
        Ok(Self {
            status: raw
                .status
                .parse()
                .with_context(|| format!("Run {} has a corrupt status", raw.id))?,
            id: raw.id,
            command_slug: raw.command_slug,
            command_run: raw.command_run,
            output: raw.output,
            created_date: raw.created_date,
            updated_date: raw.updated_date,
        })
    }
}
