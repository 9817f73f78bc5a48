mod models;

use self::models::{NewCommand, NewRun, RawRun};
pub use self::models::{Command, Run};
use crate::config::CommandDefinition;
use crate::run_status::RunStatus;
use crate::schema::{command, run};
use crate::sync_ext::MutexExt;
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use diesel::prelude::*;
use diesel::sql_types::Text;
use diesel::SqliteConnection;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

define_sql_function!(fn lower(x: Text) -> Text);

/// The changes made by `Database::sync_commands`
#[derive(Debug, Default, Eq, PartialEq)]
pub struct SyncSummary {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
}

pub struct Database {
    connection: Mutex<SqliteConnection>,
}

impl Database {
    /// Open the SQLite database at the given path, creating it and running migrations if necessary
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        let connection = SqliteConnection::establish(&db_path.to_string_lossy())
            .with_context(|| format!("Failed to open SQLite database {}", db_path.display()))?;
        Self::from_connection(connection)
    }

    /// Open a private, empty database that lives only as long as the returned instance
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let connection = SqliteConnection::establish(":memory:")
            .context("Failed to open in-memory SQLite database")?;
        Self::from_connection(connection)
    }

    fn from_connection(mut connection: SqliteConnection) -> Result<Self> {
        connection
            .run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!(err))
            .context("Failed to run SQLite migrations")?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    fn with_connection<T>(
        &self,
        query: impl FnOnce(&mut SqliteConnection) -> QueryResult<T>,
    ) -> QueryResult<T> {
        let mut connection = self.connection.lock_unpoisoned();
        query(&mut *connection)
    }

    /// Make the stored commands match the provided definitions
    /// Commands missing from the definitions are deleted along with their runs.
    pub fn sync_commands(
        &self,
        definitions: &BTreeMap<String, CommandDefinition>,
    ) -> Result<SyncSummary> {
        self.with_connection(|conn| {
            conn.transaction::<_, diesel::result::Error, _>(|conn| {
                let mut summary = SyncSummary::default();
                let existing = command::table
                    .load::<Command>(conn)?
                    .into_iter()
                    .map(|command| (command.slug.clone(), command))
                    .collect::<BTreeMap<_, _>>();
                let now = Utc::now().naive_utc();

                for (slug, definition) in definitions {
                    match existing.get(slug) {
                        None => {
                            diesel::insert_into(command::table)
                                .values(&NewCommand {
                                    slug,
                                    title: &definition.title,
                                    description: definition.description.as_deref(),
                                    command_to_run: &definition.command,
                                    created_date: now,
                                    updated_date: now,
                                })
                                .execute(conn)?;
                            summary.created.push(slug.clone());
                        }
                        Some(command)
                            if command.title != definition.title
                                || command.description != definition.description
                                || command.command_to_run != definition.command =>
                        {
                            diesel::update(command::table.find(slug))
                                .set((
                                    command::title.eq(&definition.title),
                                    command::description.eq(definition.description.as_deref()),
                                    command::command_to_run.eq(&definition.command),
                                    command::updated_date.eq(now),
                                ))
                                .execute(conn)?;
                            summary.updated.push(slug.clone());
                        }
                        Some(_) => {}
                    }
                }

                for slug in existing.keys() {
                    if !definitions.contains_key(slug) {
                        delete_command(conn, slug)?;
                        summary.deleted.push(slug.clone());
                    }
                }

                Ok(summary)
            })
        })
        .context("Failed to sync commands to the database")
    }

    /// Return all commands, ordered by title
    pub fn get_commands(&self) -> Result<Vec<Command>> {
        self.with_connection(|conn| {
            command::table
                .order((command::title.asc(), command::slug.asc()))
                .load::<Command>(conn)
        })
        .context("Failed to load commands from the database")
    }

    /// Lookup a command by its slug, ignoring case
    pub fn get_command(&self, slug: &str) -> Result<Option<Command>> {
        let slug = slug.to_lowercase();
        self.with_connection(|conn| {
            command::table
                .filter(lower(command::slug).eq(&slug))
                .order(command::slug.asc())
                .first::<Command>(conn)
                .optional()
        })
        .with_context(|| format!("Failed to load command {slug} from the database"))
    }

    /// Return the status of the command's most recently updated run, or `None` if it has never run
    pub fn get_command_status(&self, slug: &str) -> Result<Option<RunStatus>> {
        let status = self
            .with_connection(|conn| {
                run::table
                    .filter(run::command_slug.eq(slug))
                    .order((run::updated_date.desc(), run::id.desc()))
                    .select(run::status)
                    .first::<String>(conn)
                    .optional()
            })
            .with_context(|| format!("Failed to load status of command {slug} from the database"))?;
        status.map(|status| status.parse()).transpose()
    }

    /// Record a new in-progress run of a command
    /// The run's command text is a snapshot of the command's current text.
    pub fn insert_run(&self, command: &Command) -> Result<Run> {
        let now = Utc::now().naive_utc();
        self.with_connection(|conn| {
            diesel::insert_into(run::table)
                .values(&NewRun {
                    command_slug: &command.slug,
                    command_run: &command.command_to_run,
                    status: RunStatus::InProgress.as_str(),
                    created_date: now,
                    updated_date: now,
                })
                .get_result::<RawRun>(conn)
        })
        .with_context(|| format!("Failed to save run of {} to the database", command.slug))?
        .try_into()
    }

    /// Lookup a run by its id and the slug of the command that owns it
    /// Both must match, so a run id under the wrong command is not found.
    pub fn get_run(&self, slug: &str, run_id: i32) -> Result<Option<Run>> {
        self.with_connection(|conn| {
            run::table
                .filter(run::id.eq(run_id))
                .filter(run::command_slug.eq(slug))
                .first::<RawRun>(conn)
                .optional()
        })
        .with_context(|| format!("Failed to load run {run_id} of {slug} from the database"))?
        .map(TryInto::try_into)
        .transpose()
    }

    /// Move an in-progress run to a terminal status
    /// The update only applies while the run is still in progress, so at most one caller can ever complete a run.
    /// Returns `false` if the run was not in progress.
    pub fn complete_run(&self, run_id: i32, status: RunStatus, output: &str) -> Result<bool> {
        let updated = self
            .with_connection(|conn| {
                diesel::update(
                    run::table
                        .filter(run::id.eq(run_id))
                        .filter(run::status.eq(RunStatus::InProgress.as_str())),
                )
                .set((
                    run::status.eq(status.as_str()),
                    run::output.eq(output),
                    run::updated_date.eq(Utc::now().naive_utc()),
                ))
                .execute(conn)
            })
            .with_context(|| format!("Failed to update status of run {run_id} in the database"))?;
        Ok(updated == 1)
    }

    /// Read a page of runs, most recently updated first, optionally restricted to a single command
    pub fn get_runs(&self, slug: Option<&str>, offset: i64, limit: i64) -> Result<Vec<Run>> {
        self.with_connection(|conn| {
            let mut query = run::table
                .order((run::updated_date.desc(), run::id.desc()))
                .offset(offset)
                .limit(limit)
                .into_boxed();
            if let Some(slug) = slug {
                query = query.filter(run::command_slug.eq(slug));
            }
            query.load::<RawRun>(conn)
        })
        .context("Failed to load runs from the database")?
        .into_iter()
        .map(TryInto::try_into)
        .collect()
    }

    /// Count the runs, optionally restricted to a single command
    pub fn count_runs(&self, slug: Option<&str>) -> Result<i64> {
        self.with_connection(|conn| {
            let mut query = run::table.into_boxed();
            if let Some(slug) = slug {
                query = query.filter(run::command_slug.eq(slug));
            }
            query.count().get_result::<i64>(conn)
        })
        .context("Failed to count runs in the database")
    }
}

// Runs are owned by their command, so deleting a command cascades to its runs
fn delete_command(conn: &mut SqliteConnection, slug: &str) -> QueryResult<()> {
    diesel::delete(run::table.filter(run::command_slug.eq(slug))).execute(conn)?;
    diesel::delete(command::table.find(slug)).execute(conn)?;
    Ok(())
}
