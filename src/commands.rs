use crate::cli::{ExecArgs, ServeArgs, WorkerArgs};
use crate::config::Config;
use crate::database::{Database, SyncSummary};
use crate::executor;
use crate::http::{self, AppState};
use crate::queue::AmqpQueue;
use crate::run_status::{RunStatus, NOT_RUN_YET};
use crate::worker::{HttpReporter, Worker};
use anyhow::{Context, Result};
use chrono_humanize::{Accuracy, HumanTime, Tense};
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;

/// Return the directory where asteroid will store application data
pub fn get_data_dir() -> Result<PathBuf> {
    let project_dirs = directories::ProjectDirs::from("com", "asteroid", "asteroid")
        .context("Failed to determine application directories")?;
    Ok(project_dirs.data_local_dir().to_owned())
}

/// Open the configured database, falling back to one in the data directory
fn open_database(config: &Config) -> Result<Arc<Database>> {
    let db_path = match &config.database {
        Some(path) => path.clone(),
        None => get_data_dir()?.join("asteroid.db"),
    };
    Ok(Arc::new(Database::open(&db_path)?))
}

/// Register the configured commands in the database
fn sync_commands(db: &Database, config: &Config) -> Result<()> {
    let SyncSummary {
        created,
        updated,
        deleted,
    } = db.sync_commands(&config.commands)?;
    if !created.is_empty() {
        info!("Created commands: {}", created.join(", "));
    }
    if !updated.is_empty() {
        info!("Updated commands: {}", updated.join(", "));
    }
    if !deleted.is_empty() {
        info!("Deleted commands and their runs: {}", deleted.join(", "));
    }
    Ok(())
}

/// Implementation for the `serve` CLI command
pub async fn serve(config: Config, args: ServeArgs) -> Result<()> {
    let db = open_database(&config)?;
    sync_commands(&db, &config)?;

    if config.queue.enabled {
        info!(
            "Dispatching commands to exchange {} on {}",
            config.queue.exchange, config.queue.address
        );
    } else {
        info!("Executing commands locally with {}", config.shell);
    }
    let executor = executor::from_config(&config, Arc::clone(&db));
    let server = http::create_server(
        AppState { db, executor },
        &args.host,
        args.port,
        config.queue.max_result_size,
    )?;
    server.await.context("Failed to run HTTP server")
}

/// Implementation for the `worker` CLI command
pub async fn worker(config: Config, args: WorkerArgs) -> Result<()> {
    let mut topology = config.queue.topology();
    if let Some(queue) = args.queue {
        topology.queue = queue;
    }

    let worker = Worker::new(
        Arc::new(AmqpQueue::new(config.queue.uri())),
        topology,
        config.shell,
        config.queue.ack_policy,
        Arc::new(HttpReporter::new()?),
    );
    worker
        .run(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl-C, stopping after the current job"),
                Err(err) => {
                    // Without a signal handler, the worker runs until the broker closes the connection
                    error!("Failed to listen for Ctrl-C: {err}");
                    std::future::pending::<()>().await;
                }
            }
        })
        .await
}

/// Implementation for the `exec` CLI command
pub async fn exec(config: Config, args: ExecArgs) -> Result<()> {
    let db = open_database(&config)?;
    sync_commands(&db, &config)?;

    let command = db
        .get_command(&args.slug)?
        .with_context(|| format!("Command {} does not exist", args.slug))?;
    let executor = executor::from_config(&config, Arc::clone(&db));
    let run = executor.execute(&command).await?;

    if run.status == RunStatus::InProgress {
        println!("Dispatched run {} of {}", run.id, command.slug);
    } else {
        println!("Run {} of {} {}", run.id, command.slug, run.status);
        if let Some(output) = run.output.filter(|output| !output.is_empty()) {
            println!("{output}");
        }
    }
    Ok(())
}

/// Implementation for the `status` CLI command
pub fn status(config: &Config) -> Result<()> {
    let db = open_database(config)?;
    let commands = db.get_commands()?;
    if commands.is_empty() {
        println!("No commands are registered");
        return Ok(());
    }

    for command in commands {
        let last_run = db.get_runs(Some(command.slug.as_str()), 0, 1)?.into_iter().next();
        match last_run {
            Some(run) => {
                let ago = HumanTime::from(run.updated_date.and_utc())
                    .to_text_en(Accuracy::Rough, Tense::Past);
                println!("{}: {} ({ago})", command.slug, run.status);
            }
            None => println!("{}: {NOT_RUN_YET}", command.slug),
        }
    }
    Ok(())
}
