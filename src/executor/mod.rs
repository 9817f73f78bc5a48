mod dispatcher;
mod local;

pub use self::dispatcher::QueueDispatcher;
pub use self::local::LocalExecutor;
use crate::config::Config;
use crate::database::{Command, Database, Run};
use crate::queue::AmqpQueue;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

#[derive(Debug)]
pub enum ExecuteError {
    /// The run could not be created or updated
    Store(anyhow::Error),

    /// The run was created but its job could not be published, so it will stay in progress
    BrokerUnavailable { run: Run, source: anyhow::Error },
}

impl fmt::Display for ExecuteError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Store(err) => write!(f, "{err:#}"),
            Self::BrokerUnavailable { run, source } => write!(
                f,
                "Failed to dispatch run {} of {}: {source:#}",
                run.id, run.command_slug
            ),
        }
    }
}

impl std::error::Error for ExecuteError {}

impl From<anyhow::Error> for ExecuteError {
    fn from(err: anyhow::Error) -> Self {
        Self::Store(err)
    }
}

/// A strategy for executing commands
#[async_trait]
pub trait Executor: Send + Sync {
    /// Create a run of the command and start executing it
    /// The returned run may still be in progress.
    async fn execute(&self, command: &Command) -> Result<Run, ExecuteError>;
}

/// Build the executor selected by the configuration
pub fn from_config(config: &Config, db: Arc<Database>) -> Arc<dyn Executor> {
    if config.queue.enabled {
        Arc::new(QueueDispatcher::new(
            db,
            Arc::new(AmqpQueue::new(config.queue.uri())),
            &config.queue,
            config.domain.clone(),
        ))
    } else {
        Arc::new(LocalExecutor::new(db, config.shell.clone()))
    }
}
