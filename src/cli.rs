use clap::builder::BoolishValueParser;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[clap(about, version, author)]
pub struct Cli {
    /// Path to the configuration file
    #[clap(short = 'c', long, env = "ASTEROID_CONFIG", default_value = "asteroid.toml")]
    pub config: PathBuf,

    /// Log fewer messages
    #[clap(short = 'q', long)]
    pub quiet: bool,

    #[clap(flatten)]
    pub overrides: Overrides,

    #[clap(subcommand)]
    pub command: Command,
}

/// Settings that take precedence over the configuration file
#[derive(Args, Default)]
pub struct Overrides {
    /// Base URL that workers use to reach the webhook endpoints
    #[clap(long, env = "DOMAIN")]
    pub domain: Option<String>,

    /// Dispatch commands to the message queue instead of running them locally
    #[clap(long, env = "QUEUE_COMMANDS", value_parser = BoolishValueParser::new())]
    pub queue_commands: Option<bool>,

    /// Host or amqp:// URI of the message broker
    #[clap(long, env = "QUEUE_ADDRESS")]
    pub queue_address: Option<String>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the HTTP server
    Serve(ServeArgs),

    /// Consume jobs from the message queue and report their results
    Worker(WorkerArgs),

    /// Execute a registered command and print the resulting run
    Exec(ExecArgs),

    /// Print the status of every registered command
    Status,
}

#[derive(Args)]
pub struct ServeArgs {
    /// HTTP server host
    #[clap(long, default_value = "127.0.0.1")]
    pub host: String,

    /// HTTP server port
    #[clap(short = 'p', long, env = "PORT", default_value_t = 8000)]
    pub port: u16,
}

#[derive(Args)]
pub struct WorkerArgs {
    /// Name of the queue to consume, overriding the configured queue
    #[clap(long)]
    pub queue: Option<String>,
}

#[derive(Args)]
pub struct ExecArgs {
    /// Slug of the command to execute
    pub slug: String,
}
