#[macro_use]
extern crate diesel;
#[macro_use]
extern crate diesel_migrations;

mod cli;
mod commands;
mod config;
mod database;
mod executor;
mod http;
mod message;
mod queue;
mod run_status;
mod schema;
mod shell;
mod sync_ext;
mod worker;

use crate::cli::{Cli, Command};
use crate::config::Config;
use anyhow::Result;
use clap::Parser;
use log::LevelFilter;

#[actix_web::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    simple_logger::SimpleLogger::new()
        .with_module_level("actix_server", LevelFilter::Off)
        .with_module_level("mio", LevelFilter::Off)
        .with_module_level("lapin", LevelFilter::Warn)
        .with_module_level("reqwest", LevelFilter::Warn)
        .with_level(if cli.quiet {
            LevelFilter::Warn
        } else {
            LevelFilter::Debug
        })
        .init()?;

    let config = Config::load(&cli.config, &cli.overrides).await?;
    match cli.command {
        Command::Serve(args) => commands::serve(config, args).await,
        Command::Worker(args) => commands::worker(config, args).await,
        Command::Exec(args) => commands::exec(config, args).await,
        Command::Status => commands::status(&config),
    }
}
