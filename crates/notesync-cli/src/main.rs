//! notesync CLI - offline-first notes from the command line
//!
//! Every edit lands in the local database first; `sync` and `watch` push the
//! queued changes once the remote service is reachable.

mod cli;
mod commands;
mod error;

use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::add::run_add;
use crate::commands::common::{resolve_config_path, resolve_db_path};
use crate::commands::conflicts::run_conflicts;
use crate::commands::delete::run_delete;
use crate::commands::edit::run_edit;
use crate::commands::list::run_list;
use crate::commands::show::run_show;
use crate::commands::status::run_status;
use crate::commands::sync::{run_retry, run_sync};
use crate::commands::watch::run_watch;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);
    let config_path = resolve_config_path(cli.config);
    let config_path = config_path.as_deref();

    match cli.command {
        Some(Commands::Add { title, body }) => run_add(&title, body.as_deref(), &db_path).await?,
        Some(Commands::List { all, json }) => run_list(all, json, &db_path).await?,
        Some(Commands::Show { id, json }) => run_show(&id, json, &db_path).await?,
        Some(Commands::Edit { id, title, body }) => {
            run_edit(&id, title.as_deref(), body.as_deref(), &db_path).await?;
        }
        Some(Commands::Delete { id }) => run_delete(&id, &db_path).await?,
        Some(Commands::Sync { json }) => run_sync(json, &db_path, config_path).await?,
        Some(Commands::Status { json }) => run_status(json, &db_path, config_path).await?,
        Some(Commands::Conflicts { json }) => run_conflicts(json, &db_path).await?,
        Some(Commands::Retry) => run_retry(&db_path).await?,
        Some(Commands::Watch) => run_watch(&db_path, config_path).await?,
        None => {
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}

fn init_tracing() {
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = "notesync=info".parse() {
        filter = filter.add_directive(directive);
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
