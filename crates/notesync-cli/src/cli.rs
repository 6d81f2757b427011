use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "notesync")]
#[command(about = "Offline-first notes that sync when the network allows")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the JSON sync config
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new note
    #[command(alias = "new")]
    Add {
        /// Note title
        #[arg(required = true)]
        title: Vec<String>,
        /// Note body (read from piped stdin when omitted)
        #[arg(short, long)]
        body: Option<String>,
    },
    /// List notes, most recently updated first
    #[command(alias = "ls")]
    List {
        /// Include deleted notes still waiting to sync
        #[arg(long)]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a single note
    Show {
        /// Note ID or unique ID prefix
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit an existing note
    Edit {
        /// Note ID or unique ID prefix
        id: String,
        /// Replacement title
        #[arg(short, long)]
        title: Option<String>,
        /// Replacement body (opens $EDITOR when neither flag is given)
        #[arg(short, long)]
        body: Option<String>,
    },
    /// Delete an existing note
    #[command(alias = "rm")]
    Delete {
        /// Note ID or unique ID prefix
        id: String,
    },
    /// Push queued changes and pull remote ones
    Sync {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show queue length and last sync times
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List notes in conflict or failed state
    Conflicts {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Re-queue operations that exhausted their retries
    Retry,
    /// Keep syncing in the foreground until interrupted
    Watch,
}
