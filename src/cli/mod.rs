//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the appropriate commands.

pub mod conversation;
pub mod say;

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::debug;

use crate::cli::conversation::{clear_history, export_history, import_history, print_history};
use crate::cli::say::run_say;
use crate::core::config::data::Config;
use crate::core::snapshot::FileSnapshotStore;
use crate::core::store::{MessageStore, StoreLimits};
use crate::utils::logging::init_logging;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("VERGEN_GIT_SHA"),
    ")"
);

#[derive(Parser)]
#[command(name = "palaver", version = VERSION)]
#[command(about = "Stream replies from a chat backend and keep a local conversation log")]
#[command(
    long_about = "Palaver sends a message to a streaming chat backend, prints the reply as it \
arrives, and records both turns in a bounded conversation log kept on disk.\n\n\
Configuration:\n\
  Settings are read from config.toml in the platform config directory, or from\n\
  the file given with --config.\n\n\
Environment Variables:\n\
  PALAVER_LOG       Log filter (falls back to RUST_LOG, default \"warn\")\n\n\
Controls:\n\
  Ctrl+C            Cancel the reply that is streaming"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Write diagnostic logs to this file instead of stderr
    #[arg(short = 'l', long, global = true)]
    pub log: Option<PathBuf>,

    /// Read configuration from this file
    #[arg(short = 'c', long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Continue an existing backend conversation
    #[arg(short = 's', long, global = true, value_name = "ID")]
    pub session: Option<String>,

    /// Ask the backend to reason before answering
    #[arg(long, global = true)]
    pub think: bool,

    /// Sampling temperature sent with the request
    #[arg(short = 't', long, global = true)]
    pub temperature: Option<f64>,

    /// Attach a previously uploaded file (repeatable)
    #[arg(long = "file-id", global = true, value_name = "ID")]
    pub file_ids: Vec<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send one message and stream the reply
    Say {
        /// Message text (joined with spaces)
        #[arg(trailing_var_arg = true, required = true)]
        prompt: Vec<String>,
    },
    /// Print the stored conversation
    History,
    /// Write the stored conversation as JSON
    Export {
        /// Output file; stdout when omitted
        path: Option<PathBuf>,
    },
    /// Replace the stored conversation with a JSON export
    Import {
        /// File produced by `palaver export`
        path: PathBuf,
    },
    /// Forget the stored conversation
    Clear,
}

/// Options that shape one chat request, gathered from the global flags.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub session: Option<String>,
    pub think: bool,
    pub temperature: Option<f64>,
    pub file_ids: Vec<String>,
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logging(args.log.as_deref())?;

    tokio::runtime::Runtime::new()?.block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<(), Box<dyn Error>> {
    let config = match &args.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    let options = RequestOptions {
        session: args.session,
        think: args.think,
        temperature: args.temperature,
        file_ids: args.file_ids,
    };
    let mut store = open_store(&config);

    match args.command {
        Commands::Say { prompt } => run_say(&config, &mut store, prompt, options).await,
        Commands::History => print_history(&store),
        Commands::Export { path } => export_history(&store, path.as_deref()),
        Commands::Import { path } => import_history(&mut store, &path),
        Commands::Clear => {
            clear_history(&mut store);
            Ok(())
        }
    }
}

/// Build the conversation store described by `config`, restoring any
/// snapshot when persistence is on.
pub fn open_store(config: &Config) -> MessageStore {
    let limits = StoreLimits::from(config);
    let Some(dir) = config.data_dir().filter(|_| config.persistence()) else {
        debug!("Conversation persistence disabled");
        return MessageStore::new(limits);
    };

    let mut storage = FileSnapshotStore::new(dir);
    if let Some(quota) = config.storage_quota_bytes() {
        storage = storage.with_quota(quota);
    }
    let mut store = MessageStore::with_storage(limits, Box::new(storage));
    store.enable_persistence(true);
    store
}
