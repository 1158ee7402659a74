use std::env;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{AppConfig, ConfigLoader};
use crate::storage::{self, LocalStore, MemoryStore};

pub mod commands;

use self::commands::{SendArgs, ThemeArgs};

#[derive(Parser, Debug)]
#[command(
    name = "folio",
    version,
    about = "Terminal portfolio with an offline-tolerant contact form"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Override the config file location (takes precedence over FOLIO_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the data directory (takes precedence over FOLIO_DATA)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Keep everything in memory; nothing is read from or written to disk
    #[arg(long, global = true)]
    pub ephemeral: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Launch the interactive portfolio (default)
    Tui,
    /// Send one contact message, queueing it if the endpoint is unreachable
    Send(SendArgs),
    /// Retry every queued message once
    Sync,
    /// List queued messages
    Queue,
    /// Show or change the persisted theme
    Theme(ThemeArgs),
    /// Keep retrying queued messages until interrupted
    Watch,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        env::set_var("FOLIO_CONFIG", path);
    }
    if let Some(path) = &cli.data_dir {
        env::set_var("FOLIO_DATA", path);
    }

    let loader = ConfigLoader::discover()?;
    loader.paths().ensure_directories()?;
    let paths = loader.paths().clone();
    let command = cli.command.unwrap_or(Commands::Tui);

    let log_target = match command {
        Commands::Tui => LogTarget::File(paths.log_dir.join("folio.log")),
        _ => LogTarget::Stderr,
    };
    init_tracing(&cli.log_level, &log_target)
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;
    let config = Arc::new(loader.load_or_init()?);
    let store = open_store(&config, cli.ephemeral)?;

    match command {
        Commands::Tui => commands::run_tui(config, store),
        Commands::Send(args) => {
            print!("{}", commands::send_message(&config, store, args)?);
            Ok(())
        }
        Commands::Sync => {
            print!("{}", commands::sync_queue(&config, store)?);
            Ok(())
        }
        Commands::Queue => {
            print!("{}", commands::list_queue(store)?);
            Ok(())
        }
        Commands::Theme(args) => {
            print!("{}", commands::handle_theme_command(&config, store, args)?);
            Ok(())
        }
        Commands::Watch => commands::watch(config, store),
    }
}

fn open_store(config: &AppConfig, ephemeral: bool) -> Result<Arc<dyn LocalStore>> {
    if ephemeral {
        tracing::info!("using in-memory store");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let handle = storage::init(&config.storage)?;
    Ok(Arc::new(handle))
}

enum LogTarget {
    Stderr,
    File(PathBuf),
}

fn init_tracing(level: &str, target: &LogTarget) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        match target {
            LogTarget::Stderr => fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init(),
            LogTarget::File(path) => fmt()
                .with_env_filter(env_filter)
                .with_ansi(false)
                .with_writer(Mutex::new(open_log(path)?))
                .init(),
        }
        Ok(())
    })
    .map(|_| ())
}

fn open_log(path: &Path) -> Result<std::fs::File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening log file {}", path.display()))
}
