//! # cbt2git CLI
//!
//! The `cbt2git` binary mirrors the CBT Tape, converts its archives into
//! git repositories and catalogs their contents.
//!
//! ## Usage
//!
//! ```bash
//! cbt2git --config ./config/cbt2git.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cbt2git init` | Create the SQLite catalog and run schema migrations |
//! | `cbt2git fetch` | Refresh the stage from the remote mirror |
//! | `cbt2git convert` | Convert new or changed staged archives into repositories |
//! | `cbt2git scan` | Catalog staged archives without building trees |
//! | `cbt2git unpack <ARCHIVE> --into <DIR>` | Convert one archive, no catalog or git |
//!
//! Diagnostics go to stderr and honour `RUST_LOG`; stdout carries the
//! command summaries.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use cbt2git::config;
use cbt2git::convert::{self, ConvertOptions};
use cbt2git::fetch::{self, FetchOptions};
use cbt2git::migrate;
use cbt2git::progress::ProgressMode;
use cbt2git::report;

/// cbt2git turns CBT Tape XMIT archives into git repositories.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/cbt2git.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "cbt2git",
    about = "Turns CBT Tape XMIT archives into git repositories with ISPF metadata",
    version,
    long_about = "cbt2git downloads CBT Tape archives, decodes the TSO XMIT transmissions and \
    IEBCOPY unloads inside them, and lays every member out as a file, keeping dataset \
    attributes and ISPF statistics alongside so the content can return to a mainframe."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/cbt2git.toml`.
    #[arg(long, global = true, default_value = "./config/cbt2git.toml")]
    config: PathBuf,

    /// Progress on stderr: `off`, `human` or `json`.
    ///
    /// Defaults to `human` when stderr is a terminal, otherwise `off`.
    #[arg(long, global = true, value_parser = parse_progress)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the catalog database.
    ///
    /// Creates the SQLite file and its tables. Safe to run repeatedly.
    Init,

    /// Download new and updated archives into the stage.
    ///
    /// Reads the remote table of contents, records it in the catalog and
    /// downloads every archive whose remote size differs from the staged copy.
    Fetch {
        /// Only archives flagged as updated since the last tape release.
        #[arg(long)]
        updates: bool,

        /// Download even when sizes match.
        #[arg(long)]
        force: bool,
    },

    /// Convert new or changed staged archives into repositories.
    Convert {
        /// Only this archive number (e.g. `1` for CBT001).
        #[arg(long)]
        only: Option<u32>,

        /// Convert even when the staged copy is unchanged.
        #[arg(long)]
        force: bool,

        /// Build trees without committing.
        #[arg(long)]
        no_commit: bool,

        /// Commit but do not push to the forge.
        #[arg(long)]
        no_push: bool,
    },

    /// Catalog every staged archive without building trees.
    Scan {
        /// Only this archive number.
        #[arg(long)]
        only: Option<u32>,

        /// Write the rows as JSON to this file.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Convert a single archive into a directory tree.
    ///
    /// Needs no catalog and never touches git. Runs with default settings
    /// when the config file is absent.
    Unpack {
        /// Distribution zip holding one XMIT file.
        archive: PathBuf,

        /// Directory that receives `<ID>/`.
        #[arg(long)]
        into: PathBuf,

        /// Archive id; defaults to the file name without extension.
        #[arg(long)]
        id: Option<String>,
    },
}

fn parse_progress(s: &str) -> Result<ProgressMode, String> {
    ProgressMode::parse(s).ok_or_else(|| format!("invalid progress mode '{}'", s))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // Single-archive conversion works without a config file
    if let Commands::Unpack { archive, into, id } = &cli.command {
        let cfg = if cli.config.exists() {
            config::load_config(&cli.config)?
        } else {
            config::Config::minimal()
        };
        convert::run_unpack(&cfg, archive, into, id.as_deref())?;
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    let progress = cli
        .progress
        .unwrap_or_else(ProgressMode::default_for_tty)
        .reporter();

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Catalog initialized successfully.");
        }
        Commands::Fetch { updates, force } => {
            let opts = FetchOptions {
                force,
                updates_only: updates,
                workers: cfg.remote.workers,
            };
            fetch::run_fetch(&cfg, &opts, progress.as_ref()).await?;
        }
        Commands::Convert {
            only,
            force,
            no_commit,
            no_push,
        } => {
            let opts = ConvertOptions {
                only,
                force,
                no_commit,
                no_push,
            };
            convert::run_convert(&cfg, &opts, progress.as_ref()).await?;
        }
        Commands::Scan { only, output } => {
            report::run_scan(&cfg, only, output.as_deref(), progress.as_ref()).await?;
        }
        Commands::Unpack { .. } => {
            // Handled above
            unreachable!()
        }
    }

    Ok(())
}
