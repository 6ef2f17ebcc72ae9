//! # fedline
//!
//! Command-line host for the fedline sync engine.
//!
//! ## Commands
//!
//! - `login`: Sign in with handle and password
//! - `oauth`: Sign in through the browser
//! - `whoami`: Show the current session
//! - `timeline`: Sync and print a timeline
//! - `logout`: Sign out and forget the session
//!
//! ## Example
//!
//! ```bash
//! # Sign in (password is prompted)
//! fedline login --handle alice.bsky.social
//!
//! # Home timeline, then the next page
//! fedline timeline
//! fedline timeline --more
//!
//! # One author's posts
//! fedline timeline --author did:plc:abc123
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod app;
mod commands;

use app::App;
use commands::{login, logout, oauth, timeline, whoami};

/// Command-line host for the fedline sync engine.
#[derive(Parser, Debug)]
#[command(name = "fedline")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Data directory for the local cache and session
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Configuration file (default: fedline.toml in the data directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sign in with handle and password
    Login {
        /// Account handle
        #[arg(long)]
        handle: String,

        /// Password or app password (will prompt if not provided)
        #[arg(long, short)]
        password: Option<String>,
    },

    /// Sign in through the browser (OAuth)
    Oauth {
        /// Account handle
        #[arg(long)]
        handle: String,
    },

    /// Show the current session
    Whoami,

    /// Sync and print a timeline (home timeline by default)
    Timeline {
        /// Custom feed URI
        #[arg(long, conflicts_with_all = ["author", "list"])]
        feed: Option<String>,

        /// Author did
        #[arg(long, conflicts_with_all = ["feed", "list"])]
        author: Option<String>,

        /// List URI
        #[arg(long, conflicts_with_all = ["feed", "author"])]
        list: Option<String>,

        /// Load the next page instead of refreshing
        #[arg(long)]
        more: bool,
    },

    /// Sign out and forget the session
    Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Determine data directory
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };

    // Ensure data directory exists
    tokio::fs::create_dir_all(&data_dir)
        .await
        .context("Failed to create data directory")?;

    let app = App::open(&data_dir, cli.config.as_deref()).await?;

    match cli.command {
        Commands::Login { handle, password } => {
            login::run(&app, &handle, password).await?;
        }
        Commands::Oauth { handle } => {
            let stdin = std::io::stdin();
            oauth::run(&app, &handle, stdin.lock()).await?;
        }
        Commands::Whoami => {
            whoami::run(&app);
        }
        Commands::Timeline {
            feed,
            author,
            list,
            more,
        } => {
            let key = timeline::key_from_flags(feed, author, list)?;
            timeline::run(&app, key, more).await?;
        }
        Commands::Logout => {
            logout::run(&app).await;
        }
    }

    Ok(())
}

/// Get the default data directory for fedline.
fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("io", "fedline", "fedline")
        .context("Could not determine home directory")?;
    Ok(dirs.data_dir().to_path_buf())
}
