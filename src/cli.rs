use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Unattended kiosk player
#[derive(Parser)]
#[command(name = "kiosk")]
#[command(about = "Mirrors a remote media catalog locally and plays it in a loop", long_about = None)]
pub struct Cli {
    /// Path to a TOML settings file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Database URL (defaults to a SQLite file in the user data directory)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Base URL of the content server
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Directory for downloaded media
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `kiosk=trace` (overrides RUST_LOG)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sync periodically and play forever (default)
    Run,
    /// Sync once, wait for downloads, print the playlist
    Sync,
    /// Print the current playable set as JSON
    Playlist,
    /// Print the effective player window config as JSON
    Config,
}
