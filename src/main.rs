mod cli;

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cli::{Cli, Commands};
use kiosk::prelude::*;

/// Surface for headless runs: every presentation step becomes a log line.
struct LogSurface;

#[async_trait]
impl Surface for LogSurface {
    async fn apply_window(&self, config: &PlayerConfig) -> kiosk::Result<()> {
        info!(width = config.width, height = config.height, x = config.x, y = config.y, fullscreen = config.fullscreen, "window");
        Ok(())
    }
    async fn show_idle(&self) -> kiosk::Result<()> {
        info!("waiting for content");
        Ok(())
    }
    async fn show_image(&self, path: &str, scale: ScaleMode) -> kiosk::Result<()> {
        info!(%path, ?scale, "image");
        Ok(())
    }
    async fn load_video(&self, path: &str, scale: ScaleMode) -> kiosk::Result<()> {
        info!(%path, ?scale, "video loaded");
        Ok(())
    }
    async fn play_video(&self) -> kiosk::Result<()> {
        info!("video playing");
        Ok(())
    }
    async fn show_page(&self, url: &str) -> kiosk::Result<()> {
        info!(%url, "page");
        Ok(())
    }
    async fn blank(&self) -> kiosk::Result<()> {
        info!("blank");
        Ok(())
    }
    async fn pause_media(&self) -> kiosk::Result<()> {
        info!("media paused");
        Ok(())
    }
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(l) => EnvFilter::new(l),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| "kiosk=info".into()),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(url) = cli.database_url { settings.database_url = Some(url); }
    if let Some(url) = cli.api_url { settings.api_base_url = url; }
    if let Some(dir) = cli.cache_dir { settings.cache_dir = Some(dir); }

    let kiosk = Kiosk::connect(settings).await?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => kiosk.run(LogSurface).await?,
        Commands::Sync => {
            let report = kiosk.sync_once().await?;
            if !report.fetched {
                eprintln!("catalog unavailable, showing local content");
            }
            println!("{}", serde_json::to_string_pretty(&kiosk.playlist().await?)?);
        }
        Commands::Playlist => {
            println!("{}", serde_json::to_string_pretty(&kiosk.playlist().await?)?);
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&kiosk.player_config().await?)?);
        }
    }
    Ok(())
}
