use anyhow::{Context, Result};
use async_trait::async_trait;
use directories::ProjectDirs;
use sqlx::{any::AnyConnectOptions, AnyPool, ConnectOptions, migrate::Migrator};
use sqlx::any::AnyPoolOptions;
use std::path::Path;
use std::{path::PathBuf, str::FromStr};
use std::sync::Once;

use crate::dao;
use crate::storage::ContentStore;
use crate::types::{ContentItem, DownloadStatus, PlayerConfig};

// Ensure drivers are installed exactly once for sqlx::any
static INSTALL_DRIVERS: Once = Once::new();

// Embed SQL migrations from the migrations/ directory
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed content store.
#[derive(Clone)]
pub struct Database {
    pool: AnyPool,
}

impl Database {
    // Create a connection pool. If database_url is None, use a sensible default
    // (SQLite file in the user's data directory).
    pub async fn connect(database_url: Option<&str>) -> Result<Self> {
        // Register compiled-in drivers for sqlx::any
        INSTALL_DRIVERS.call_once(sqlx::any::install_default_drivers);

        let url = match database_url {
            Some(u) if !u.trim().is_empty() => u.to_string(),
            _ => default_sqlite_url()?,
        };

        // Parse options to tweak connection settings (e.g., logging)
        let opts = AnyConnectOptions::from_str(&url)
            .with_context(|| format!("invalid database URL: {url}"))?;
        // Quiet by default; callers can enable SQLX_LOG if they want
        let opts = opts.disable_statement_logging();

        // An in-memory database lives and dies with its connection: keep exactly one, forever
        let pool_opts = if url.contains(":memory:") {
            AnyPoolOptions::new().max_connections(1).idle_timeout(None).max_lifetime(None)
        } else {
            AnyPoolOptions::new().max_connections(4)
        };

        let pool = pool_opts
            .connect_with(opts)
            .await
            .with_context(|| format!("failed to connect to database: {url}"))?;

        Ok(Self { pool })
    }

    /// Connect and apply migrations in one go.
    pub async fn open(database_url: Option<&str>) -> Result<Self> {
        let db = Self::connect(database_url).await?;
        db.run_migrations().await?;
        Ok(db)
    }

    pub async fn run_migrations(&self) -> Result<()> {
        match MIGRATOR.run(&self.pool).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let msg = e.to_string();
                let looks_modified = msg.contains("was previously applied but has been modified");
                if looks_modified {
                    let _ = sqlx::query("DELETE FROM _sqlx_migrations").execute(&self.pool).await;
                    MIGRATOR.run(&self.pool).await.context("running migrations after ledger reset")
                } else {
                    Err(e).context("running migrations")
                }
            }
        }
    }

    pub fn pool(&self) -> &AnyPool { &self.pool }
}

#[async_trait]
impl ContentStore for Database {
    async fn find_content(&self, url: &str) -> crate::Result<Option<ContentItem>> {
        dao::find_content(&self.pool, url).await
    }

    async fn list_content(&self) -> crate::Result<Vec<ContentItem>> {
        dao::list_content(&self.pool).await
    }

    async fn insert_content(&self, item: &ContentItem) -> crate::Result<()> {
        dao::insert_content(&self.pool, item).await
    }

    async fn update_content(&self, item: &ContentItem) -> crate::Result<()> {
        dao::update_content(&self.pool, item).await
    }

    async fn delete_content(&self, url: &str) -> crate::Result<u64> {
        dao::delete_content(&self.pool, url).await
    }

    async fn set_download_status(&self, url: &str, status: DownloadStatus, local_path: Option<&Path>) -> crate::Result<bool> {
        dao::set_download_status(&self.pool, url, status, local_path).await
    }

    async fn load_player_config(&self) -> crate::Result<Option<PlayerConfig>> {
        dao::get_player_config(&self.pool).await
    }

    async fn save_player_config(&self, config: &PlayerConfig) -> crate::Result<()> {
        dao::upsert_player_config(&self.pool, config).await
    }
}

pub(crate) fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "kiosk", "kiosk")
}

fn default_sqlite_url() -> Result<String> {
    let proj = project_dirs()
        .context("unable to determine data directory for default sqlite path")?;
    let mut path: PathBuf = proj.data_dir().to_path_buf();
    std::fs::create_dir_all(&path).with_context(|| format!("creating data dir: {}", path.display()))?;
    path.push("kiosk.db");

    // Ensure the file exists so SQLite can open it in rw mode
    let _ = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path);

    // Encode spaces in the path for a valid sqlite URL
    let mut path_str = path.to_string_lossy().to_string();
    if path_str.contains(' ') { path_str = path_str.replace(' ', "%20"); }
    Ok(format!("sqlite:///{path_str}?mode=rwc"))
}
