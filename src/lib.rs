pub mod api;
pub mod dao;
pub mod db;
pub mod downloader;
pub mod error;
pub mod ingest;
pub mod mapping;
pub mod player;
pub mod playlist;
pub mod scheduler;
pub mod settings;
pub mod storage;
pub mod sync;
pub mod types;

pub use error::{Error, Result};

// --- Library API for embedding ---

/// Convenience re-exports for embedders.
pub mod prelude {
    pub use crate::api::{CatalogSource, HttpCatalog};
    pub use crate::downloader::{DownloadManager, Fetcher, HttpFetcher};
    pub use crate::ingest::{Ingestor, TickReport};
    pub use crate::mapping::ContentDescriptor;
    pub use crate::scheduler::{Iteration, Phase, Scheduler, SchedulerTiming, Surface};
    pub use crate::settings::Settings;
    pub use crate::storage::{ContentStore, MemoryStore};
    pub use crate::types::{ContentItem, ContentKind, DownloadStatus, PlayableItem, PlayerConfig, ScaleMode, Timestamp};
    pub use crate::Kiosk;
}

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};

use crate::api::{CatalogSource, HttpCatalog};
use crate::db::Database;
use crate::downloader::{DownloadManager, Fetcher, HttpFetcher};
use crate::ingest::{Ingestor, TickReport};
use crate::player::resolve_player_config;
use crate::playlist::PlaylistResolver;
use crate::scheduler::{Scheduler, Surface};
use crate::settings::Settings;
use crate::storage::ContentStore;
use crate::sync::Reconciler;
use crate::types::{PlayableItem, PlayerConfig, Timestamp};

/// High-level facade wiring the store, the catalog client, the download queue and the
/// ingestion loop together.
pub struct Kiosk {
    settings: Settings,
    store: Arc<dyn ContentStore>,
    source: Arc<dyn CatalogSource>,
    downloads: DownloadManager,
    ingestor: Arc<Ingestor>,
}

impl Kiosk {
    /// Open the database (running migrations) and build the HTTP collaborators.
    pub async fn connect(settings: Settings) -> anyhow::Result<Self> {
        settings.validate()?;
        let db = Database::open(settings.database_url.as_deref()).await?;
        let source = HttpCatalog::new(&settings.api_base_url, &settings.content_path, &settings.player_path)?;
        let fetcher = HttpFetcher::new()?;
        Self::with_parts(settings, Arc::new(db), Arc::new(source), Arc::new(fetcher)).await
    }

    /// Assemble from explicit collaborators. Creates the cache directory if needed.
    pub async fn with_parts(
        settings: Settings,
        store: Arc<dyn ContentStore>,
        source: Arc<dyn CatalogSource>,
        fetcher: Arc<dyn Fetcher>,
    ) -> anyhow::Result<Self> {
        let cache_dir = settings.resolved_cache_dir();
        tokio::fs::create_dir_all(&cache_dir)
            .await
            .with_context(|| format!("creating cache dir: {}", cache_dir.display()))?;

        let downloads = DownloadManager::new(store.clone(), fetcher, cache_dir, settings.max_download_attempts);
        let reconciler = Reconciler::new(store.clone(), downloads.clone());
        let ingestor = Arc::new(Ingestor::new(source.clone(), reconciler, PlaylistResolver::new(store.clone())));
        Ok(Self { settings, store, source, downloads, ingestor })
    }

    pub fn settings(&self) -> &Settings { &self.settings }
    pub fn store(&self) -> &Arc<dyn ContentStore> { &self.store }
    pub fn downloads(&self) -> &DownloadManager { &self.downloads }
    pub fn ingestor(&self) -> &Arc<Ingestor> { &self.ingestor }

    /// Remote player config when reachable, else the stored one, else the default.
    pub async fn player_config(&self) -> Result<PlayerConfig> {
        resolve_player_config(self.source.as_ref(), self.store.as_ref()).await
    }

    /// The playable set as of now, without touching the network.
    pub async fn playlist(&self) -> Result<Vec<PlayableItem>> {
        self.ingestor.resolver().resolve(Timestamp::now()).await
    }

    /// One full sync: fetch and reconcile, wait for queued downloads, then publish again so
    /// the result includes what just landed.
    pub async fn sync_once(&self) -> Result<TickReport> {
        let mut report = self.ingestor.tick().await?.unwrap_or_default();
        self.downloads.wait_idle().await;
        report.published = self.ingestor.publish().await?;
        Ok(report)
    }

    /// Apply the player config to `surface`, start periodic ingestion and play forever.
    pub async fn run<S: Surface>(&self, surface: S) -> anyhow::Result<()> {
        let config = self.player_config().await?;
        surface.apply_window(&config).await?;
        info!(width = config.width, height = config.height, fullscreen = config.fullscreen, "player window ready");

        let scheduler = Scheduler::new(surface, self.ingestor.subscribe(), self.settings.timing());
        let ingest = tokio::spawn(self.ingestor.clone().run(self.settings.sync_interval()));

        tokio::select! {
            () = scheduler.run() => Ok(()),
            joined = ingest => {
                error!("ingestion loop stopped");
                joined.context("ingestion task failed")
            }
        }
    }
}
