//! Periodic catalog ingestion.
//!
//! Each tick fetches the catalog, reconciles the store and the file cache against it, then
//! resolves the playable set and publishes it to the scheduler. Publishing goes through a
//! `watch` channel so the scheduler only ever sees the most recent playlist.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::api::CatalogSource;
use crate::error::Result;
use crate::playlist::PlaylistResolver;
use crate::sync::{FileSyncResult, Reconciler, ReconcileResult};
use crate::types::{PlayableItem, Timestamp};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// False when the catalog could not be fetched and reconciliation was skipped.
    pub fetched: bool,
    pub reconcile: Option<ReconcileResult>,
    pub files: Option<FileSyncResult>,
    pub published: usize,
}

pub struct Ingestor {
    source: Arc<dyn CatalogSource>,
    reconciler: Reconciler,
    resolver: PlaylistResolver,
    playlists: watch::Sender<Vec<PlayableItem>>,
    busy: AtomicBool,
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) { self.0.store(false, Ordering::Release); }
}

impl Ingestor {
    pub fn new(source: Arc<dyn CatalogSource>, reconciler: Reconciler, resolver: PlaylistResolver) -> Self {
        let (playlists, _) = watch::channel(Vec::new());
        Self { source, reconciler, resolver, playlists, busy: AtomicBool::new(false) }
    }

    /// A receiver that always holds the latest published playlist.
    pub fn subscribe(&self) -> watch::Receiver<Vec<PlayableItem>> { self.playlists.subscribe() }

    pub fn reconciler(&self) -> &Reconciler { &self.reconciler }
    pub fn resolver(&self) -> &PlaylistResolver { &self.resolver }

    /// Resolve the playable set as of now and hand it to subscribers.
    pub async fn publish(&self) -> Result<usize> {
        let playlist = self.resolver.resolve(Timestamp::now()).await?;
        let n = playlist.len();
        self.playlists.send_replace(playlist);
        debug!(items = n, "published playlist");
        Ok(n)
    }

    /// Run one ingestion pass. Returns `Ok(None)` without doing anything when another pass
    /// is still running.
    pub async fn tick(&self) -> Result<Option<TickReport>> {
        if self.busy.swap(true, Ordering::AcqRel) {
            debug!("previous sync still running, skipping tick");
            return Ok(None);
        }
        let _guard = BusyGuard(&self.busy);

        let mut report = TickReport::default();
        match self.source.fetch_catalog().await {
            Ok(catalog) => {
                report.fetched = true;
                report.reconcile = Some(self.reconciler.reconcile(&catalog).await);
                match self.reconciler.sync_files(&catalog).await {
                    Ok(files) => report.files = Some(files),
                    Err(e) => warn!(error = %e, "file cache sync failed"),
                }
            }
            // Keep the local copy untouched rather than treat an outage as an empty catalog
            Err(e) => warn!(error = %e, "catalog unavailable, keeping local content"),
        }

        report.published = self.publish().await?;
        Ok(Some(report))
    }

    /// Publish what is already stored, then sync every `period` until the task is dropped.
    pub async fn run(self: Arc<Self>, period: Duration) {
        if let Err(e) = self.publish().await {
            error!(error = %e, "initial playlist resolution failed");
        }

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            match self.tick().await {
                Ok(Some(report)) => info!(fetched = report.fetched, playable = report.published, "sync finished"),
                Ok(None) => {}
                Err(e) => error!(error = %e, "sync failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::{DownloadManager, Fetcher};
    use crate::error::Error;
    use crate::mapping::ContentDescriptor;
    use crate::storage::{ContentStore, MemoryStore};
    use crate::types::{ContentKind, PlayerConfig};
    use async_trait::async_trait;
    use std::path::Path;
    use tokio::sync::{Mutex, Notify};

    struct WriteUrl;

    #[async_trait]
    impl Fetcher for WriteUrl {
        async fn fetch(&self, url: &str, dest: &Path) -> Result<u64> {
            tokio::fs::write(dest, url).await.map_err(|e| Error::file_cache(dest, e))?;
            Ok(url.len() as u64)
        }
    }

    /// Serves whatever catalog it holds; `None` simulates an unreachable server.
    #[derive(Default)]
    struct ScriptedCatalog {
        catalog: Mutex<Option<Vec<ContentDescriptor>>>,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedCatalog {
        async fn serve(&self, catalog: Option<Vec<ContentDescriptor>>) { *self.catalog.lock().await = catalog; }
    }

    #[async_trait]
    impl CatalogSource for ScriptedCatalog {
        async fn fetch_catalog(&self) -> Result<Vec<ContentDescriptor>> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.catalog.lock().await.clone().ok_or_else(|| Error::CatalogFetch("connection refused".into()))
        }

        async fn fetch_player_config(&self) -> Result<PlayerConfig> { Ok(PlayerConfig::default()) }
    }

    fn desc(url: &str, kind: ContentKind, position: i64) -> ContentDescriptor {
        ContentDescriptor {
            kind,
            url: url.to_string(),
            length: 5.0,
            position,
            fill_screen: false,
            from_date: "2000-01-01 00:00:00".into(),
            to_date: "2099-01-01 00:00:00".into(),
            updated_at: "2024-01-01 00:00:00".into(),
        }
    }

    fn setup(source: Arc<ScriptedCatalog>) -> (Arc<MemoryStore>, Ingestor, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let downloads = DownloadManager::new(store.clone(), Arc::new(WriteUrl), dir.path(), 3);
        let reconciler = Reconciler::new(store.clone(), downloads);
        let ingestor = Ingestor::new(source, reconciler, PlaylistResolver::new(store.clone()));
        (store, ingestor, dir)
    }

    fn urls(list: &[PlayableItem]) -> Vec<&str> { list.iter().map(|p| p.url.as_str()).collect() }

    #[tokio::test]
    async fn downloaded_items_reach_the_playlist() {
        let source = Arc::new(ScriptedCatalog::default());
        source
            .serve(Some(vec![
                desc("https://cdn.test/a.mp4", ContentKind::Video, 2),
                desc("https://example.com/page", ContentKind::EmbeddedPage, 1),
            ]))
            .await;
        let (_store, ingestor, _dir) = setup(source);
        let rx = ingestor.subscribe();

        let report = ingestor.tick().await.unwrap().unwrap();
        assert!(report.fetched);
        assert_eq!(report.reconcile.unwrap().inserted, 2);
        assert!(urls(&rx.borrow()).contains(&"https://example.com/page"));

        ingestor.reconciler().downloads().wait_idle().await;
        ingestor.publish().await.unwrap();
        assert_eq!(urls(&rx.borrow()), vec!["https://example.com/page", "https://cdn.test/a.mp4"]);
    }

    #[tokio::test]
    async fn fetch_failure_keeps_local_content() {
        let source = Arc::new(ScriptedCatalog::default());
        source.serve(Some(vec![desc("https://example.com/page", ContentKind::EmbeddedPage, 1)])).await;
        let (store, ingestor, _dir) = setup(source.clone());
        ingestor.tick().await.unwrap();

        source.serve(None).await;
        let report = ingestor.tick().await.unwrap().unwrap();
        assert!(!report.fetched);
        assert!(report.reconcile.is_none());
        assert_eq!(report.published, 1);
        assert_eq!(store.list_content().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_catalog_clears_the_playlist() {
        let source = Arc::new(ScriptedCatalog::default());
        source.serve(Some(vec![desc("https://example.com/page", ContentKind::EmbeddedPage, 1)])).await;
        let (store, ingestor, _dir) = setup(source.clone());
        let rx = ingestor.subscribe();
        ingestor.tick().await.unwrap();
        assert_eq!(rx.borrow().len(), 1);

        source.serve(Some(Vec::new())).await;
        let report = ingestor.tick().await.unwrap().unwrap();
        assert!(report.fetched);
        assert_eq!(report.reconcile.unwrap().deleted, 1);
        assert!(rx.borrow().is_empty());
        assert!(store.list_content().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn overlapping_tick_is_skipped() {
        let gate = Arc::new(Notify::new());
        let source = Arc::new(ScriptedCatalog { catalog: Mutex::new(Some(Vec::new())), gate: Some(gate.clone()) });
        let (_store, ingestor, _dir) = setup(source);
        let ingestor = Arc::new(ingestor);

        let first = tokio::spawn({
            let ingestor = ingestor.clone();
            async move { ingestor.tick().await }
        });
        while !ingestor.busy.load(Ordering::Acquire) {
            tokio::task::yield_now().await;
        }
        assert!(ingestor.tick().await.unwrap().is_none());

        gate.notify_one();
        assert!(first.await.unwrap().unwrap().is_some());
        assert!(!ingestor.busy.load(Ordering::Acquire));
    }
}
