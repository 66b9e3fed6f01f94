//! Sequential download queue.
//!
//! One worker drains a FIFO of URLs, streaming each into the local cache directory and
//! recording `downloading` / `downloaded` / `not_downloaded` in the store. At most one
//! transfer is in flight at any time. Failed transfers are re-queued until the attempt
//! ceiling is reached, after which the item stays `not_downloaded` until a later sync
//! queues it again.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::mapping::cache_file_name;
use crate::storage::ContentStore;
use crate::types::DownloadStatus;

/// Transfers land here first and are renamed into the cache once complete.
const INCOMING_DIR: &str = ".incoming";

/// FIFO of URLs without duplicates.
#[derive(Debug, Default, Clone)]
pub struct DownloadQueue {
    entries: VecDeque<String>,
}

impl DownloadQueue {
    pub fn new() -> Self { Self::default() }

    /// Appends `url` unless it is already queued.
    pub fn push(&mut self, url: &str) -> bool {
        if self.contains(url) { return false; }
        self.entries.push_back(url.to_string());
        true
    }

    pub fn pop(&mut self) -> Option<String> { self.entries.pop_front() }
    pub fn contains(&self, url: &str) -> bool { self.entries.iter().any(|u| u == url) }
    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
    pub fn iter(&self) -> impl Iterator<Item = &str> { self.entries.iter().map(String::as_str) }
}

/// Moves the bytes behind a URL into a local file.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Writes the resource to `dest`, returning the number of bytes written.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("kiosk/0.1")
            .build()
            .map_err(|e| Error::transfer("<client>", e))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::transfer(url, e))?;

        let mut file = tokio::fs::File::create(dest).await.map_err(|e| Error::file_cache(dest, e))?;
        let mut stream = resp.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::transfer(url, e))?;
            file.write_all(&chunk).await.map_err(|e| Error::file_cache(dest, e))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| Error::file_cache(dest, e))?;
        Ok(written)
    }
}

#[derive(Default)]
struct QueueState {
    queue: DownloadQueue,
    in_flight: Option<String>,
    running: bool,
    attempts: HashMap<String, u32>,
}

struct Shared {
    store: Arc<dyn ContentStore>,
    fetcher: Arc<dyn Fetcher>,
    cache_dir: PathBuf,
    max_attempts: u32,
    state: Mutex<QueueState>,
    idle: watch::Sender<bool>,
}

/// Handle to the download queue; clones share the same queue and worker.
#[derive(Clone)]
pub struct DownloadManager {
    shared: Arc<Shared>,
}

impl DownloadManager {
    pub fn new(
        store: Arc<dyn ContentStore>,
        fetcher: Arc<dyn Fetcher>,
        cache_dir: impl Into<PathBuf>,
        max_attempts: u32,
    ) -> Self {
        let (idle, _) = watch::channel(true);
        Self {
            shared: Arc::new(Shared {
                store,
                fetcher,
                cache_dir: cache_dir.into(),
                max_attempts: max_attempts.max(1),
                state: Mutex::new(QueueState::default()),
                idle,
            }),
        }
    }

    pub fn cache_dir(&self) -> &Path { &self.shared.cache_dir }

    /// Queue `url` unless it is already queued or in flight; starts the worker when idle.
    /// Must be called from within a tokio runtime.
    pub async fn enqueue(&self, url: &str) -> bool {
        let mut state = self.shared.state.lock().await;
        if state.in_flight.as_deref() == Some(url) || !state.queue.push(url) {
            return false;
        }
        debug!(%url, queued = state.queue.len(), "queued download");
        if !state.running {
            state.running = true;
            self.shared.idle.send_replace(false);
            tokio::spawn(self.clone().drain());
        }
        true
    }

    /// URLs waiting for the worker, in order.
    pub async fn pending(&self) -> Vec<String> {
        self.shared.state.lock().await.queue.iter().map(str::to_string).collect()
    }

    pub async fn in_flight(&self) -> Option<String> {
        self.shared.state.lock().await.in_flight.clone()
    }

    /// Resolves once the worker has drained the queue.
    pub async fn wait_idle(&self) {
        let mut rx = self.shared.idle.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|idle| *idle).await;
    }

    /// Record an already-cached file for `url` as downloaded.
    pub async fn mark_cached(&self, url: &str) -> Result<bool> {
        let path = self.shared.cache_dir.join(cache_file_name(url)?);
        self.shared.store.set_download_status(url, DownloadStatus::Downloaded, Some(&path)).await
    }

    /// Names of the regular files currently in the cache directory.
    pub async fn cached_files(&self) -> Result<Vec<String>> {
        let dir = &self.shared.cache_dir;
        let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| Error::file_cache(dir, e))?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| Error::file_cache(dir, e))? {
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if is_file {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        Ok(names)
    }

    /// Delete every cached file whose name is not in `expected`. A file that cannot be
    /// removed is logged and skipped. Returns the names that were removed.
    pub async fn remove_orphans(&self, expected: &HashSet<String>) -> Result<Vec<String>> {
        let orphans = self.cached_files().await?.into_iter().filter(|name| !expected.contains(name));
        Ok(self.remove_cached(orphans).await)
    }

    async fn remove_cached(&self, names: impl IntoIterator<Item = String>) -> Vec<String> {
        let mut removed = Vec::new();
        for name in names {
            let path = self.shared.cache_dir.join(&name);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    info!(file = %name, "removed orphaned cache file");
                    removed.push(name);
                }
                Err(e) => warn!(error = %Error::file_cache(&path, e), "could not remove orphaned cache file"),
            }
        }
        removed
    }

    async fn drain(self) {
        loop {
            let url = {
                let mut state = self.shared.state.lock().await;
                match state.queue.pop() {
                    Some(url) => {
                        state.in_flight = Some(url.clone());
                        url
                    }
                    None => {
                        state.running = false;
                        self.shared.idle.send_replace(true);
                        return;
                    }
                }
            };
            self.process(&url).await;
            self.shared.state.lock().await.in_flight = None;
        }
    }

    async fn process(&self, url: &str) {
        let store = &self.shared.store;
        let attempt = {
            let mut state = self.shared.state.lock().await;
            let n = state.attempts.entry(url.to_string()).or_insert(0);
            *n += 1;
            *n
        };

        match store.find_content(url).await {
            Ok(None) => {
                debug!(%url, "no longer in the catalog, dropping download");
                self.shared.state.lock().await.attempts.remove(url);
                return;
            }
            Ok(Some(_)) => {}
            Err(e) => warn!(%url, error = %e, "store lookup failed, downloading anyway"),
        }

        if let Err(e) = store.set_download_status(url, DownloadStatus::Downloading, None).await {
            warn!(%url, error = %e, "could not mark item downloading");
        }

        match self.transfer(url).await {
            Ok(path) => {
                info!(%url, path = %path.display(), "download complete");
                if let Err(e) = store.set_download_status(url, DownloadStatus::Downloaded, Some(&path)).await {
                    warn!(%url, error = %e, "could not mark item downloaded");
                }
                self.shared.state.lock().await.attempts.remove(url);
            }
            Err(e) => {
                if let Err(e) = store.set_download_status(url, DownloadStatus::NotDownloaded, None).await {
                    warn!(%url, error = %e, "could not reset download status");
                }
                let mut state = self.shared.state.lock().await;
                if attempt < self.shared.max_attempts {
                    warn!(%url, attempt, error = %e, "download failed, will retry");
                    state.queue.push(url);
                } else {
                    error!(%url, attempts = attempt, error = %e, "download failed, giving up until next sync");
                    state.attempts.remove(url);
                }
            }
        }
    }

    async fn transfer(&self, url: &str) -> Result<PathBuf> {
        let name = cache_file_name(url)?;
        let incoming = self.shared.cache_dir.join(INCOMING_DIR);
        tokio::fs::create_dir_all(&incoming).await.map_err(|e| Error::file_cache(&incoming, e))?;

        let partial = incoming.join(&name);
        let dest = self.shared.cache_dir.join(&name);
        let result = match self.shared.fetcher.fetch(url, &partial).await {
            Ok(bytes) => {
                debug!(%url, bytes, "transfer finished");
                tokio::fs::rename(&partial, &dest).await.map_err(|e| Error::file_cache(&dest, e))
            }
            Err(e) => Err(e),
        };
        if result.is_err() {
            match tokio::fs::remove_file(&partial).await {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                    debug!(error = %Error::file_cache(&partial, e), "could not discard partial download");
                }
                _ => {}
            }
        }
        result.map(|()| dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::types::{ContentItem, ContentKind, Timestamp};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingFetcher {
        calls: AtomicU32,
        failures: u32,
    }

    impl CountingFetcher {
        fn new(failures: u32) -> Arc<Self> { Arc::new(Self { calls: AtomicU32::new(0), failures }) }
        fn calls(&self) -> u32 { self.calls.load(Ordering::SeqCst) }
    }

    #[async_trait]
    impl Fetcher for CountingFetcher {
        async fn fetch(&self, url: &str, dest: &Path) -> Result<u64> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::fs::write(dest, b"partial").await.map_err(|e| Error::file_cache(dest, e))?;
            if n < self.failures {
                return Err(Error::transfer(url, "connection reset"));
            }
            tokio::fs::write(dest, url.as_bytes()).await.map_err(|e| Error::file_cache(dest, e))?;
            Ok(url.len() as u64)
        }
    }

    fn video(url: &str) -> ContentItem {
        let t = Timestamp::parse("2024-01-01 00:00:00").unwrap();
        ContentItem {
            url: url.to_string(),
            kind: ContentKind::Video,
            length: 5.0,
            position: 1,
            fill_screen: false,
            valid_from: t,
            valid_to: t,
            updated_at: t,
            download_status: DownloadStatus::NotDownloaded,
            local_path: None,
        }
    }

    async fn setup(failures: u32, max_attempts: u32) -> (Arc<MemoryStore>, Arc<CountingFetcher>, DownloadManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let fetcher = CountingFetcher::new(failures);
        let manager = DownloadManager::new(store.clone(), fetcher.clone(), dir.path(), max_attempts);
        (store, fetcher, manager, dir)
    }

    #[test]
    fn queue_rejects_duplicates() {
        let mut q = DownloadQueue::new();
        assert!(q.push("a"));
        assert!(q.push("b"));
        assert!(!q.push("a"));
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop().as_deref(), Some("a"));
        assert_eq!(q.pop().as_deref(), Some("b"));
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn double_enqueue_downloads_once() {
        let (store, fetcher, manager, dir) = setup(0, 3).await;
        let url = "https://cdn.example.com/a.mp4";
        store.insert_content(&video(url)).await.unwrap();

        assert!(manager.enqueue(url).await);
        assert!(!manager.enqueue(url).await);
        assert_eq!(manager.pending().await, vec![url.to_string()]);

        manager.wait_idle().await;
        assert_eq!(fetcher.calls(), 1);

        let stored = store.find_content(url).await.unwrap().unwrap();
        assert_eq!(stored.download_status, DownloadStatus::Downloaded);
        assert_eq!(stored.local_path, Some(dir.path().join("a.mp4")));
        assert_eq!(tokio::fs::read(dir.path().join("a.mp4")).await.unwrap(), url.as_bytes());
    }

    #[tokio::test]
    async fn failed_transfers_retry_then_give_up() {
        let (store, fetcher, manager, dir) = setup(10, 3).await;
        let url = "https://cdn.example.com/b.png";
        store.insert_content(&video(url)).await.unwrap();

        manager.enqueue(url).await;
        manager.wait_idle().await;

        assert_eq!(fetcher.calls(), 3);
        let stored = store.find_content(url).await.unwrap().unwrap();
        assert_eq!(stored.download_status, DownloadStatus::NotDownloaded);
        assert!(stored.local_path.is_none());
        assert!(!dir.path().join("b.png").exists());
        assert!(!dir.path().join(INCOMING_DIR).join("b.png").exists());

        // Still eligible on the next sync
        assert!(manager.enqueue(url).await);
        manager.wait_idle().await;
        assert_eq!(fetcher.calls(), 6);
    }

    /// Fails before writing anything, like a refused connection.
    struct RefusingFetcher;

    #[async_trait]
    impl Fetcher for RefusingFetcher {
        async fn fetch(&self, url: &str, _dest: &Path) -> Result<u64> {
            Err(Error::transfer(url, "connection refused"))
        }
    }

    #[tokio::test]
    async fn failure_without_partial_file_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let manager = DownloadManager::new(store.clone(), Arc::new(RefusingFetcher), dir.path(), 2);
        let url = "https://cdn.example.com/e.png";
        store.insert_content(&video(url)).await.unwrap();

        manager.enqueue(url).await;
        manager.wait_idle().await;

        let stored = store.find_content(url).await.unwrap().unwrap();
        assert_eq!(stored.download_status, DownloadStatus::NotDownloaded);
        let leftovers = std::fs::read_dir(dir.path().join(INCOMING_DIR)).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn transient_failure_recovers() {
        let (store, fetcher, manager, _dir) = setup(1, 3).await;
        let url = "https://cdn.example.com/c.mp4";
        store.insert_content(&video(url)).await.unwrap();

        manager.enqueue(url).await;
        manager.wait_idle().await;

        assert_eq!(fetcher.calls(), 2);
        let stored = store.find_content(url).await.unwrap().unwrap();
        assert_eq!(stored.download_status, DownloadStatus::Downloaded);
    }

    #[tokio::test]
    async fn urls_gone_from_the_store_are_dropped() {
        let (_store, fetcher, manager, _dir) = setup(0, 3).await;
        manager.enqueue("https://cdn.example.com/gone.mp4").await;
        manager.wait_idle().await;
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn queue_is_drained_in_order() {
        let (store, _fetcher, manager, _dir) = setup(0, 3).await;
        let urls = ["https://cdn.example.com/1.png", "https://cdn.example.com/2.png", "https://cdn.example.com/3.png"];
        for url in urls {
            store.insert_content(&video(url)).await.unwrap();
            manager.enqueue(url).await;
        }
        assert_eq!(manager.pending().await, urls.map(String::from).to_vec());
        manager.wait_idle().await;
        assert!(manager.pending().await.is_empty());
        assert!(manager.in_flight().await.is_none());
        for url in urls {
            let stored = store.find_content(url).await.unwrap().unwrap();
            assert_eq!(stored.download_status, DownloadStatus::Downloaded);
        }
    }

    #[tokio::test]
    async fn orphans_are_removed_but_directories_kept() {
        let (_store, _fetcher, manager, dir) = setup(0, 3).await;
        std::fs::write(dir.path().join("keep.mp4"), b"x").unwrap();
        std::fs::write(dir.path().join("old.png"), b"x").unwrap();
        std::fs::create_dir_all(dir.path().join(INCOMING_DIR)).unwrap();

        let expected: HashSet<String> = ["keep.mp4".to_string()].into_iter().collect();
        let removed = manager.remove_orphans(&expected).await.unwrap();

        assert_eq!(removed, vec!["old.png".to_string()]);
        assert!(dir.path().join("keep.mp4").exists());
        assert!(dir.path().join(INCOMING_DIR).is_dir());
    }

    #[tokio::test]
    async fn unremovable_orphan_does_not_stop_cleanup() {
        let (_store, _fetcher, manager, dir) = setup(0, 3).await;
        std::fs::create_dir_all(dir.path().join("stuck")).unwrap();
        std::fs::write(dir.path().join("a.png"), b"x").unwrap();
        std::fs::write(dir.path().join("b.png"), b"x").unwrap();

        let names = ["stuck", "a.png", "b.png"].map(String::from);
        let removed = manager.remove_cached(names).await;

        assert_eq!(removed, vec!["a.png".to_string(), "b.png".to_string()]);
        assert!(dir.path().join("stuck").is_dir());
        assert!(!dir.path().join("a.png").exists());
        assert!(!dir.path().join("b.png").exists());
    }

    #[tokio::test]
    async fn mark_cached_points_at_the_cache_file() {
        let (store, fetcher, manager, dir) = setup(0, 3).await;
        let url = "https://cdn.example.com/d.mp4";
        store.insert_content(&video(url)).await.unwrap();

        assert!(manager.mark_cached(url).await.unwrap());
        let stored = store.find_content(url).await.unwrap().unwrap();
        assert_eq!(stored.download_status, DownloadStatus::Downloaded);
        assert_eq!(stored.local_path, Some(dir.path().join("d.mp4")));
        assert_eq!(fetcher.calls(), 0);
    }
}
