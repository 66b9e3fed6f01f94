use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::types::{ContentItem, DownloadStatus, PlayerConfig};

/// Persisted state shared by the reconciler, the download queue and the resolver.
///
/// `url` is the unique key of the content collection; the player config is a singleton.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn find_content(&self, url: &str) -> Result<Option<ContentItem>>;
    /// All items in insertion order.
    async fn list_content(&self) -> Result<Vec<ContentItem>>;
    async fn insert_content(&self, item: &ContentItem) -> Result<()>;
    /// Writes the catalog-owned fields only; download state is not touched.
    async fn update_content(&self, item: &ContentItem) -> Result<()>;
    async fn delete_content(&self, url: &str) -> Result<u64>;
    /// Returns false when no item with `url` exists.
    async fn set_download_status(&self, url: &str, status: DownloadStatus, local_path: Option<&Path>) -> Result<bool>;
    async fn load_player_config(&self) -> Result<Option<PlayerConfig>>;
    async fn save_player_config(&self, config: &PlayerConfig) -> Result<()>;
}

#[derive(Default)]
struct MemoryState {
    content: Vec<ContentItem>,
    player: Option<PlayerConfig>,
    failing: HashSet<String>,
}

/// In-memory store substitute. URLs registered with [`MemoryStore::fail_on`] error on every
/// content operation, which lets callers exercise per-item failure paths.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub async fn fail_on(&self, url: &str) {
        self.state.lock().await.failing.insert(url.to_string());
    }

    pub async fn recover(&self, url: &str) {
        self.state.lock().await.failing.remove(url);
    }
}

fn check(state: &MemoryState, url: &str) -> Result<()> {
    if state.failing.contains(url) { Err(Error::StoreUnavailable(url.to_string())) } else { Ok(()) }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn find_content(&self, url: &str) -> Result<Option<ContentItem>> {
        let state = self.state.lock().await;
        check(&state, url)?;
        Ok(state.content.iter().find(|c| c.url == url).cloned())
    }

    async fn list_content(&self) -> Result<Vec<ContentItem>> {
        Ok(self.state.lock().await.content.clone())
    }

    async fn insert_content(&self, item: &ContentItem) -> Result<()> {
        let mut state = self.state.lock().await;
        check(&state, &item.url)?;
        if state.content.iter().any(|c| c.url == item.url) {
            return Err(Error::InvalidDescriptor { url: item.url.clone(), reason: "duplicate url".to_string() });
        }
        state.content.push(item.clone());
        Ok(())
    }

    async fn update_content(&self, item: &ContentItem) -> Result<()> {
        let mut state = self.state.lock().await;
        check(&state, &item.url)?;
        if let Some(stored) = state.content.iter_mut().find(|c| c.url == item.url) {
            stored.kind = item.kind.clone();
            stored.length = item.length;
            stored.position = item.position;
            stored.fill_screen = item.fill_screen;
            stored.valid_from = item.valid_from;
            stored.valid_to = item.valid_to;
            stored.updated_at = item.updated_at;
        }
        Ok(())
    }

    async fn delete_content(&self, url: &str) -> Result<u64> {
        let mut state = self.state.lock().await;
        check(&state, url)?;
        let before = state.content.len();
        state.content.retain(|c| c.url != url);
        Ok((before - state.content.len()) as u64)
    }

    async fn set_download_status(&self, url: &str, status: DownloadStatus, local_path: Option<&Path>) -> Result<bool> {
        let mut state = self.state.lock().await;
        check(&state, url)?;
        match state.content.iter_mut().find(|c| c.url == url) {
            Some(stored) => {
                stored.download_status = status;
                stored.local_path = local_path.map(Path::to_path_buf);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn load_player_config(&self) -> Result<Option<PlayerConfig>> {
        Ok(self.state.lock().await.player)
    }

    async fn save_player_config(&self, config: &PlayerConfig) -> Result<()> {
        self.state.lock().await.player = Some(*config);
        Ok(())
    }
}
