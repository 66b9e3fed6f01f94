//! Merges remote catalog snapshots into the local store and the file cache.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::downloader::DownloadManager;
use crate::error::Result;
use crate::mapping::{apply_descriptor, cache_file_name, item_from_descriptor, ContentDescriptor};
use crate::storage::ContentStore;
use crate::types::DownloadStatus;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileResult {
    pub inserted: usize,
    pub updated: usize,
    /// Known items whose incoming `updated_at` was not newer.
    pub unchanged: usize,
    pub deleted: usize,
    /// Items skipped because of a store or descriptor error.
    pub failed: usize,
    /// New items handed to the download queue.
    pub enqueued: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileSyncResult {
    pub marked_cached: Vec<String>,
    pub enqueued: Vec<String>,
    pub removed: Vec<String>,
}

enum Merge {
    Inserted,
    Updated,
    Unchanged,
}

pub struct Reconciler {
    store: Arc<dyn ContentStore>,
    downloads: DownloadManager,
}

impl Reconciler {
    pub fn new(store: Arc<dyn ContentStore>, downloads: DownloadManager) -> Self {
        Self { store, downloads }
    }

    pub fn downloads(&self) -> &DownloadManager { &self.downloads }

    /// Apply a successfully fetched catalog: insert unknown URLs, update known ones when the
    /// incoming `updated_at` is strictly newer, and delete every stored URL the catalog no
    /// longer lists. Per-item failures are logged and skipped.
    pub async fn reconcile(&self, catalog: &[ContentDescriptor]) -> ReconcileResult {
        let mut result = ReconcileResult::default();

        for desc in catalog {
            match self.merge(desc).await {
                Ok(Merge::Inserted) => {
                    result.inserted += 1;
                    if desc.kind.is_downloadable() && self.downloads.enqueue(&desc.url).await {
                        result.enqueued.push(desc.url.clone());
                    }
                }
                Ok(Merge::Updated) => result.updated += 1,
                Ok(Merge::Unchanged) => result.unchanged += 1,
                Err(e) => {
                    warn!(url = %desc.url, error = %e, "skipping catalog item");
                    result.failed += 1;
                }
            }
        }

        let wanted: HashSet<&str> = catalog.iter().map(|d| d.url.as_str()).collect();
        match self.store.list_content().await {
            Ok(stored) => {
                for item in stored.iter().filter(|c| !wanted.contains(c.url.as_str())) {
                    match self.store.delete_content(&item.url).await {
                        Ok(n) => result.deleted += n as usize,
                        Err(e) => {
                            warn!(url = %item.url, error = %e, "could not delete stale item");
                            result.failed += 1;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "could not list stored content, skipping deletions");
                result.failed += 1;
            }
        }

        info!(
            inserted = result.inserted,
            updated = result.updated,
            deleted = result.deleted,
            failed = result.failed,
            "catalog reconciled"
        );
        result
    }

    async fn merge(&self, desc: &ContentDescriptor) -> Result<Merge> {
        match self.store.find_content(&desc.url).await? {
            None => {
                let item = item_from_descriptor(desc)?;
                self.store.insert_content(&item).await?;
                debug!(url = %desc.url, "inserted");
                Ok(Merge::Inserted)
            }
            Some(mut stored) => {
                if desc.updated_at()? <= stored.updated_at {
                    return Ok(Merge::Unchanged);
                }
                apply_descriptor(&mut stored, desc)?;
                self.store.update_content(&stored).await?;
                debug!(url = %desc.url, "updated");
                Ok(Merge::Updated)
            }
        }
    }

    /// Bring the cache directory in line with the catalog: files already present are
    /// recorded as downloaded, missing ones are queued, and files nobody references are
    /// deleted.
    pub async fn sync_files(&self, catalog: &[ContentDescriptor]) -> Result<FileSyncResult> {
        let cached: HashSet<String> = self.downloads.cached_files().await?.into_iter().collect();
        let mut result = FileSyncResult::default();
        let mut expected = HashSet::new();

        for desc in catalog.iter().filter(|d| d.kind.is_downloadable()) {
            let name = match cache_file_name(&desc.url) {
                Ok(name) => name,
                Err(e) => {
                    warn!(url = %desc.url, error = %e, "no cache file name");
                    continue;
                }
            };
            if cached.contains(&name) {
                if self.needs_mark(&desc.url).await {
                    match self.downloads.mark_cached(&desc.url).await {
                        Ok(true) => result.marked_cached.push(desc.url.clone()),
                        Ok(false) => {}
                        Err(e) => warn!(url = %desc.url, error = %e, "could not record cached file"),
                    }
                }
            } else if self.downloads.enqueue(&desc.url).await {
                result.enqueued.push(desc.url.clone());
            }
            expected.insert(name);
        }

        result.removed = self.downloads.remove_orphans(&expected).await?;
        Ok(result)
    }

    async fn needs_mark(&self, url: &str) -> bool {
        match self.store.find_content(url).await {
            Ok(Some(item)) => item.download_status != DownloadStatus::Downloaded || item.local_path.is_none(),
            Ok(None) => false,
            Err(e) => {
                warn!(%url, error = %e, "store lookup failed");
                false
            }
        }
    }
}
