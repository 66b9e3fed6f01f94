use std::sync::Arc;

use crate::error::Result;
use crate::storage::ContentStore;
use crate::types::{PlayableItem, Timestamp};

/// Derives the ordered set of items that may be shown right now.
#[derive(Clone)]
pub struct PlaylistResolver {
    store: Arc<dyn ContentStore>,
}

impl PlaylistResolver {
    pub fn new(store: Arc<dyn ContentStore>) -> Self { Self { store } }

    /// Items that are cached (or are embedded pages) and inside their validity window at
    /// `now`, ascending by position. Equal positions keep insertion order.
    pub async fn resolve(&self, now: Timestamp) -> Result<Vec<PlayableItem>> {
        let mut items: Vec<_> = self
            .store
            .list_content()
            .await?
            .into_iter()
            .filter(|c| c.is_playable_at(now))
            .collect();
        items.sort_by_key(|c| c.position);
        Ok(items.iter().map(PlayableItem::from).collect())
    }
}
