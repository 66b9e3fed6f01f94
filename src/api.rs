use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{Error, Result};
use crate::mapping::{decode_catalog, ContentDescriptor};
use crate::types::PlayerConfig;

/// Remote source of truth for the catalog and the player geometry.
///
/// A failed fetch is an `Err`; an empty catalog is `Ok(vec![])` and means "delete everything".
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch_catalog(&self) -> Result<Vec<ContentDescriptor>>;
    async fn fetch_player_config(&self) -> Result<PlayerConfig>;
}

pub struct HttpCatalog {
    client: reqwest::Client,
    content_url: String,
    player_url: String,
}

impl HttpCatalog {
    pub fn new(base_url: &str, content_path: &str, player_path: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("kiosk/0.1")
            .build()
            .map_err(|e| Error::CatalogFetch(e.to_string()))?;
        Ok(Self {
            client,
            content_url: join_url(base_url, content_path),
            player_url: join_url(base_url, player_path),
        })
    }

    pub fn content_url(&self) -> &str { &self.content_url }
    pub fn player_url(&self) -> &str { &self.player_url }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> std::result::Result<T, reqwest::Error> {
        debug!(%url, "fetching");
        self.client.get(url).send().await?.error_for_status()?.json::<T>().await
    }
}

#[async_trait]
impl CatalogSource for HttpCatalog {
    async fn fetch_catalog(&self) -> Result<Vec<ContentDescriptor>> {
        // Only the outer array must be well-formed; entries are decoded one at a time
        let entries: Vec<serde_json::Value> = self
            .get_json(&self.content_url)
            .await
            .map_err(|e| Error::CatalogFetch(e.to_string()))?;
        Ok(decode_catalog(entries))
    }

    async fn fetch_player_config(&self) -> Result<PlayerConfig> {
        self.get_json(&self.player_url)
            .await
            .map_err(|e| Error::ConfigFetch(e.to_string()))
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
