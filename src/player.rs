use tracing::{info, warn};

use crate::api::CatalogSource;
use crate::error::Result;
use crate::storage::ContentStore;
use crate::types::PlayerConfig;

/// Window geometry for the player. The remote value wins and is persisted; when the fetch
/// fails the last stored value is used, and failing that the built-in default.
pub async fn resolve_player_config(source: &dyn CatalogSource, store: &dyn ContentStore) -> Result<PlayerConfig> {
    match source.fetch_player_config().await {
        Ok(config) => {
            if let Err(e) = store.save_player_config(&config).await {
                warn!(error = %e, "could not persist player config");
            }
            info!(?config, "player config from remote");
            Ok(config)
        }
        Err(e) => {
            warn!(error = %e, "player config fetch failed, using local copy");
            match store.load_player_config().await {
                Ok(stored) => Ok(stored.unwrap_or_default()),
                Err(e) => {
                    warn!(error = %e, "stored player config unreadable, using defaults");
                    Ok(PlayerConfig::default())
                }
            }
        }
    }
}
