use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("catalog fetch failed: {0}")]
    CatalogFetch(String),

    #[error("player config fetch failed: {0}")]
    ConfigFetch(String),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("store unavailable for {0}")]
    StoreUnavailable(String),

    #[error("download of {url} failed: {reason}")]
    Transfer { url: String, reason: String },

    #[error("file cache error at {}: {source}", path.display())]
    FileCache {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("media {url} failed to load: {reason}")]
    MediaLoad { url: String, reason: String },

    #[error("display surface error: {0}")]
    Surface(String),

    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),

    #[error("invalid descriptor for {url}: {reason}")]
    InvalidDescriptor { url: String, reason: String },

    #[error("invalid download status: {0}")]
    InvalidStatus(String),
}

impl Error {
    pub(crate) fn file_cache(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileCache { path: path.into(), source }
    }

    pub(crate) fn transfer(url: &str, reason: impl std::fmt::Display) -> Self {
        Self::Transfer { url: url.to_string(), reason: reason.to_string() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
