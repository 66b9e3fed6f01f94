use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const TIMESTAMP_FORMAT_ISO: &str = "%Y-%m-%dT%H:%M:%S";

/// Wall-clock timestamp in device-local time, as the catalog writes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(NaiveDateTime);

impl Timestamp {
    pub fn now() -> Self { Self(Local::now().naive_local()) }

    pub fn parse(s: &str) -> Result<Self> {
        let t = s.trim();
        NaiveDateTime::parse_from_str(t, TIMESTAMP_FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(t, TIMESTAMP_FORMAT_ISO))
            .map(Self)
            .map_err(|_| Error::InvalidTimestamp(s.to_string()))
    }

    pub fn as_naive(&self) -> NaiveDateTime { self.0 }
}

impl From<NaiveDateTime> for Timestamp {
    fn from(t: NaiveDateTime) -> Self { Self(t) }
}

impl FromStr for Timestamp {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> { Self::parse(s) }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(TIMESTAMP_FORMAT))
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Image,
    Video,
    EmbeddedPage,
    Other(String),
}

impl ContentKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::EmbeddedPage => "embedded-page",
            Self::Other(s) => s.as_str(),
        }
    }

    /// Everything except embedded pages needs a local cache copy before it can play.
    pub fn is_downloadable(&self) -> bool { !matches!(self, Self::EmbeddedPage) }
}

impl From<&str> for ContentKind {
    fn from(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" => Self::Image,
            "video" => Self::Video,
            // "url" is what older catalogs send for web pages
            "embedded-page" | "url" => Self::EmbeddedPage,
            _ => Self::Other(s.to_string()),
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl Serialize for ContentKind {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ContentKind {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        Ok(Self::from(raw.as_str()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    #[default]
    NotDownloaded,
    Downloading,
    Downloaded,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotDownloaded => "not_downloaded",
            Self::Downloading => "downloading",
            Self::Downloaded => "downloaded",
        }
    }
}

impl FromStr for DownloadStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "not_downloaded" => Ok(Self::NotDownloaded),
            "downloading" => Ok(Self::Downloading),
            "downloaded" => Ok(Self::Downloaded),
            _ => Err(Error::InvalidStatus(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleMode {
    Fill,
    Contain,
}

impl ScaleMode {
    pub fn from_fill_screen(fill_screen: bool) -> Self {
        if fill_screen { Self::Fill } else { Self::Contain }
    }
}

/// A catalog entry as persisted locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub url: String,
    pub kind: ContentKind,
    /// Display duration in seconds.
    pub length: f64,
    pub position: i64,
    pub fill_screen: bool,
    pub valid_from: Timestamp,
    pub valid_to: Timestamp,
    pub updated_at: Timestamp,
    pub download_status: DownloadStatus,
    pub local_path: Option<PathBuf>,
}

impl ContentItem {
    pub fn is_playable_at(&self, now: Timestamp) -> bool {
        let ready = self.download_status == DownloadStatus::Downloaded
            || self.kind == ContentKind::EmbeddedPage;
        ready && self.valid_from <= now && now <= self.valid_to
    }
}

/// One entry of the playlist handed to the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayableItem {
    pub url: String,
    pub kind: ContentKind,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    pub scale: ScaleMode,
    pub position: i64,
    /// Local cache file for media, the page URL for embedded pages.
    pub source: String,
}

impl From<&ContentItem> for PlayableItem {
    fn from(item: &ContentItem) -> Self {
        let source = match (&item.kind, &item.local_path) {
            (ContentKind::EmbeddedPage, _) | (_, None) => item.url.clone(),
            (_, Some(path)) => path.to_string_lossy().to_string(),
        };
        Self {
            url: item.url.clone(),
            kind: item.kind.clone(),
            duration: Duration::try_from_secs_f64(item.length).unwrap_or(Duration::ZERO),
            scale: ScaleMode::from_fill_screen(item.fill_screen),
            position: item.position,
            source,
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO))
    }
}

/// Window geometry for the display shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerConfig {
    pub width: u32,
    pub height: u32,
    pub x: i32,
    pub y: i32,
    #[serde(default)]
    pub fullscreen: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self { width: 1920, height: 1080, x: 10, y: 10, fullscreen: false }
    }
}
