use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{Error, Result};
use crate::types::{ContentItem, ContentKind, DownloadStatus, Timestamp};

/// One entry of the remote catalog, as the content endpoint serves it.
///
/// Dates stay raw and numbers decode leniently, so a malformed entry only fails its own
/// merge. An unusable `length` decodes as NaN and is rejected by [`item_from_descriptor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentDescriptor {
    #[serde(rename = "type")]
    pub kind: ContentKind,
    pub url: String,
    #[serde(default = "missing_length", deserialize_with = "lenient_length")]
    pub length: f64,
    #[serde(default, deserialize_with = "lenient_position")]
    pub position: i64,
    #[serde(default)]
    pub fill_screen: bool,
    pub from_date: String,
    pub to_date: String,
    pub updated_at: String,
}

impl ContentDescriptor {
    pub fn updated_at(&self) -> Result<Timestamp> { Timestamp::parse(&self.updated_at) }
}

fn missing_length() -> f64 { f64::NAN }

fn lenient_length<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<f64, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => s.trim().parse().unwrap_or(f64::NAN),
        _ => f64::NAN,
    })
}

/// Integers, integral floats (`1.0`) and numeric strings; `null` sorts as 0.
fn lenient_position<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<i64, D::Error> {
    let float = match Value::deserialize(d)? {
        Value::Null => return Ok(0),
        Value::Number(n) => match n.as_i64() {
            Some(i) => return Ok(i),
            None => n.as_f64(),
        },
        Value::String(s) => s.trim().parse::<f64>().ok(),
        other => return Err(serde::de::Error::custom(format!("invalid position {other}"))),
    };
    match float {
        Some(f) if f.is_finite() => Ok(f.round() as i64),
        _ => Err(serde::de::Error::custom("position is not a finite number")),
    }
}

/// Decode a catalog body entry by entry. Entries that cannot be decoded at all (no usable
/// `url` or `type`) are logged and dropped; the rest are returned in catalog order.
pub fn decode_catalog(entries: Vec<Value>) -> Vec<ContentDescriptor> {
    let total = entries.len();
    let mut out = Vec::with_capacity(total);
    for (i, entry) in entries.into_iter().enumerate() {
        let url = entry.get("url").and_then(Value::as_str).map(str::to_string);
        match serde_json::from_value::<ContentDescriptor>(entry) {
            Ok(desc) => out.push(desc),
            Err(e) => warn!(index = i, url = url.as_deref().unwrap_or("?"), error = %e, "dropping undecodable catalog entry"),
        }
    }
    if out.len() < total {
        warn!(dropped = total - out.len(), total, "catalog contained undecodable entries");
    }
    out
}

pub fn item_from_descriptor(d: &ContentDescriptor) -> Result<ContentItem> {
    if !d.length.is_finite() || d.length < 0.0 {
        return Err(Error::InvalidDescriptor {
            url: d.url.clone(),
            reason: "length must be a non-negative number".to_string(),
        });
    }
    Ok(ContentItem {
        url: d.url.clone(),
        kind: d.kind.clone(),
        length: d.length,
        position: d.position,
        fill_screen: d.fill_screen,
        valid_from: Timestamp::parse(&d.from_date)?,
        valid_to: Timestamp::parse(&d.to_date)?,
        updated_at: d.updated_at()?,
        download_status: DownloadStatus::NotDownloaded,
        local_path: None,
    })
}

/// Overwrite the catalog-owned fields of `item`; download state is left alone.
pub fn apply_descriptor(item: &mut ContentItem, d: &ContentDescriptor) -> Result<()> {
    let fresh = item_from_descriptor(d)?;
    item.kind = fresh.kind;
    item.length = fresh.length;
    item.position = fresh.position;
    item.fill_screen = fresh.fill_screen;
    item.valid_from = fresh.valid_from;
    item.valid_to = fresh.valid_to;
    item.updated_at = fresh.updated_at;
    Ok(())
}

/// Name of the cache file for `url`: its last path segment.
pub fn cache_file_name(url: &str) -> Result<String> {
    let last = match url::Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|mut segs| segs.next_back().map(str::to_string))
            .unwrap_or_default(),
        // Relative or scheme-less references: strip query/fragment by hand
        Err(_) => url
            .split(['?', '#'])
            .next()
            .and_then(|p| p.rsplit('/').next())
            .unwrap_or_default()
            .to_string(),
    };
    if last.is_empty() || last == "." || last == ".." {
        return Err(Error::InvalidDescriptor {
            url: url.to_string(),
            reason: "url has no file name segment".to_string(),
        });
    }
    Ok(last)
}
