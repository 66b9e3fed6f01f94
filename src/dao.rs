use std::path::{Path, PathBuf};

use sqlx::AnyPool;

use crate::error::Result;
use crate::types::{ContentItem, ContentKind, DownloadStatus, PlayerConfig, Timestamp};

// url, kind, length, position, fill_screen, valid_from, valid_to, updated_at, download_status, local_path
type ContentRow = (String, String, f64, i64, i64, String, String, String, String, String);

const CONTENT_COLUMNS: &str =
    "url, kind, length, position, fill_screen, valid_from, valid_to, updated_at, download_status, local_path";

fn content_from_row(row: ContentRow) -> Result<ContentItem> {
    let (url, kind, length, position, fill_screen, valid_from, valid_to, updated_at, status, local_path) = row;
    Ok(ContentItem {
        url,
        kind: ContentKind::from(kind.as_str()),
        length,
        position,
        fill_screen: fill_screen != 0,
        valid_from: Timestamp::parse(&valid_from)?,
        valid_to: Timestamp::parse(&valid_to)?,
        updated_at: Timestamp::parse(&updated_at)?,
        download_status: status.parse()?,
        // Empty column means "not cached"
        local_path: Some(local_path).filter(|p| !p.is_empty()).map(PathBuf::from),
    })
}

fn path_column(path: Option<&Path>) -> String {
    path.map(|p| p.to_string_lossy().to_string()).unwrap_or_default()
}

pub async fn find_content(pool: &AnyPool, url: &str) -> Result<Option<ContentItem>> {
    let row = sqlx::query_as::<_, ContentRow>(&format!(
        "SELECT {CONTENT_COLUMNS} FROM content WHERE url = ? LIMIT 1"
    ))
    .bind(url)
    .fetch_optional(pool)
    .await?;
    row.map(content_from_row).transpose()
}

pub async fn list_content(pool: &AnyPool) -> Result<Vec<ContentItem>> {
    let rows = sqlx::query_as::<_, ContentRow>(&format!("SELECT {CONTENT_COLUMNS} FROM content ORDER BY seq"))
        .fetch_all(pool)
        .await?;
    rows.into_iter().map(content_from_row).collect()
}

pub async fn insert_content(pool: &AnyPool, c: &ContentItem) -> Result<()> {
    sqlx::query(&format!(
        "INSERT INTO content({CONTENT_COLUMNS}) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(&c.url)
    .bind(c.kind.as_str())
    .bind(c.length)
    .bind(c.position)
    .bind(i64::from(c.fill_screen))
    .bind(c.valid_from.to_string())
    .bind(c.valid_to.to_string())
    .bind(c.updated_at.to_string())
    .bind(c.download_status.as_str())
    .bind(path_column(c.local_path.as_deref()))
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn update_content(pool: &AnyPool, c: &ContentItem) -> Result<()> {
    sqlx::query(
        "UPDATE content SET
           kind = ?, length = ?, position = ?, fill_screen = ?,
           valid_from = ?, valid_to = ?, updated_at = ?
         WHERE url = ?",
    )
    .bind(c.kind.as_str())
    .bind(c.length)
    .bind(c.position)
    .bind(i64::from(c.fill_screen))
    .bind(c.valid_from.to_string())
    .bind(c.valid_to.to_string())
    .bind(c.updated_at.to_string())
    .bind(&c.url)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete_content(pool: &AnyPool, url: &str) -> Result<u64> {
    let res = sqlx::query("DELETE FROM content WHERE url = ?")
        .bind(url)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

pub async fn set_download_status(
    pool: &AnyPool,
    url: &str,
    status: DownloadStatus,
    local_path: Option<&Path>,
) -> Result<bool> {
    let res = sqlx::query("UPDATE content SET download_status = ?, local_path = ? WHERE url = ?")
        .bind(status.as_str())
        .bind(path_column(local_path))
        .bind(url)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

pub async fn get_player_config(pool: &AnyPool) -> Result<Option<PlayerConfig>> {
    let row = sqlx::query_as::<_, (i64, i64, i64, i64, i64)>(
        "SELECT width, height, x, y, fullscreen FROM player_config WHERE id = 1",
    )
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|(width, height, x, y, fullscreen)| PlayerConfig {
        width: width.clamp(0, u32::MAX as i64) as u32,
        height: height.clamp(0, u32::MAX as i64) as u32,
        x: x.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
        y: y.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
        fullscreen: fullscreen != 0,
    }))
}

pub async fn upsert_player_config(pool: &AnyPool, cfg: &PlayerConfig) -> Result<()> {
    sqlx::query(
        "INSERT INTO player_config(id, width, height, x, y, fullscreen) VALUES(1, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET width=excluded.width, height=excluded.height,
           x=excluded.x, y=excluded.y, fullscreen=excluded.fullscreen",
    )
    .bind(i64::from(cfg.width))
    .bind(i64::from(cfg.height))
    .bind(i64::from(cfg.x))
    .bind(i64::from(cfg.y))
    .bind(i64::from(cfg.fullscreen))
    .execute(pool)
    .await?;
    Ok(())
}
