//! Single-URL download queue.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{info, warn};

use super::Database;
use crate::models::*;
use crate::utils::{normalize_url, unix_time};

const URL_COLUMNS: &str = "id, url, priority, ignore_anchor, additional_data, status_text, \
     status, time_added, time_processed, metadata_only, overwrite_existing, filter, max_files, \
     new_files, already_seen_files, paused, comment, archived, reverse_lookup_id";

fn row_to_url(row: &SqliteRow) -> QueuedUrl {
    QueuedUrl {
        id: row.get("id"),
        url: row.get("url"),
        priority: row.get("priority"),
        ignore_anchor: row.get("ignore_anchor"),
        additional_data: row.get("additional_data"),
        status_text: row.get("status_text"),
        status: row.get("status"),
        time_added: row.get("time_added"),
        time_processed: row.get("time_processed"),
        metadata_only: row.get("metadata_only"),
        overwrite_existing: row.get("overwrite_existing"),
        filter: row.get("filter"),
        max_files: row.get("max_files"),
        new_files: row.get("new_files"),
        already_seen_files: row.get("already_seen_files"),
        paused: row.get("paused"),
        comment: row.get("comment"),
        archived: row.get("archived"),
        reverse_lookup_id: row.get("reverse_lookup_id"),
    }
}

impl Database {
    /// Pending, unpaused URLs in download order: priority descending, then
    /// newest first.
    pub async fn get_urls_to_download(&self) -> Result<Vec<QueuedUrl>> {
        let rows = sqlx::query(&format!(
            "SELECT {URL_COLUMNS} FROM single_url_queue
             WHERE status = ? AND paused <> 1
             ORDER BY priority DESC, time_added DESC"
        ))
        .bind(URL_STATUS_PENDING)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_url).collect())
    }

    pub async fn get_queued_url(&self, id: i64) -> Result<Option<QueuedUrl>> {
        let row = sqlx::query(&format!(
            "SELECT {URL_COLUMNS} FROM single_url_queue WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_url))
    }

    /// Queue rows holding the given URL (normalized before lookup).
    pub async fn check_single_queue_for_url(&self, url: &str) -> Result<Vec<QueuedUrl>> {
        let normalized = normalize_url(url);
        let rows = sqlx::query(&format!(
            "SELECT {URL_COLUMNS} FROM single_url_queue WHERE url = ?"
        ))
        .bind(&normalized)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_url).collect())
    }

    pub async fn get_queued_urls(&self, selector: &ListSelector) -> Result<Vec<QueuedUrl>> {
        if let Some(ids) = &selector.ids {
            let mut result = Vec::new();
            for id in ids {
                if let Some(url) = self.get_queued_url(*id).await? {
                    if selector.archived || !url.archived {
                        result.push(url);
                    }
                }
            }
            return Ok(result);
        }

        let mut sql = format!("SELECT {URL_COLUMNS} FROM single_url_queue WHERE 1 = 1");
        if selector.from.is_some() && selector.to.is_some() {
            sql.push_str(" AND id >= ? AND id <= ?");
        }
        if !selector.archived {
            sql.push_str(" AND archived <> 1");
        }
        sql.push_str(" ORDER BY id ASC");

        let mut query = sqlx::query(&sql);
        if let (Some(from), Some(to)) = (selector.from, selector.to) {
            query = query.bind(from).bind(to);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_url).collect())
    }

    /// Bulk add-or-update. Inserts require a `url` (normalized and stamped
    /// with the queue time); updates touch only the supplied fields.
    pub async fn add_or_update_urls(&self, payloads: &[QueuedUrlUpsert]) -> Result<Vec<i64>> {
        let mut ids = Vec::new();
        for payload in payloads {
            if let Some(id) = payload.id {
                if self.update_url_fields(id, payload).await? {
                    info!("Updated URL with ID {}", id);
                    ids.push(id);
                } else {
                    warn!("Queued URL {} not found for update", id);
                }
            } else {
                let Some(url) = &payload.url else {
                    warn!("Skipping URL insert without a url");
                    continue;
                };
                let normalized = normalize_url(url);
                let id = sqlx::query(
                    "INSERT INTO single_url_queue
                     (url, priority, ignore_anchor, additional_data, status, time_added,
                      metadata_only, overwrite_existing, filter, max_files, paused, comment,
                      reverse_lookup_id)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&normalized)
                .bind(payload.priority.unwrap_or(0))
                .bind(payload.ignore_anchor.unwrap_or(false))
                .bind(&payload.additional_data)
                .bind(payload.status.unwrap_or(URL_STATUS_PENDING))
                .bind(unix_time())
                .bind(payload.metadata_only.unwrap_or(false))
                .bind(payload.overwrite_existing.unwrap_or(false))
                .bind(&payload.filter)
                .bind(payload.max_files)
                .bind(payload.paused.unwrap_or(false))
                .bind(&payload.comment)
                .bind(payload.reverse_lookup_id)
                .execute(&self.pool)
                .await?
                .last_insert_rowid();
                info!("Added URL: {}", normalized);
                ids.push(id);
            }
        }
        Ok(ids)
    }

    async fn update_url_fields(&self, id: i64, payload: &QueuedUrlUpsert) -> Result<bool> {
        let mut sets: Vec<&str> = Vec::new();
        if payload.url.is_some() {
            sets.push("url = ?");
        }
        if payload.priority.is_some() {
            sets.push("priority = ?");
        }
        if payload.ignore_anchor.is_some() {
            sets.push("ignore_anchor = ?");
        }
        if payload.additional_data.is_some() {
            sets.push("additional_data = ?");
        }
        if payload.status.is_some() {
            sets.push("status = ?");
        }
        if payload.status_text.is_some() {
            sets.push("status_text = ?");
        }
        if payload.metadata_only.is_some() {
            sets.push("metadata_only = ?");
        }
        if payload.overwrite_existing.is_some() {
            sets.push("overwrite_existing = ?");
        }
        if payload.filter.is_some() {
            sets.push("filter = ?");
        }
        if payload.max_files.is_some() {
            sets.push("max_files = ?");
        }
        if payload.paused.is_some() {
            sets.push("paused = ?");
        }
        if payload.comment.is_some() {
            sets.push("comment = ?");
        }
        if payload.archived.is_some() {
            sets.push("archived = ?");
        }
        if payload.reverse_lookup_id.is_some() {
            sets.push("reverse_lookup_id = ?");
        }
        if sets.is_empty() {
            return Ok(self.get_queued_url(id).await?.is_some());
        }

        let sql = format!("UPDATE single_url_queue SET {} WHERE id = ?", sets.join(", "));
        let mut query = sqlx::query(&sql);
        if let Some(v) = &payload.url {
            query = query.bind(normalize_url(v));
        }
        if let Some(v) = payload.priority {
            query = query.bind(v);
        }
        if let Some(v) = payload.ignore_anchor {
            query = query.bind(v);
        }
        if let Some(v) = &payload.additional_data {
            query = query.bind(v);
        }
        if let Some(v) = payload.status {
            query = query.bind(v);
        }
        if let Some(v) = &payload.status_text {
            query = query.bind(v);
        }
        if let Some(v) = payload.metadata_only {
            query = query.bind(v);
        }
        if let Some(v) = payload.overwrite_existing {
            query = query.bind(v);
        }
        if let Some(v) = &payload.filter {
            query = query.bind(v);
        }
        if let Some(v) = payload.max_files {
            query = query.bind(v);
        }
        if let Some(v) = payload.paused {
            query = query.bind(v);
        }
        if let Some(v) = &payload.comment {
            query = query.bind(v);
        }
        if let Some(v) = payload.archived {
            query = query.bind(v);
        }
        if let Some(v) = payload.reverse_lookup_id {
            query = query.bind(v);
        }
        let result = query.bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Persist the outcome of one processing pass. Owned by the URL
    /// worker.
    pub async fn update_url_result(
        &self,
        id: i64,
        status: i64,
        status_text: &str,
        time_processed: i64,
        new_files: i64,
        already_seen_files: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE single_url_queue
             SET status = ?, status_text = ?, time_processed = ?, new_files = ?,
                 already_seen_files = ?
             WHERE id = ?",
        )
        .bind(status)
        .bind(status_text)
        .bind(time_processed)
        .bind(new_files)
        .bind(already_seen_files)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_urls(&self, ids: &[i64]) -> Result<()> {
        for id in ids {
            sqlx::query("DELETE FROM single_url_queue WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        info!(
            "Deleted URLs with IDs: {}",
            ids.iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(())
    }
}
