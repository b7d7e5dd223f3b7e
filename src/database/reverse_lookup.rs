//! Reverse-lookup job queue.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{info, warn};

use super::Database;
use crate::models::*;
use crate::utils::unix_time;

const JOB_COLUMNS: &str = "id, file_path, file_url, config, status, status_text, paused, \
     urls_paused, priority, result_count, additional_results, time_added, time_processed";

fn row_to_job(row: &SqliteRow) -> ReverseLookupJob {
    ReverseLookupJob {
        id: row.get("id"),
        file_path: row.get("file_path"),
        file_url: row.get("file_url"),
        config: row.get("config"),
        status: row.get("status"),
        status_text: row.get("status_text"),
        paused: row.get("paused"),
        urls_paused: row.get("urls_paused"),
        priority: row.get("priority"),
        result_count: row.get("result_count"),
        additional_results: row.get("additional_results"),
        time_added: row.get("time_added"),
        time_processed: row.get("time_processed"),
    }
}

impl Database {
    /// Pending, unpaused lookup jobs, priority descending then oldest
    /// first.
    pub async fn get_due_reverse_lookup_jobs(&self) -> Result<Vec<ReverseLookupJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM reverse_lookup_jobs
             WHERE status = ? AND paused <> 1
             ORDER BY priority DESC, time_added ASC"
        ))
        .bind(URL_STATUS_PENDING)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_job).collect())
    }

    pub async fn get_reverse_lookup_job(&self, id: i64) -> Result<Option<ReverseLookupJob>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM reverse_lookup_jobs WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_job))
    }

    pub async fn get_reverse_lookup_jobs(
        &self,
        selector: &ListSelector,
    ) -> Result<Vec<ReverseLookupJob>> {
        if let Some(ids) = &selector.ids {
            let mut result = Vec::new();
            for id in ids {
                if let Some(job) = self.get_reverse_lookup_job(*id).await? {
                    result.push(job);
                }
            }
            return Ok(result);
        }

        let mut sql = format!("SELECT {JOB_COLUMNS} FROM reverse_lookup_jobs WHERE 1 = 1");
        if selector.from.is_some() && selector.to.is_some() {
            sql.push_str(" AND id >= ? AND id <= ?");
        }
        sql.push_str(" ORDER BY id ASC");

        let mut query = sqlx::query(&sql);
        if let (Some(from), Some(to)) = (selector.from, selector.to) {
            query = query.bind(from).bind(to);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_job).collect())
    }

    /// Bulk add-or-update. Inserts require exactly one of `file_path` and
    /// `file_url`.
    pub async fn add_or_update_reverse_lookup_jobs(
        &self,
        payloads: &[ReverseLookupJobUpsert],
    ) -> Result<Vec<i64>> {
        let mut ids = Vec::new();
        for payload in payloads {
            if let Some(id) = payload.id {
                if self.update_reverse_lookup_fields(id, payload).await? {
                    info!("Updated reverse-lookup job with ID {}", id);
                    ids.push(id);
                } else {
                    warn!("Reverse-lookup job {} not found for update", id);
                }
            } else {
                if payload.file_path.is_some() == payload.file_url.is_some() {
                    warn!("Skipping reverse-lookup insert: exactly one of file_path and file_url must be set");
                    continue;
                }
                let id = sqlx::query(
                    "INSERT INTO reverse_lookup_jobs
                     (file_path, file_url, config, status, paused, urls_paused, priority,
                      time_added)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&payload.file_path)
                .bind(&payload.file_url)
                .bind(&payload.config)
                .bind(payload.status.unwrap_or(URL_STATUS_PENDING))
                .bind(payload.paused.unwrap_or(false))
                .bind(payload.urls_paused.unwrap_or(false))
                .bind(payload.priority.unwrap_or(0))
                .bind(unix_time())
                .execute(&self.pool)
                .await?
                .last_insert_rowid();
                info!("Added reverse-lookup job with ID {}", id);
                ids.push(id);
            }
        }
        Ok(ids)
    }

    async fn update_reverse_lookup_fields(
        &self,
        id: i64,
        payload: &ReverseLookupJobUpsert,
    ) -> Result<bool> {
        let mut sets: Vec<&str> = Vec::new();
        if payload.file_path.is_some() {
            sets.push("file_path = ?");
        }
        if payload.file_url.is_some() {
            sets.push("file_url = ?");
        }
        if payload.config.is_some() {
            sets.push("config = ?");
        }
        if payload.status.is_some() {
            sets.push("status = ?");
        }
        if payload.status_text.is_some() {
            sets.push("status_text = ?");
        }
        if payload.paused.is_some() {
            sets.push("paused = ?");
        }
        if payload.urls_paused.is_some() {
            sets.push("urls_paused = ?");
        }
        if payload.priority.is_some() {
            sets.push("priority = ?");
        }
        if sets.is_empty() {
            return Ok(self.get_reverse_lookup_job(id).await?.is_some());
        }

        let sql = format!(
            "UPDATE reverse_lookup_jobs SET {} WHERE id = ?",
            sets.join(", ")
        );
        let mut query = sqlx::query(&sql);
        if let Some(v) = &payload.file_path {
            query = query.bind(v);
        }
        if let Some(v) = &payload.file_url {
            query = query.bind(v);
        }
        if let Some(v) = &payload.config {
            query = query.bind(v);
        }
        if let Some(v) = payload.status {
            query = query.bind(v);
        }
        if let Some(v) = &payload.status_text {
            query = query.bind(v);
        }
        if let Some(v) = payload.paused {
            query = query.bind(v);
        }
        if let Some(v) = payload.urls_paused {
            query = query.bind(v);
        }
        if let Some(v) = payload.priority {
            query = query.bind(v);
        }
        let result = query.bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Persist the outcome of one lookup pass. Owned by the reverse-lookup
    /// worker.
    pub async fn update_reverse_lookup_result(
        &self,
        id: i64,
        status: i64,
        status_text: &str,
        result_count: i64,
        additional_results: Option<&str>,
        time_processed: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE reverse_lookup_jobs
             SET status = ?, status_text = ?, result_count = ?, additional_results = ?,
                 time_processed = ?
             WHERE id = ?",
        )
        .bind(status)
        .bind(status_text)
        .bind(result_count)
        .bind(additional_results)
        .bind(time_processed)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_reverse_lookup_jobs(&self, ids: &[i64]) -> Result<()> {
        for id in ids {
            sqlx::query("DELETE FROM reverse_lookup_jobs WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }
}
