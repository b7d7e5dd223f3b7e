//! Known-URL cache and the durable log-file parse queue.
//!
//! The local known-URL table remembers which subscription or queued URL
//! contacted each URL; the shared table only answers "has any instance
//! seen this URL" and can live in a database shared by several daemons.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::path::Path;

use super::Database;
use crate::models::{KnownUrl, Owner};
use crate::utils::unix_time;

fn row_to_known_url(row: &SqliteRow) -> KnownUrl {
    KnownUrl {
        url: row.get("url"),
        status: row.get("status"),
        subscription_id: row.try_get("subscription_id").ok().flatten(),
        url_id: row.try_get("url_id").ok().flatten(),
        time_added: row.try_get("time_added").ok().flatten(),
    }
}

impl Database {
    /// Record contacted URLs in both the local and the shared cache,
    /// skipping entries already present.
    pub async fn add_known_urls(&self, urls: &[String], owner: Option<Owner>) -> Result<()> {
        let subscription_id = owner.and_then(|o| o.subscription_id());
        let url_id = owner.and_then(|o| o.url_id());
        for url in urls {
            let existing: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM known_urls
                 WHERE url = ? AND subscription_id IS ? AND url_id IS ?",
            )
            .bind(url)
            .bind(subscription_id)
            .bind(url_id)
            .fetch_one(&self.pool)
            .await?;
            if existing == 0 {
                sqlx::query(
                    "INSERT INTO known_urls (url, subscription_id, url_id, status, time_added)
                     VALUES (?, ?, ?, 0, ?)",
                )
                .bind(url)
                .bind(subscription_id)
                .bind(url_id)
                .bind(unix_time())
                .execute(&self.pool)
                .await?;
            }

            let shared_existing: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM known_urls WHERE url = ? AND status = 0")
                    .bind(url)
                    .fetch_one(&self.shared_pool)
                    .await?;
            if shared_existing == 0 {
                sqlx::query("INSERT INTO known_urls (url, status) VALUES (?, 0)")
                    .bind(url)
                    .execute(&self.shared_pool)
                    .await?;
            }
        }
        Ok(())
    }

    /// Exact-match lookup against the shared cache.
    pub async fn get_known_urls(&self, urls: &[String]) -> Result<Vec<KnownUrl>> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; urls.len()].join(", ");
        let sql = format!("SELECT url, status FROM known_urls WHERE url IN ({placeholders})");
        let mut query = sqlx::query(&sql);
        for url in urls {
            query = query.bind(url);
        }
        let rows = query.fetch_all(&self.shared_pool).await?;
        Ok(rows.iter().map(row_to_known_url).collect())
    }

    // --- log-file parse queue ---

    /// Enqueue an execution log file for later URL extraction. Called
    /// before the downloader runs, so a crash can never lose the
    /// reconciliation step.
    pub async fn add_log_file_to_parse_queue(&self, log_file: &Path, worker: &str) -> Result<()> {
        let file = self.relative_to_root(log_file);
        sqlx::query("INSERT INTO log_files_to_parse (file, worker) VALUES (?, ?)")
            .bind(&file)
            .bind(worker)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove_log_file_from_parse_queue(&self, log_file: &Path) -> Result<()> {
        let file = self.relative_to_root(log_file);
        sqlx::query("DELETE FROM log_files_to_parse WHERE file = ?")
            .bind(&file)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Next log file waiting to be parsed, if any (path relative to the
    /// data directory).
    pub async fn get_queued_log_file(&self) -> Result<Option<String>> {
        let row = sqlx::query("SELECT file FROM log_files_to_parse LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("file")))
    }
}
