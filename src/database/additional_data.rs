//! File-to-owner associations with metadata snapshots.
//!
//! Every file recognized in a run's output is tied to the subscription or
//! queued URL that produced it, together with a snapshot of the owner's
//! `additional_data` taken at association time. The owning row's metadata
//! may change later; the snapshot does not.

use anyhow::Result;
use sqlx::Row;
use std::path::Path;
use tracing::debug;

use super::Database;
use crate::models::Owner;
use crate::utils::unix_time;

impl Database {
    /// Associate a produced file with its owner, snapshotting the owner's
    /// current `additional_data` value.
    ///
    /// Idempotent: an identical `(file, owner, data)` triple is inserted
    /// at most once.
    pub async fn associate_additional_data(&self, filename: &Path, owner: Owner) -> Result<()> {
        let file = self.relative_to_root(filename);

        let data: Option<String> = match owner {
            Owner::Subscription(id) => {
                sqlx::query("SELECT additional_data FROM subscriptions WHERE id = ?")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?
                    .and_then(|row| row.get("additional_data"))
            }
            Owner::Url(id) => {
                sqlx::query("SELECT additional_data FROM single_url_queue WHERE id = ?")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?
                    .and_then(|row| row.get("additional_data"))
            }
        };

        let existing: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM additional_data
             WHERE file = ? AND subscription_id IS ? AND url_id IS ? AND data IS ?",
        )
        .bind(&file)
        .bind(owner.subscription_id())
        .bind(owner.url_id())
        .bind(&data)
        .fetch_one(&self.pool)
        .await?;

        if existing == 0 {
            sqlx::query(
                "INSERT INTO additional_data (file, data, subscription_id, url_id, time_added)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&file)
            .bind(&data)
            .bind(owner.subscription_id())
            .bind(owner.url_id())
            .bind(unix_time())
            .execute(&self.pool)
            .await?;
        } else {
            debug!("Association already recorded for {}", file);
        }
        Ok(())
    }

    /// Most recently associated files for an owner, newest first.
    pub async fn get_last_files(&self, owner: Owner, limit: i64) -> Result<Vec<String>> {
        let rows = match owner {
            Owner::Subscription(id) => {
                sqlx::query(
                    "SELECT file FROM additional_data WHERE subscription_id = ?
                     ORDER BY time_added DESC LIMIT ?",
                )
                .bind(id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            Owner::Url(id) => {
                sqlx::query(
                    "SELECT file FROM additional_data WHERE url_id = ?
                     ORDER BY time_added DESC LIMIT ?",
                )
                .bind(id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows.iter().map(|row| row.get("file")).collect())
    }

    pub async fn count_file_results(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM additional_data")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
