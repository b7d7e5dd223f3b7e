//! Subscription queue, check history and missed-check bookkeeping.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::HashMap;
use tracing::{info, warn};

use super::Database;
use crate::config::SubscriptionDefaults;
use crate::models::*;
use crate::utils::unix_time;

/// Minimum seconds between two attempts on the same subscription,
/// independent of its interval. Keeps small intervals from turning into
/// tight retry storms.
pub const MIN_RECHECK_FLOOR_SECS: i64 = 60;

/// A run counts as stale when it starts later than this many intervals
/// after the previous attempt.
const STALE_INTERVAL_FACTOR: i64 = 2;

const SUBSCRIPTION_COLUMNS: &str = "id, keywords, downloader, additional_data, last_check, \
     check_interval, priority, paused, time_created, last_successful_check, filter, \
     abort_after, max_files_initial, max_files_regular, comment";

fn row_to_subscription(row: &SqliteRow) -> Subscription {
    Subscription {
        id: row.get("id"),
        keywords: row.get("keywords"),
        downloader: row.get("downloader"),
        additional_data: row.get("additional_data"),
        last_check: row.get("last_check"),
        check_interval: row.get("check_interval"),
        priority: row.get("priority"),
        paused: row.get("paused"),
        time_created: row.get("time_created"),
        last_successful_check: row.get("last_successful_check"),
        filter: row.get("filter"),
        abort_after: row.get("abort_after"),
        max_files_initial: row.get("max_files_initial"),
        max_files_regular: row.get("max_files_regular"),
        comment: row.get("comment"),
    }
}

fn row_to_check(row: &SqliteRow) -> SubscriptionCheck {
    SubscriptionCheck {
        id: row.get("id"),
        subscription_id: row.get("subscription_id"),
        time_started: row.get("time_started"),
        time_finished: row.get("time_finished"),
        new_files: row.get("new_files"),
        already_seen_files: row.get("already_seen_files"),
        status: row.get("status"),
        archived: row.get("archived"),
    }
}

fn row_to_missed_check(row: &SqliteRow) -> MissedCheck {
    let reason: i64 = row.get("reason");
    MissedCheck {
        id: row.get("id"),
        subscription_id: row.get("subscription_id"),
        reason: MissedCheckReason::from_i64(reason).unwrap_or(MissedCheckReason::InProgress),
        note: row.get("note"),
        time_added: row.get("time_added"),
        archived: row.get("archived"),
    }
}

impl Database {
    /// Subscriptions due for a check, in scheduling order.
    ///
    /// Two ordered groups, concatenated. Healthy subscriptions (no error
    /// history) whose interval has elapsed come first; subscriptions in an
    /// error state follow after the re-poll floor. Within each group:
    /// priority descending, then oldest attempt first. Erroring
    /// subscriptions are retried but never starve healthy ones.
    pub async fn get_due_subscriptions(&self, now: i64) -> Result<Vec<Subscription>> {
        let healthy = sqlx::query(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
             WHERE paused <> 1
               AND (last_check IS NULL OR last_successful_check = last_check)
               AND (last_check IS NULL
                    OR MAX(COALESCE(last_check, 0), COALESCE(last_successful_check, 0))
                       + check_interval <= ?)
               AND (last_check IS NULL OR last_check + ? <= ?)
             ORDER BY priority DESC, COALESCE(last_check, 0) ASC"
        ))
        .bind(now)
        .bind(MIN_RECHECK_FLOOR_SECS)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let errored = sqlx::query(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
             WHERE paused <> 1
               AND last_check IS NOT NULL
               AND (last_successful_check IS NULL OR last_successful_check <> last_check)
               AND last_check + ? <= ?
             ORDER BY priority DESC, last_check ASC"
        ))
        .bind(MIN_RECHECK_FLOOR_SECS)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let mut result: Vec<Subscription> = healthy.iter().map(row_to_subscription).collect();
        result.extend(errored.iter().map(row_to_subscription));
        Ok(result)
    }

    pub async fn get_subscription(&self, id: i64) -> Result<Option<Subscription>> {
        let row = sqlx::query(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_subscription))
    }

    pub async fn get_subscriptions(&self, selector: &ListSelector) -> Result<Vec<Subscription>> {
        let rows = if let Some(ids) = &selector.ids {
            let mut result = Vec::new();
            for id in ids {
                if let Some(sub) = self.get_subscription(*id).await? {
                    result.push(sub);
                }
            }
            return Ok(result);
        } else if let (Some(from), Some(to)) = (selector.from, selector.to) {
            sqlx::query(&format!(
                "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
                 WHERE id >= ? AND id <= ? ORDER BY id ASC"
            ))
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions ORDER BY id ASC"
            ))
            .fetch_all(&self.pool)
            .await?
        };
        Ok(rows.iter().map(row_to_subscription).collect())
    }

    pub async fn get_subscriptions_by_downloader_data(
        &self,
        downloader: &str,
        keywords: &str,
    ) -> Result<Vec<Subscription>> {
        let rows = sqlx::query(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
             WHERE downloader = ? AND keywords = ?"
        ))
        .bind(downloader)
        .bind(keywords)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_subscription).collect())
    }

    /// Bulk add-or-update. Payloads carrying an id update only their
    /// supplied fields; the rest insert a new row, stamping the creation
    /// time and filling per-downloader defaults from the configuration.
    pub async fn add_or_update_subscriptions(
        &self,
        payloads: &[SubscriptionUpsert],
        defaults: &HashMap<String, SubscriptionDefaults>,
    ) -> Result<Vec<i64>> {
        let mut ids = Vec::new();
        for payload in payloads {
            if let Some(id) = payload.id {
                if self.update_subscription_fields(id, payload).await? {
                    info!("Updated subscription with ID {}", id);
                    ids.push(id);
                } else {
                    warn!("Subscription {} not found for update", id);
                }
            } else {
                let (Some(keywords), Some(downloader)) = (&payload.keywords, &payload.downloader)
                else {
                    warn!("Skipping subscription insert without keywords and downloader");
                    continue;
                };
                let existing = self
                    .get_subscriptions_by_downloader_data(downloader, keywords)
                    .await?;
                if !existing.is_empty() {
                    warn!(
                        "A subscription for '{}' with downloader '{}' already exists, adding anyway",
                        keywords, downloader
                    );
                }
                let d = defaults.get(downloader).cloned().unwrap_or_default();
                let id = sqlx::query(
                    "INSERT INTO subscriptions
                     (keywords, downloader, additional_data, check_interval, priority, paused,
                      time_created, filter, abort_after, max_files_initial, max_files_regular, comment)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(keywords)
                .bind(downloader)
                .bind(payload.additional_data.as_deref().unwrap_or(""))
                .bind(
                    payload
                        .check_interval
                        .or(d.check_interval)
                        .unwrap_or(86400),
                )
                .bind(payload.priority.unwrap_or(0))
                .bind(payload.paused.unwrap_or(false))
                .bind(unix_time())
                .bind(payload.filter.as_ref().or(d.filter.as_ref()))
                .bind(payload.abort_after.or(d.abort_after).unwrap_or(20))
                .bind(
                    payload
                        .max_files_initial
                        .or(d.max_files_initial)
                        .unwrap_or(10000),
                )
                .bind(payload.max_files_regular.or(d.max_files_regular))
                .bind(&payload.comment)
                .execute(&self.pool)
                .await?
                .last_insert_rowid();
                info!(
                    "Added subscription: {} for downloader {}",
                    keywords, downloader
                );
                ids.push(id);
            }
        }
        Ok(ids)
    }

    async fn update_subscription_fields(
        &self,
        id: i64,
        payload: &SubscriptionUpsert,
    ) -> Result<bool> {
        let mut sets: Vec<&str> = Vec::new();
        if payload.keywords.is_some() {
            sets.push("keywords = ?");
        }
        if payload.downloader.is_some() {
            sets.push("downloader = ?");
        }
        if payload.additional_data.is_some() {
            sets.push("additional_data = ?");
        }
        if payload.check_interval.is_some() {
            sets.push("check_interval = ?");
        }
        if payload.priority.is_some() {
            sets.push("priority = ?");
        }
        if payload.paused.is_some() {
            sets.push("paused = ?");
        }
        if payload.filter.is_some() {
            sets.push("filter = ?");
        }
        if payload.abort_after.is_some() {
            sets.push("abort_after = ?");
        }
        if payload.max_files_initial.is_some() {
            sets.push("max_files_initial = ?");
        }
        if payload.max_files_regular.is_some() {
            sets.push("max_files_regular = ?");
        }
        if payload.comment.is_some() {
            sets.push("comment = ?");
        }
        if sets.is_empty() {
            return Ok(self.get_subscription(id).await?.is_some());
        }

        let sql = format!(
            "UPDATE subscriptions SET {} WHERE id = ?",
            sets.join(", ")
        );
        let mut query = sqlx::query(&sql);
        if let Some(v) = &payload.keywords {
            query = query.bind(v);
        }
        if let Some(v) = &payload.downloader {
            query = query.bind(v);
        }
        if let Some(v) = &payload.additional_data {
            query = query.bind(v);
        }
        if let Some(v) = payload.check_interval {
            query = query.bind(v);
        }
        if let Some(v) = payload.priority {
            query = query.bind(v);
        }
        if let Some(v) = payload.paused {
            query = query.bind(v);
        }
        if let Some(v) = &payload.filter {
            query = query.bind(v);
        }
        if let Some(v) = payload.abort_after {
            query = query.bind(v);
        }
        if let Some(v) = payload.max_files_initial {
            query = query.bind(v);
        }
        if let Some(v) = payload.max_files_regular {
            query = query.bind(v);
        }
        if let Some(v) = &payload.comment {
            query = query.bind(v);
        }
        let result = query.bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Persist the check-time columns after a run. Owned by the
    /// subscription worker; the API never touches these fields.
    pub async fn update_subscription_check_times(
        &self,
        id: i64,
        last_check: i64,
        last_successful_check: Option<i64>,
    ) -> Result<()> {
        match last_successful_check {
            Some(ok_time) => {
                sqlx::query(
                    "UPDATE subscriptions SET last_check = ?, last_successful_check = ? WHERE id = ?",
                )
                .bind(last_check)
                .bind(ok_time)
                .bind(id)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query("UPDATE subscriptions SET last_check = ? WHERE id = ?")
                    .bind(last_check)
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }

    pub async fn delete_subscriptions(&self, ids: &[i64]) -> Result<()> {
        for id in ids {
            sqlx::query("DELETE FROM subscriptions WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        info!(
            "Deleted subscriptions with IDs: {}",
            ids.iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(())
    }

    // --- check history ---

    pub async fn add_subscription_check(
        &self,
        subscription_id: i64,
        new_files: i64,
        already_seen_files: i64,
        time_started: i64,
        time_finished: i64,
        status: &str,
    ) -> Result<i64> {
        let id = sqlx::query(
            "INSERT INTO subscription_checks
             (subscription_id, new_files, already_seen_files, time_started, time_finished, status)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(subscription_id)
        .bind(new_files)
        .bind(already_seen_files)
        .bind(time_started)
        .bind(time_finished)
        .bind(status)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    pub async fn add_or_update_subscription_checks(
        &self,
        payloads: &[SubscriptionCheckUpsert],
    ) -> Result<()> {
        for payload in payloads {
            if let Some(id) = payload.id {
                // Only the archived flag and status are sensible to touch
                // on an append-only history row.
                if let Some(archived) = payload.archived {
                    sqlx::query("UPDATE subscription_checks SET archived = ? WHERE id = ?")
                        .bind(archived)
                        .bind(id)
                        .execute(&self.pool)
                        .await?;
                }
                if let Some(status) = &payload.status {
                    sqlx::query("UPDATE subscription_checks SET status = ? WHERE id = ?")
                        .bind(status)
                        .bind(id)
                        .execute(&self.pool)
                        .await?;
                }
            } else {
                sqlx::query(
                    "INSERT INTO subscription_checks
                     (subscription_id, time_started, time_finished, new_files,
                      already_seen_files, status, archived)
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(payload.subscription_id)
                .bind(payload.time_started)
                .bind(payload.time_finished)
                .bind(payload.new_files.unwrap_or(0))
                .bind(payload.already_seen_files.unwrap_or(0))
                .bind(payload.status.as_deref().unwrap_or("ok"))
                .bind(payload.archived.unwrap_or(false))
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    pub async fn get_subscription_checks(
        &self,
        subscription_id: Option<i64>,
        archived: bool,
    ) -> Result<Vec<SubscriptionCheck>> {
        let rows = match (subscription_id, archived) {
            (Some(id), true) => {
                sqlx::query(
                    "SELECT id, subscription_id, time_started, time_finished, new_files,
                     already_seen_files, status, archived
                     FROM subscription_checks WHERE subscription_id = ? ORDER BY id ASC",
                )
                .bind(id)
                .fetch_all(&self.pool)
                .await?
            }
            (Some(id), false) => {
                sqlx::query(
                    "SELECT id, subscription_id, time_started, time_finished, new_files,
                     already_seen_files, status, archived
                     FROM subscription_checks
                     WHERE subscription_id = ? AND archived <> 1 ORDER BY id ASC",
                )
                .bind(id)
                .fetch_all(&self.pool)
                .await?
            }
            (None, true) => {
                sqlx::query(
                    "SELECT id, subscription_id, time_started, time_finished, new_files,
                     already_seen_files, status, archived
                     FROM subscription_checks ORDER BY id ASC",
                )
                .fetch_all(&self.pool)
                .await?
            }
            (None, false) => {
                sqlx::query(
                    "SELECT id, subscription_id, time_started, time_finished, new_files,
                     already_seen_files, status, archived
                     FROM subscription_checks WHERE archived <> 1 ORDER BY id ASC",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows.iter().map(row_to_check).collect())
    }

    pub async fn delete_subscription_checks(&self, ids: &[i64]) -> Result<()> {
        for id in ids {
            sqlx::query("DELETE FROM subscription_checks WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    // --- missed-check bookkeeping ---

    /// Record the start of a subscription run. Inserts a provisional
    /// in-progress row and returns its id; the row is only removed on
    /// success, so a crash mid-run leaves durable evidence. Staleness is
    /// computed here from the previous `last_check`: if this attempt comes
    /// more than twice the interval after it, a permanent stale row is
    /// also inserted.
    pub async fn begin_missed_check(&self, sub: &Subscription, now: i64) -> Result<i64> {
        if let Some(previous) = sub.last_check {
            if now > previous + STALE_INTERVAL_FACTOR * sub.check_interval {
                let late_by = now - previous - sub.check_interval;
                sqlx::query(
                    "INSERT INTO missed_subscription_checks
                     (subscription_id, reason, note, time_added) VALUES (?, ?, ?, ?)",
                )
                .bind(sub.id)
                .bind(MissedCheckReason::Stale.as_i64())
                .bind(format!("check started {late_by} seconds late"))
                .bind(now)
                .execute(&self.pool)
                .await?;
                warn!(
                    "Subscription {} is stale: check started {} seconds late",
                    sub.id, late_by
                );
            }
        }

        let id = sqlx::query(
            "INSERT INTO missed_subscription_checks
             (subscription_id, reason, time_added) VALUES (?, ?, ?)",
        )
        .bind(sub.id)
        .bind(MissedCheckReason::InProgress.as_i64())
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    /// Resolve the provisional row from [`begin_missed_check`] once a run
    /// finished (success or error; a crashed run never gets here).
    ///
    /// Success deletes the row. A failed run that still produced new files
    /// converts it to a permanent errored-with-files record; a failed run
    /// without files deletes it too, since the check history row already
    /// carries the error.
    pub async fn resolve_missed_check(
        &self,
        provisional_id: i64,
        success: bool,
        new_files: i64,
        status_text: &str,
    ) -> Result<()> {
        if !success && new_files > 0 {
            sqlx::query(
                "UPDATE missed_subscription_checks SET reason = ?, note = ? WHERE id = ?",
            )
            .bind(MissedCheckReason::ErroredWithFiles.as_i64())
            .bind(format!("{new_files} new files despite error: {status_text}"))
            .bind(provisional_id)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query("DELETE FROM missed_subscription_checks WHERE id = ?")
                .bind(provisional_id)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    pub async fn add_or_update_missed_checks(&self, payloads: &[MissedCheckUpsert]) -> Result<()> {
        for payload in payloads {
            if let Some(id) = payload.id {
                if let Some(archived) = payload.archived {
                    sqlx::query("UPDATE missed_subscription_checks SET archived = ? WHERE id = ?")
                        .bind(archived)
                        .bind(id)
                        .execute(&self.pool)
                        .await?;
                }
                if let Some(note) = &payload.note {
                    sqlx::query("UPDATE missed_subscription_checks SET note = ? WHERE id = ?")
                        .bind(note)
                        .bind(id)
                        .execute(&self.pool)
                        .await?;
                }
            } else {
                let Some(subscription_id) = payload.subscription_id else {
                    warn!("Skipping missed-check insert without a subscription_id");
                    continue;
                };
                sqlx::query(
                    "INSERT INTO missed_subscription_checks
                     (subscription_id, reason, note, time_added, archived)
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(subscription_id)
                .bind(payload.reason.unwrap_or(0))
                .bind(&payload.note)
                .bind(unix_time())
                .bind(payload.archived.unwrap_or(false))
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    pub async fn get_missed_checks(
        &self,
        subscription_id: Option<i64>,
        archived: bool,
    ) -> Result<Vec<MissedCheck>> {
        let mut sql = String::from(
            "SELECT id, subscription_id, reason, note, time_added, archived
             FROM missed_subscription_checks WHERE 1 = 1",
        );
        if subscription_id.is_some() {
            sql.push_str(" AND subscription_id = ?");
        }
        if !archived {
            sql.push_str(" AND archived <> 1");
        }
        sql.push_str(" ORDER BY id ASC");

        let mut query = sqlx::query(&sql);
        if let Some(id) = subscription_id {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_missed_check).collect())
    }

    pub async fn delete_missed_checks(&self, ids: &[i64]) -> Result<()> {
        for id in ids {
            sqlx::query("DELETE FROM missed_subscription_checks WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }
}
