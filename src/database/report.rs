//! Aggregate status report over the whole job store.

use anyhow::Result;
use serde::Serialize;
use tracing::info;

use super::subscriptions::MIN_RECHECK_FLOOR_SECS;
use super::Database;
use crate::models::URL_STATUS_PENDING;

/// Counts summarizing the health of all queues at one point in time.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub subscriptions_total: i64,
    pub subscriptions_paused: i64,
    pub subscriptions_errored: i64,
    pub subscriptions_never_checked: i64,
    pub subscriptions_due: i64,
    pub urls_total: i64,
    pub urls_pending: i64,
    pub urls_errored: i64,
    pub urls_paused: i64,
    pub reverse_lookup_pending: i64,
    pub missed_checks: i64,
    pub file_results: i64,
}

impl Database {
    async fn count(&self, sql: &str) -> Result<i64> {
        let n: i64 = sqlx::query_scalar(sql).fetch_one(self.pool()).await?;
        Ok(n)
    }

    /// Build the aggregate report and log a one-line summary.
    pub async fn generate_report(&self, now: i64) -> Result<RunReport> {
        let report = RunReport {
            subscriptions_total: self.count("SELECT COUNT(*) FROM subscriptions").await?,
            subscriptions_paused: self
                .count("SELECT COUNT(*) FROM subscriptions WHERE paused = 1")
                .await?,
            subscriptions_errored: self
                .count(
                    "SELECT COUNT(*) FROM subscriptions
                     WHERE last_check IS NOT NULL
                       AND (last_successful_check IS NULL OR last_successful_check <> last_check)",
                )
                .await?,
            subscriptions_never_checked: self
                .count("SELECT COUNT(*) FROM subscriptions WHERE last_check IS NULL")
                .await?,
            subscriptions_due: self.get_due_subscriptions(now).await?.len() as i64,
            urls_total: self.count("SELECT COUNT(*) FROM single_url_queue").await?,
            urls_pending: self
                .count(&format!(
                    "SELECT COUNT(*) FROM single_url_queue
                     WHERE status = {URL_STATUS_PENDING} AND paused <> 1"
                ))
                .await?,
            urls_errored: self
                .count("SELECT COUNT(*) FROM single_url_queue WHERE status > 0")
                .await?,
            urls_paused: self
                .count("SELECT COUNT(*) FROM single_url_queue WHERE paused = 1")
                .await?,
            reverse_lookup_pending: self
                .count(&format!(
                    "SELECT COUNT(*) FROM reverse_lookup_jobs
                     WHERE status = {URL_STATUS_PENDING} AND paused <> 1"
                ))
                .await?,
            missed_checks: self
                .count("SELECT COUNT(*) FROM missed_subscription_checks WHERE archived <> 1")
                .await?,
            file_results: self.count_file_results().await?,
        };

        info!(
            "Report: {} subscriptions ({} paused, {} errored, {} due, floor {}s), \
             {} queued URLs ({} pending, {} errored), {} missed checks, {} file results",
            report.subscriptions_total,
            report.subscriptions_paused,
            report.subscriptions_errored,
            report.subscriptions_due,
            MIN_RECHECK_FLOOR_SECS,
            report.urls_total,
            report.urls_pending,
            report.urls_errored,
            report.missed_checks,
            report.file_results
        );
        Ok(report)
    }
}
