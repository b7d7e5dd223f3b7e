//! Subscription worker: runs due subscription checks one at a time.

use async_trait::async_trait;
use tracing::info;

use super::{WorkQueue, WorkerContext, WorkerKind};
use crate::downloader::{DownloadRequest, ExecutionOutcome};
use crate::models::{Owner, Subscription};
use crate::reconciler;
use crate::utils::unix_time;

pub struct SubscriptionWorker;

#[async_trait]
impl WorkQueue for SubscriptionWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::Subscriptions
    }

    async fn process_next(&self, ctx: &WorkerContext) -> anyhow::Result<bool> {
        let due = ctx.db.get_due_subscriptions(unix_time()).await?;
        let Some(sub) = due.into_iter().next() else {
            return Ok(false);
        };
        check_subscription(ctx, &sub).await?;
        Ok(true)
    }
}

/// Run one subscription check end to end.
///
/// The log file is queued for parsing and the provisional missed-check
/// row is written before the downloader starts, so a crash at any point
/// leaves enough durable state to reconcile on the next startup.
async fn check_subscription(ctx: &WorkerContext, sub: &Subscription) -> anyhow::Result<()> {
    let kind = WorkerKind::Subscriptions;
    let owner = Owner::Subscription(sub.id);
    let root = ctx.db.root();
    let started = unix_time();

    ctx.control
        .set_status(
            kind,
            format!(
                "checking subscription: {} (downloader: {}, id: {})",
                sub.keywords, sub.downloader, sub.id
            ),
        )
        .await;
    info!(
        "Checking subscription: {} (downloader: {}, id: {})",
        sub.keywords, sub.downloader, sub.id
    );

    let log_file = reconciler::log_file_path(root, owner);
    let unsupported_file = reconciler::unsupported_urls_file_path(root, owner);
    reconciler::rotate_file(&log_file, &reconciler::old_log_file_path(root, owner)).await?;
    reconciler::rotate_file(
        &unsupported_file,
        &reconciler::old_unsupported_urls_file_path(root, owner),
    )
    .await?;

    ctx.db.add_log_file_to_parse_queue(&log_file, kind.tag()).await?;
    let provisional_id = ctx.db.begin_missed_check(sub, started).await?;

    // The very first check gets the (usually larger) initial file cap and
    // no abort threshold, so the whole backlog is fetched once.
    let initial = sub.is_initial_check();
    let request = DownloadRequest {
        target: ctx
            .config
            .subscription_target(&sub.downloader, &sub.keywords),
        subscription_mode: true,
        ignore_anchor: false,
        metadata_only: false,
        overwrite_existing: false,
        filter: sub.filter.clone(),
        abort_after: (!initial).then_some(sub.abort_after),
        max_files: if initial {
            Some(sub.max_files_initial)
        } else {
            sub.max_files_regular
        },
        log_file,
        console_output_file: reconciler::capture_file_path(root, owner),
        unsupported_urls_file: unsupported_file,
    };

    let outcome = ctx.executor.execute(kind.tag(), &request).await?;
    let finished = unix_time();

    let (success, status_text) = match outcome {
        ExecutionOutcome::Completed(status) if status.is_success() => (true, "ok".to_string()),
        ExecutionOutcome::Completed(status) => (false, status.error_text()),
        ExecutionOutcome::Cancelled => (false, "interrupted".to_string()),
    };

    // A successful check sets both check times to the same start value;
    // a failed one advances only last_check.
    ctx.db
        .update_subscription_check_times(sub.id, started, success.then_some(started))
        .await?;

    let (new_files, already_seen) = reconciler::process_capture_file(&ctx.db, owner).await?;
    reconciler::parse_queued_log_files(&ctx.db).await?;

    ctx.db
        .add_subscription_check(sub.id, new_files, already_seen, started, finished, &status_text)
        .await?;
    ctx.db
        .resolve_missed_check(provisional_id, success, new_files, &status_text)
        .await?;

    ctx.control
        .set_status(
            kind,
            format!(
                "finished checking subscription: {} (id: {}), new files: {}, already seen: {}, status: {}",
                sub.keywords, sub.id, new_files, already_seen, status_text
            ),
        )
        .await;
    info!(
        "Subscription {} checked in {}s, new files: {}, already seen: {}, status: {}",
        sub.id,
        finished - started,
        new_files,
        already_seen,
        status_text
    );
    Ok(())
}
