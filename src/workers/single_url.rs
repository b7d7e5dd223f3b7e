//! Single-URL worker: drains the one-off download queue.

use async_trait::async_trait;
use tracing::info;

use super::{WorkQueue, WorkerContext, WorkerKind};
use crate::downloader::{DownloadRequest, ExecutionOutcome};
use crate::models::{Owner, QueuedUrl, URL_STATUS_OK};
use crate::reconciler;
use crate::utils::unix_time;

pub struct SingleUrlWorker;

#[async_trait]
impl WorkQueue for SingleUrlWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::SingleUrls
    }

    async fn process_next(&self, ctx: &WorkerContext) -> anyhow::Result<bool> {
        let pending = ctx.db.get_urls_to_download().await?;
        let Some(url) = pending.into_iter().next() else {
            return Ok(false);
        };
        download_url(ctx, &url).await?;
        Ok(true)
    }
}

async fn download_url(ctx: &WorkerContext, url: &QueuedUrl) -> anyhow::Result<()> {
    let kind = WorkerKind::SingleUrls;
    let owner = Owner::Url(url.id);
    let root = ctx.db.root();
    let started = unix_time();

    ctx.control
        .set_status(kind, format!("downloading URL: {} (id: {})", url.url, url.id))
        .await;
    info!("Downloading URL: {} (id: {})", url.url, url.id);

    let log_file = reconciler::log_file_path(root, owner);
    let unsupported_file = reconciler::unsupported_urls_file_path(root, owner);
    reconciler::rotate_file(&log_file, &reconciler::old_log_file_path(root, owner)).await?;
    reconciler::rotate_file(
        &unsupported_file,
        &reconciler::old_unsupported_urls_file_path(root, owner),
    )
    .await?;

    ctx.db.add_log_file_to_parse_queue(&log_file, kind.tag()).await?;

    let request = DownloadRequest {
        target: url.url.clone(),
        subscription_mode: false,
        ignore_anchor: url.ignore_anchor,
        metadata_only: url.metadata_only,
        overwrite_existing: url.overwrite_existing,
        filter: url.filter.clone(),
        abort_after: None,
        max_files: url.max_files,
        log_file,
        console_output_file: reconciler::capture_file_path(root, owner),
        unsupported_urls_file: unsupported_file,
    };

    let outcome = ctx.executor.execute(kind.tag(), &request).await?;
    let finished = unix_time();

    // Status carries the raw exit bitmask so a failed row can be
    // re-queued with full error context preserved in status_text.
    let (status, status_text) = match outcome {
        ExecutionOutcome::Completed(s) if s.is_success() => (URL_STATUS_OK, "ok".to_string()),
        ExecutionOutcome::Completed(s) => (i64::from(s.code()), s.error_text()),
        ExecutionOutcome::Cancelled => (1, "interrupted".to_string()),
    };

    let (new_files, already_seen) = reconciler::process_capture_file(&ctx.db, owner).await?;
    reconciler::parse_queued_log_files(&ctx.db).await?;

    ctx.db
        .update_url_result(url.id, status, &status_text, finished, new_files, already_seen)
        .await?;

    ctx.control
        .set_status(
            kind,
            format!(
                "finished URL: {} (id: {}), new files: {}, already seen: {}, status: {}",
                url.url, url.id, new_files, already_seen, status_text
            ),
        )
        .await;
    info!(
        "URL {} processed in {}s, new files: {}, already seen: {}, status: {}",
        url.id,
        finished - started,
        new_files,
        already_seen,
        status_text
    );
    Ok(())
}
