//! Reverse-lookup worker: resolves source URLs for local files or file
//! URLs through an external lookup tool, then feeds the results into the
//! single-URL queue.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};

use super::{WorkQueue, WorkerContext, WorkerKind};
use crate::config::ReverseLookupPreset;
use crate::models::{QueuedUrlUpsert, ReverseLookupJob, URL_STATUS_OK};
use crate::utils::unix_time;

pub struct ReverseLookupWorker;

#[async_trait]
impl WorkQueue for ReverseLookupWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::ReverseLookup
    }

    async fn process_next(&self, ctx: &WorkerContext) -> anyhow::Result<bool> {
        let due = ctx.db.get_due_reverse_lookup_jobs().await?;
        let Some(job) = due.into_iter().next() else {
            return Ok(false);
        };
        run_lookup(ctx, &job).await?;
        Ok(true)
    }
}

async fn run_lookup(ctx: &WorkerContext, job: &ReverseLookupJob) -> anyhow::Result<()> {
    let kind = WorkerKind::ReverseLookup;
    ctx.control
        .set_status(kind, format!("running reverse lookup job {}", job.id))
        .await;

    let preset_name = job.config.as_deref().unwrap_or("default");
    let Some(preset) = ctx.config.reverse_lookup.presets.get(preset_name) else {
        warn!(
            "Reverse-lookup job {} references unknown preset '{}'",
            job.id, preset_name
        );
        ctx.db
            .update_reverse_lookup_result(
                job.id,
                1,
                &format!("no lookup preset named '{preset_name}'"),
                0,
                None,
                unix_time(),
            )
            .await?;
        return Ok(());
    };

    // A job for a local file that no longer exists can never succeed.
    if let Some(file_path) = &job.file_path {
        let path = std::path::Path::new(file_path);
        if !path.is_file() && !ctx.db.root().join(file_path).is_file() {
            ctx.db
                .update_reverse_lookup_result(
                    job.id,
                    1,
                    &format!("file not found: {file_path}"),
                    0,
                    None,
                    unix_time(),
                )
                .await?;
            return Ok(());
        }
    }

    let (urls, extra_lines, exit_ok) = match execute_lookup(preset, job).await {
        Ok(result) => result,
        Err(e) => {
            ctx.db
                .update_reverse_lookup_result(
                    job.id,
                    1,
                    &format!("lookup tool failed to run: {e}"),
                    0,
                    None,
                    unix_time(),
                )
                .await?;
            return Ok(());
        }
    };

    if !urls.is_empty() {
        let paused = job.urls_paused || preset.urls_paused;
        let payloads: Vec<QueuedUrlUpsert> = urls
            .iter()
            .map(|url| QueuedUrlUpsert {
                url: Some(url.clone()),
                paused: Some(paused),
                reverse_lookup_id: Some(job.id),
                ..Default::default()
            })
            .collect();
        ctx.db.add_or_update_urls(&payloads).await?;
    }

    let status = if exit_ok { URL_STATUS_OK } else { 1 };
    let status_text = if exit_ok { "ok" } else { "lookup tool reported an error" };
    let additional = if extra_lines.is_empty() {
        None
    } else {
        Some(extra_lines.join("\n"))
    };
    ctx.db
        .update_reverse_lookup_result(
            job.id,
            status,
            status_text,
            urls.len() as i64,
            additional.as_deref(),
            unix_time(),
        )
        .await?;

    ctx.control
        .set_status(
            kind,
            format!("finished reverse lookup job {}, found {} URLs", job.id, urls.len()),
        )
        .await;
    info!(
        "Reverse-lookup job {} finished, found {} URLs",
        job.id,
        urls.len()
    );
    Ok(())
}

/// Run the preset's command with `{file}` and `{url}` substituted and
/// split its stdout into result URLs and everything else.
async fn execute_lookup(
    preset: &ReverseLookupPreset,
    job: &ReverseLookupJob,
) -> anyhow::Result<(Vec<String>, Vec<String>, bool)> {
    let file = job.file_path.as_deref().unwrap_or("");
    let file_url = job.file_url.as_deref().unwrap_or("");
    let args: Vec<String> = preset
        .command
        .iter()
        .map(|arg| arg.replace("{file}", file).replace("{url}", file_url))
        .collect();
    let (program, rest) = args
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("lookup preset has an empty command"))?;

    let output = Command::new(program)
        .args(rest)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await?;

    let mut urls = Vec::new();
    let mut extra = Vec::new();
    for line in String::from_utf8_lossy(&output.stdout).lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if url::Url::parse(line).is_ok() {
            urls.push(line.to_string());
        } else {
            extra.push(line.to_string());
        }
    }
    Ok((urls, extra, output.status.success()))
}
