//! Result reconciliation: folds downloader side-channel output back into
//! the job store.
//!
//! Two independent passes. The capture scan reads the per-run console
//! output and associates every produced file with its owning subscription
//! or URL. The log drain pops entries from the durable log-file queue and
//! extracts every contacted URL into the known-URL cache. Both passes are
//! resumable after a crash: leftover capture files are swept at startup,
//! and log files are queued before the downloader even runs.

use anyhow::Result;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info};

use crate::database::Database;
use crate::models::Owner;

fn owner_stem(owner: Owner) -> String {
    match owner {
        Owner::Subscription(id) => format!("subscription-{id}"),
        Owner::Url(id) => format!("single-url-{id}"),
    }
}

/// Console capture file for one queue item, under `temp/`.
pub fn capture_file_path(root: &Path, owner: Owner) -> PathBuf {
    root.join("temp").join(format!("{}-output.txt", owner_stem(owner)))
}

/// Structured log written by the downloader, under `logs/`.
pub fn log_file_path(root: &Path, owner: Owner) -> PathBuf {
    root.join("logs").join(format!("{}-latest.txt", owner_stem(owner)))
}

/// Rotation target for the previous run's log.
pub fn old_log_file_path(root: &Path, owner: Owner) -> PathBuf {
    root.join("logs").join(format!("{}-old.txt", owner_stem(owner)))
}

pub fn unsupported_urls_file_path(root: &Path, owner: Owner) -> PathBuf {
    root.join("logs")
        .join(format!("{}-unsupported-latest.txt", owner_stem(owner)))
}

pub fn old_unsupported_urls_file_path(root: &Path, owner: Owner) -> PathBuf {
    root.join("logs")
        .join(format!("{}-unsupported-old.txt", owner_stem(owner)))
}

/// Append the contents of `from` to `to` and truncate `from`. Used to
/// rotate the previous run's log out of the way before the downloader
/// rewrites it. Does nothing when `from` does not exist.
pub async fn rotate_file(from: &Path, to: &Path) -> Result<()> {
    if !from.is_file() {
        return Ok(());
    }
    let mut text = tokio::fs::read_to_string(from).await?;
    if !text.is_empty() {
        if !text.ends_with('\n') {
            text.push('\n');
        }
        use tokio::io::AsyncWriteExt;
        let mut target = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(to)
            .await?;
        target.write_all(text.as_bytes()).await?;
    }
    tokio::fs::remove_file(from).await?;
    Ok(())
}

/// Scan one item's console capture for produced files and fold them into
/// the job store. Returns `(new_files, already_seen_files)`.
///
/// A line counts as a file path when it resolves to an existing path,
/// either as given or relative to the data directory. Deliberately
/// permissive: a false positive is a junk association row, a false
/// negative loses a real file. A leading `"# "` marks a file the
/// downloader skipped because it already existed. The capture file is
/// deleted after processing so it is consumed at most once.
pub async fn process_capture_file(db: &Database, owner: Owner) -> Result<(i64, i64)> {
    let path = capture_file_path(db.root(), owner);
    if !path.is_file() {
        return Ok((0, 0));
    }

    let mut new_count = 0i64;
    let mut skipped_count = 0i64;
    let contents = tokio::fs::read_to_string(&path).await?;
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (candidate, skipped) = match line.strip_prefix("# ") {
            Some(rest) => (rest.trim(), true),
            None => (line, false),
        };
        let file = resolve_existing(db.root(), candidate);
        let Some(file) = file else {
            debug!("Does not look like a filepath: {}", line);
            continue;
        };
        if skipped {
            skipped_count += 1;
        } else {
            new_count += 1;
        }
        db.associate_additional_data(&file, owner).await?;
    }

    tokio::fs::remove_file(&path).await?;
    Ok((new_count, skipped_count))
}

fn resolve_existing(root: &Path, candidate: &str) -> Option<PathBuf> {
    let direct = PathBuf::from(candidate);
    if direct.exists() {
        return Some(direct);
    }
    let relative = root.join(candidate);
    if relative.exists() {
        return Some(relative);
    }
    None
}

/// Discover capture files orphaned by a crash and replay the capture scan
/// for each. Run once at startup, before the workers begin.
pub async fn sweep_leftover_captures(db: &Database) -> Result<()> {
    static LEFTOVER: OnceLock<Regex> = OnceLock::new();
    let pattern = LEFTOVER.get_or_init(|| {
        Regex::new(r"^(subscription|single-url)-([0-9]+)-output\.txt$").unwrap()
    });

    info!("Checking for leftover downloader output files...");
    let temp_dir = db.root().join("temp");
    let mut entries = tokio::fs::read_dir(&temp_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(captures) = pattern.captures(&name) else {
            continue;
        };
        let id: i64 = captures[2].parse()?;
        let owner = match &captures[1] {
            "subscription" => Owner::Subscription(id),
            _ => Owner::Url(id),
        };
        info!("Processing leftover file {}...", name);
        process_capture_file(db, owner).await?;
    }
    Ok(())
}

/// Drain the durable log-file queue: extract every contacted URL from
/// each queued log into the known-URL cache, then drop the entry.
pub async fn parse_queued_log_files(db: &Database) -> Result<()> {
    static REQUEST_LINE: OnceLock<Regex> = OnceLock::new();
    static JOB_LINE: OnceLock<Regex> = OnceLock::new();
    static SUB_FILE: OnceLock<Regex> = OnceLock::new();
    static URL_FILE: OnceLock<Regex> = OnceLock::new();

    let request_line = REQUEST_LINE.get_or_init(|| {
        Regex::new(r#"\[urllib3\.connectionpool\]\[debug\] (http.*?)(?::[0-9]+)? "[A-Z]+ (/.*?) HTTP"#)
            .unwrap()
    });
    let job_line =
        JOB_LINE.get_or_init(|| Regex::new(r"Starting DownloadJob for '(.*)'$").unwrap());
    let sub_file =
        SUB_FILE.get_or_init(|| Regex::new(r"subscription-([0-9]+)-").unwrap());
    let url_file = URL_FILE.get_or_init(|| Regex::new(r"single-url-([0-9]+)-").unwrap());

    while let Some(relative) = db.get_queued_log_file().await? {
        let path = db.root().join(&relative);

        let owner = if let Some(captures) = url_file.captures(&relative) {
            Some(Owner::Url(captures[1].parse()?))
        } else if let Some(captures) = sub_file.captures(&relative) {
            Some(Owner::Subscription(captures[1].parse()?))
        } else {
            None
        };

        if path.is_file() {
            info!("Parsing log file: {}", relative);
            let contents = tokio::fs::read_to_string(&path).await?;
            let mut urls = Vec::new();
            for line in contents.lines() {
                let line = line.trim();
                if let Some(captures) = request_line.captures(line) {
                    urls.push(format!("{}{}", &captures[1], &captures[2]));
                }
                if let Some(captures) = job_line.captures(line) {
                    urls.push(captures[1].to_string());
                }
            }
            db.add_known_urls(&urls, owner).await?;
            info!(
                "Finished parsing log file {}, found {} URLs",
                relative,
                urls.len()
            );
        } else {
            debug!("Queued log file {} no longer exists", relative);
        }

        db.remove_log_file_from_parse_queue(&path).await?;
    }
    Ok(())
}
