//! Worker scheduling and lifecycle.
//!
//! Each queue class (subscriptions, single URLs, reverse lookups) is
//! served by exactly one worker task, so at most one item per class is in
//! flight at any time. A shared [`SchedulerControl`] carries pause flags,
//! per-worker status lines and the daemon-wide shutdown signal.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tracing::{error, info};

use crate::config::Config;
use crate::database::Database;
use crate::downloader::Executor;
use crate::utils::unix_time;

pub mod reverse_lookup;
pub mod single_url;
pub mod subscription;

pub use reverse_lookup::ReverseLookupWorker;
pub use single_url::SingleUrlWorker;
pub use subscription::SubscriptionWorker;

/// The three queue classes, each owned by one worker task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    Subscriptions,
    SingleUrls,
    ReverseLookup,
}

impl WorkerKind {
    pub const ALL: [WorkerKind; 3] = [
        WorkerKind::Subscriptions,
        WorkerKind::SingleUrls,
        WorkerKind::ReverseLookup,
    ];

    /// Stable tag used for execution cancellation, log-queue attribution
    /// and file naming.
    pub fn tag(&self) -> &'static str {
        match self {
            WorkerKind::Subscriptions => "subscriptions",
            WorkerKind::SingleUrls => "single-urls",
            WorkerKind::ReverseLookup => "reverse-lookup",
        }
    }
}

impl std::fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Snapshot of one worker's state, as reported by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub text: String,
    pub updated_at: i64,
    pub paused: bool,
    pub ended: bool,
}

/// Shared control state between the worker tasks, the HTTP API and the
/// daemon entry point.
pub struct SchedulerControl {
    shutdown_started: AtomicBool,
    shutdown: Notify,
    paused: RwLock<HashSet<WorkerKind>>,
    ended: RwLock<HashSet<WorkerKind>>,
    status: RwLock<HashMap<WorkerKind, (String, i64)>>,
}

impl SchedulerControl {
    pub fn new() -> Self {
        Self {
            shutdown_started: AtomicBool::new(false),
            shutdown: Notify::new(),
            paused: RwLock::new(HashSet::new()),
            ended: RwLock::new(HashSet::new()),
            status: RwLock::new(HashMap::new()),
        }
    }

    pub async fn set_status(&self, kind: WorkerKind, text: impl Into<String>) {
        let mut status = self.status.write().await;
        status.insert(kind, (text.into(), unix_time()));
    }

    pub async fn status_report(&self) -> HashMap<WorkerKind, WorkerStatus> {
        let status = self.status.read().await;
        let paused = self.paused.read().await;
        let ended = self.ended.read().await;
        let mut report = HashMap::new();
        for kind in WorkerKind::ALL {
            let (text, updated_at) = status
                .get(&kind)
                .cloned()
                .unwrap_or_else(|| ("not started".to_string(), 0));
            report.insert(
                kind,
                WorkerStatus {
                    text,
                    updated_at,
                    paused: paused.contains(&kind),
                    ended: ended.contains(&kind),
                },
            );
        }
        report
    }

    pub async fn pause(&self, kind: WorkerKind) {
        let mut paused = self.paused.write().await;
        if paused.insert(kind) {
            info!("Paused worker: {}", kind);
        }
    }

    pub async fn resume(&self, kind: WorkerKind) {
        let mut paused = self.paused.write().await;
        if paused.remove(&kind) {
            info!("Resumed worker: {}", kind);
        }
    }

    pub async fn is_paused(&self, kind: WorkerKind) -> bool {
        self.paused.read().await.contains(&kind)
    }

    async fn mark_ended(&self, kind: WorkerKind) {
        self.ended.write().await.insert(kind);
    }

    /// Start daemon shutdown. Safe to call more than once; only the first
    /// call logs.
    pub fn begin_shutdown(&self) {
        if !self.shutdown_started.swap(true, Ordering::SeqCst) {
            info!("Shutdown initiated");
        }
        self.shutdown.notify_waiters();
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_started.load(Ordering::SeqCst)
    }

    /// Resolves once shutdown has been requested. Registers with the
    /// notify before re-checking the flag; `notify_waiters` only wakes
    /// already-registered waiters, so checking first could miss a
    /// concurrent [`begin_shutdown`](Self::begin_shutdown).
    pub async fn wait_for_shutdown(&self) {
        let notified = self.shutdown.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.shutdown_requested() {
            return;
        }
        notified.await;
    }
}

impl Default for SchedulerControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a worker needs to serve its queue.
#[derive(Clone)]
pub struct WorkerContext {
    pub db: Arc<Database>,
    pub config: Arc<Config>,
    pub executor: Arc<dyn Executor>,
    pub control: Arc<SchedulerControl>,
}

/// One queue class from the scheduler's point of view.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    fn kind(&self) -> WorkerKind;

    /// Process at most one due item. Returns whether an item was
    /// processed; `false` means the queue is currently idle.
    async fn process_next(&self, ctx: &WorkerContext) -> anyhow::Result<bool>;
}

/// Drive one queue until shutdown. Due items are processed back to back;
/// an idle or paused queue sleeps for the poll interval (interrupted
/// early by shutdown).
pub async fn run_worker(queue: &dyn WorkQueue, ctx: &WorkerContext) -> anyhow::Result<()> {
    let kind = queue.kind();
    let poll = Duration::from_secs(ctx.config.workers.poll_interval_secs.max(1));
    ctx.control.set_status(kind, "started").await;
    info!("Worker started: {}", kind);

    while !ctx.control.shutdown_requested() {
        if ctx.control.is_paused(kind).await {
            ctx.control.set_status(kind, "paused").await;
            idle_sleep(ctx, poll).await;
            continue;
        }

        if queue.process_next(ctx).await? {
            continue;
        }

        ctx.control.set_status(kind, "nothing to do").await;
        idle_sleep(ctx, poll).await;
    }

    ctx.control.set_status(kind, "stopped").await;
    info!("Worker stopped: {}", kind);
    Ok(())
}

async fn idle_sleep(ctx: &WorkerContext, poll: Duration) {
    tokio::select! {
        _ = tokio::time::sleep(poll) => {}
        _ = ctx.control.wait_for_shutdown() => {}
    }
}

/// Spawn one task per queue class. A worker failing with an error takes
/// the whole daemon down; the job store is only trustworthy while every
/// queue is being served.
pub fn spawn_workers(ctx: &WorkerContext) -> Vec<tokio::task::JoinHandle<()>> {
    let queues: Vec<Arc<dyn WorkQueue>> = vec![
        Arc::new(SubscriptionWorker),
        Arc::new(SingleUrlWorker),
        Arc::new(ReverseLookupWorker),
    ];

    queues
        .into_iter()
        .map(|queue| {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                let kind = queue.kind();
                if let Err(e) = run_worker(queue.as_ref(), &ctx).await {
                    error!("Worker {} failed: {:#}", kind, e);
                    ctx.control.set_status(kind, format!("failed: {e:#}")).await;
                    ctx.control.begin_shutdown();
                }
                ctx.control.mark_ended(kind).await;
            })
        })
        .collect()
}
