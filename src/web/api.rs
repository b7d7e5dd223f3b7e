//! Control-plane request handlers. Thin wrappers over the job store and
//! the scheduler control state; every response body is JSON.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use super::AppState;
use crate::models::*;
use crate::utils::{normalize_url, unix_time};
use crate::workers::WorkerKind;
use crate::API_VERSION;

fn internal(context: &str, e: anyhow::Error) -> StatusCode {
    error!("{}: {:#}", context, e);
    StatusCode::INTERNAL_SERVER_ERROR
}

pub async fn api_version() -> Json<serde_json::Value> {
    Json(json!({ "version": API_VERSION }))
}

// --- scheduler control ---

#[derive(Debug, Deserialize)]
pub struct WorkerSelector {
    pub worker: WorkerKind,
}

pub async fn get_status(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let workers = state.control.status_report().await;

    let now = unix_time();
    let subscriptions_due = state
        .db
        .get_due_subscriptions(now)
        .await
        .map_err(|e| internal("Failed to count due subscriptions", e))?
        .len();
    let urls_due = state
        .db
        .get_urls_to_download()
        .await
        .map_err(|e| internal("Failed to count due URLs", e))?
        .len();
    let reverse_lookups_due = state
        .db
        .get_due_reverse_lookup_jobs()
        .await
        .map_err(|e| internal("Failed to count due reverse lookups", e))?
        .len();

    Ok(Json(json!({
        "workers": workers,
        "due": {
            "subscriptions": subscriptions_due,
            "single_urls": urls_due,
            "reverse_lookup": reverse_lookups_due,
        },
        "shutdown_requested": state.control.shutdown_requested(),
    })))
}

pub async fn pause_worker(
    State(state): State<AppState>,
    Json(payload): Json<WorkerSelector>,
) -> Json<serde_json::Value> {
    state.control.pause(payload.worker).await;
    Json(json!({ "paused": payload.worker }))
}

pub async fn resume_worker(
    State(state): State<AppState>,
    Json(payload): Json<WorkerSelector>,
) -> Json<serde_json::Value> {
    state.control.resume(payload.worker).await;
    Json(json!({ "resumed": payload.worker }))
}

/// Abort the in-flight execution of one queue class. The worker treats
/// the aborted run as a failed one and keeps going.
///
/// Only downloader runs register for cancellation; reverse-lookup tools
/// are short-lived and always run to completion, so for that class
/// `was_running` is always `false` regardless of scheduler activity.
pub async fn kill_current(
    State(state): State<AppState>,
    Json(payload): Json<WorkerSelector>,
) -> Json<serde_json::Value> {
    let was_running = state.executor.cancel(payload.worker.tag()).await;
    Json(json!({ "worker": payload.worker, "was_running": was_running }))
}

pub async fn shutdown(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.control.begin_shutdown();
    Json(json!({ "status": "shutting down" }))
}

pub async fn run_report(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let report = state
        .db
        .generate_report(unix_time())
        .await
        .map_err(|e| internal("Failed to generate report", e))?;
    Ok(Json(json!(report)))
}

// --- subscriptions ---

#[derive(Debug, Deserialize)]
pub struct SubscriptionsUpsertRequest {
    pub subscriptions: Vec<SubscriptionUpsert>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    pub ids: Vec<i64>,
}

pub async fn subscriptions_info(
    State(state): State<AppState>,
    Json(selector): Json<ListSelector>,
) -> Result<Json<Vec<Subscription>>, StatusCode> {
    state
        .db
        .get_subscriptions(&selector)
        .await
        .map(Json)
        .map_err(|e| internal("Failed to list subscriptions", e))
}

pub async fn add_or_update_subscriptions(
    State(state): State<AppState>,
    Json(payload): Json<SubscriptionsUpsertRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let ids = state
        .db
        .add_or_update_subscriptions(&payload.subscriptions, &state.config.subscription_defaults)
        .await
        .map_err(|e| internal("Failed to upsert subscriptions", e))?;
    Ok(Json(json!({ "ids": ids })))
}

pub async fn delete_subscriptions(
    State(state): State<AppState>,
    Json(payload): Json<DeleteRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    state
        .db
        .delete_subscriptions(&payload.ids)
        .await
        .map_err(|e| internal("Failed to delete subscriptions", e))?;
    Ok(Json(json!({ "deleted": payload.ids })))
}

#[derive(Debug, Deserialize)]
pub struct CheckHistoryQuery {
    pub subscription_id: Option<i64>,
    #[serde(default)]
    pub archived: bool,
}

pub async fn subscription_checks_info(
    State(state): State<AppState>,
    Json(query): Json<CheckHistoryQuery>,
) -> Result<Json<Vec<SubscriptionCheck>>, StatusCode> {
    state
        .db
        .get_subscription_checks(query.subscription_id, query.archived)
        .await
        .map(Json)
        .map_err(|e| internal("Failed to list subscription checks", e))
}

#[derive(Debug, Deserialize)]
pub struct CheckUpsertRequest {
    pub checks: Vec<SubscriptionCheckUpsert>,
}

pub async fn add_or_update_subscription_checks(
    State(state): State<AppState>,
    Json(payload): Json<CheckUpsertRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    state
        .db
        .add_or_update_subscription_checks(&payload.checks)
        .await
        .map_err(|e| internal("Failed to upsert subscription checks", e))?;
    Ok(Json(json!({ "status": "ok" })))
}

pub async fn delete_subscription_checks(
    State(state): State<AppState>,
    Json(payload): Json<DeleteRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    state
        .db
        .delete_subscription_checks(&payload.ids)
        .await
        .map_err(|e| internal("Failed to delete subscription checks", e))?;
    Ok(Json(json!({ "deleted": payload.ids })))
}

#[derive(Debug, Deserialize)]
pub struct MissedCheckUpsertRequest {
    pub missed_checks: Vec<MissedCheckUpsert>,
}

pub async fn add_or_update_missed_checks(
    State(state): State<AppState>,
    Json(payload): Json<MissedCheckUpsertRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    state
        .db
        .add_or_update_missed_checks(&payload.missed_checks)
        .await
        .map_err(|e| internal("Failed to upsert missed checks", e))?;
    Ok(Json(json!({ "status": "ok" })))
}

pub async fn missed_checks_info(
    State(state): State<AppState>,
    Json(query): Json<CheckHistoryQuery>,
) -> Result<Json<Vec<MissedCheck>>, StatusCode> {
    state
        .db
        .get_missed_checks(query.subscription_id, query.archived)
        .await
        .map(Json)
        .map_err(|e| internal("Failed to list missed checks", e))
}

pub async fn delete_missed_checks(
    State(state): State<AppState>,
    Json(payload): Json<DeleteRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    state
        .db
        .delete_missed_checks(&payload.ids)
        .await
        .map_err(|e| internal("Failed to delete missed checks", e))?;
    Ok(Json(json!({ "deleted": payload.ids })))
}

// --- single URLs ---

#[derive(Debug, Deserialize)]
pub struct UrlsUpsertRequest {
    pub urls: Vec<QueuedUrlUpsert>,
}

pub async fn url_queue_info(
    State(state): State<AppState>,
    Json(selector): Json<ListSelector>,
) -> Result<Json<Vec<QueuedUrl>>, StatusCode> {
    state
        .db
        .get_queued_urls(&selector)
        .await
        .map(Json)
        .map_err(|e| internal("Failed to list queued URLs", e))
}

pub async fn add_or_update_urls(
    State(state): State<AppState>,
    Json(payload): Json<UrlsUpsertRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let ids = state
        .db
        .add_or_update_urls(&payload.urls)
        .await
        .map_err(|e| internal("Failed to upsert URLs", e))?;
    Ok(Json(json!({ "ids": ids })))
}

pub async fn delete_urls(
    State(state): State<AppState>,
    Json(payload): Json<DeleteRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    state
        .db
        .delete_urls(&payload.ids)
        .await
        .map_err(|e| internal("Failed to delete URLs", e))?;
    Ok(Json(json!({ "deleted": payload.ids })))
}

#[derive(Debug, Deserialize)]
pub struct UrlSetRequest {
    pub urls: Vec<String>,
}

/// For each given URL, report its normalized form and any queue rows
/// already holding it.
pub async fn url_history_info(
    State(state): State<AppState>,
    Json(payload): Json<UrlSetRequest>,
) -> Result<Json<Vec<serde_json::Value>>, StatusCode> {
    let mut results = Vec::new();
    for url in &payload.urls {
        let queue_rows = state
            .db
            .check_single_queue_for_url(url)
            .await
            .map_err(|e| internal("Failed to query URL history", e))?;
        results.push(json!({
            "url": url,
            "normalized_url": normalize_url(url),
            "queue_rows": queue_rows,
        }));
    }
    Ok(Json(results))
}

pub async fn get_known_urls(
    State(state): State<AppState>,
    Json(payload): Json<UrlSetRequest>,
) -> Result<Json<Vec<KnownUrl>>, StatusCode> {
    state
        .db
        .get_known_urls(&payload.urls)
        .await
        .map(Json)
        .map_err(|e| internal("Failed to query known URLs", e))
}

// --- reverse lookups ---

#[derive(Debug, Deserialize)]
pub struct ReverseLookupUpsertRequest {
    pub jobs: Vec<ReverseLookupJobUpsert>,
}

pub async fn reverse_lookup_jobs_info(
    State(state): State<AppState>,
    Json(selector): Json<ListSelector>,
) -> Result<Json<Vec<ReverseLookupJob>>, StatusCode> {
    state
        .db
        .get_reverse_lookup_jobs(&selector)
        .await
        .map(Json)
        .map_err(|e| internal("Failed to list reverse-lookup jobs", e))
}

pub async fn add_or_update_reverse_lookup_jobs(
    State(state): State<AppState>,
    Json(payload): Json<ReverseLookupUpsertRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let ids = state
        .db
        .add_or_update_reverse_lookup_jobs(&payload.jobs)
        .await
        .map_err(|e| internal("Failed to upsert reverse-lookup jobs", e))?;
    Ok(Json(json!({ "ids": ids })))
}

pub async fn delete_reverse_lookup_jobs(
    State(state): State<AppState>,
    Json(payload): Json<DeleteRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    state
        .db
        .delete_reverse_lookup_jobs(&payload.ids)
        .await
        .map_err(|e| internal("Failed to delete reverse-lookup jobs", e))?;
    Ok(Json(json!({ "deleted": payload.ids })))
}
