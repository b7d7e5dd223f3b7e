//! HTTP control plane.
//!
//! A small POST-only RPC surface over the job store and the scheduler
//! control state. Every route except `/api_version` requires the
//! configured access key in the `X-Access-Key` header.

use anyhow::Result;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::database::Database;
use crate::downloader::Executor;
use crate::workers::SchedulerControl;

pub mod api;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub config: Arc<Config>,
    pub control: Arc<SchedulerControl>,
    pub executor: Arc<dyn Executor>,
}

pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(state: AppState) -> Result<Self> {
        let addr: SocketAddr =
            format!("{}:{}", state.config.web.host, state.config.web.port).parse()?;
        let app = build_router(state);
        Ok(Self { app, addr })
    }

    /// Serve until shutdown is requested through the control state.
    pub async fn run(self, control: Arc<SchedulerControl>) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        info!("Control plane listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(async move { control.wait_for_shutdown().await })
            .await?;
        Ok(())
    }
}

/// Build the full route tree. Exposed separately so tests can drive the
/// router without binding a socket.
pub fn build_router(state: AppState) -> Router {
    let gated = Router::new()
        // scheduler control
        .route("/get_status", post(api::get_status))
        .route("/pause_worker", post(api::pause_worker))
        .route("/resume_worker", post(api::resume_worker))
        .route("/kill_current", post(api::kill_current))
        .route("/shutdown", post(api::shutdown))
        .route("/run_report", post(api::run_report))
        // subscriptions
        .route("/subscriptions_info", post(api::subscriptions_info))
        .route(
            "/add_or_update_subscriptions",
            post(api::add_or_update_subscriptions),
        )
        .route("/delete_subscriptions", post(api::delete_subscriptions))
        .route(
            "/subscription_checks_info",
            post(api::subscription_checks_info),
        )
        .route(
            "/add_or_update_subscription_checks",
            post(api::add_or_update_subscription_checks),
        )
        .route(
            "/delete_subscription_checks",
            post(api::delete_subscription_checks),
        )
        .route("/missed_checks_info", post(api::missed_checks_info))
        .route(
            "/add_or_update_missed_checks",
            post(api::add_or_update_missed_checks),
        )
        .route("/delete_missed_checks", post(api::delete_missed_checks))
        // single URLs
        .route("/url_queue_info", post(api::url_queue_info))
        .route("/add_or_update_urls", post(api::add_or_update_urls))
        .route("/delete_urls", post(api::delete_urls))
        .route("/url_history_info", post(api::url_history_info))
        .route("/get_known_urls", post(api::get_known_urls))
        // reverse lookups
        .route(
            "/reverse_lookup_jobs_info",
            post(api::reverse_lookup_jobs_info),
        )
        .route(
            "/add_or_update_reverse_lookup_jobs",
            post(api::add_or_update_reverse_lookup_jobs),
        )
        .route(
            "/delete_reverse_lookup_jobs",
            post(api::delete_reverse_lookup_jobs),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_access_key,
        ));

    Router::new()
        .route("/api_version", get(api::api_version))
        .merge(gated)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn require_access_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let provided = request
        .headers()
        .get("X-Access-Key")
        .and_then(|value| value.to_str().ok());
    if provided == Some(state.config.web.access_key.as_str()) {
        next.run(request).await
    } else {
        StatusCode::UNAUTHORIZED.into_response()
    }
}
