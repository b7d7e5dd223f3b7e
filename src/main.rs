use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fetchqd::{
    config::Config,
    database::Database,
    downloader::Downloader,
    reconciler,
    utils::unix_time,
    web::{AppState, WebServer},
    workers::{spawn_workers, SchedulerControl, WorkerContext},
};

#[derive(Parser)]
#[command(name = "fetchqd")]
#[command(version)]
#[command(about = "A durable download-queue daemon driving an external gallery downloader")]
struct Cli {
    /// Data directory holding the configuration, databases, logs and
    /// downloaded files
    #[arg(short, long, default_value = ".")]
    path: PathBuf,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short = 'P', long, value_name = "PORT")]
    port: Option<u16>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = if cli.log_level == "trace" {
        format!("fetchqd={},tower_http=trace", cli.log_level)
    } else {
        format!("fetchqd={}", cli.log_level)
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting fetchqd v{}", env!("CARGO_PKG_VERSION"));

    let root = cli.path.canonicalize().unwrap_or(cli.path.clone());
    let mut config = Config::load(&root)?;
    info!("Using data directory: {}", root.display());

    if let Some(host) = cli.host {
        config.web.host = host;
    }
    if let Some(port) = cli.port {
        config.web.port = port;
    }

    let db = Database::open(
        &root,
        &config.database_path(&root),
        &config.shared_database_path(&root),
    )
    .await?;
    db.migrate().await?;

    // Reconcile whatever a previous run left behind before any new work
    // starts.
    reconciler::sweep_leftover_captures(&db).await?;
    reconciler::parse_queued_log_files(&db).await?;
    db.generate_report(unix_time()).await?;

    let db = Arc::new(db);
    let config = Arc::new(config);
    let control = Arc::new(SchedulerControl::new());
    let executor = Arc::new(Downloader::new(&config, &root));

    let ctx = WorkerContext {
        db: db.clone(),
        config: config.clone(),
        executor: executor.clone(),
        control: control.clone(),
    };
    let worker_handles = spawn_workers(&ctx);

    let state = AppState {
        db: db.clone(),
        config,
        control: control.clone(),
        executor,
    };
    let server = WebServer::new(state)?;

    tokio::select! {
        result = server.run(control.clone()) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received");
            control.begin_shutdown();
        }
    }

    control.begin_shutdown();
    for handle in worker_handles {
        let _ = handle.await;
    }
    db.close().await;
    info!("Shutdown complete");
    Ok(())
}
