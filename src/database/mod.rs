//! Job store: persistence layer over SQLite.
//!
//! One primary database holds all queue and history tables; a second,
//! optionally shared, database holds only the known-URL cache so several
//! daemon instances can dedup against a single index.
//!
//! Connections are pooled per database. All mutating operations are
//! transactional upserts keyed by rowid or natural key; scheduling reads
//! stay monotonic because each worker class never issues two passes
//! concurrently.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::{Path, PathBuf};
use tracing::info;

pub mod additional_data;
pub mod known_urls;
pub mod migrations;
pub mod report;
pub mod reverse_lookup;
pub mod single_urls;
pub mod subscriptions;

#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
    shared_pool: Pool<Sqlite>,
    root: PathBuf,
}

impl Database {
    /// Open (creating if necessary) the primary and shared databases under
    /// the given data directory.
    pub async fn open(root: &Path, path: &Path, shared_path: &Path) -> Result<Self> {
        let pool = Self::connect_file(path).await?;
        let shared_pool = Self::connect_file(shared_path).await?;
        Ok(Self {
            pool,
            shared_pool,
            root: root.to_path_buf(),
        })
    }

    /// In-memory database pair, used by tests.
    pub async fn open_in_memory(root: &Path) -> Result<Self> {
        // A memory database exists per connection, so the pool is capped
        // at one connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let shared_pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self {
            pool,
            shared_pool,
            root: root.to_path_buf(),
        })
    }

    async fn connect_file(path: &Path) -> Result<Pool<Sqlite>> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Ok(pool)
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub fn shared_pool(&self) -> &Pool<Sqlite> {
        &self.shared_pool
    }

    /// The daemon data directory. File paths stored in the database
    /// (capture files, log files, downloaded files) are relative to it.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Make an absolute path relative to the data directory for storage.
    /// Paths outside the data directory are stored as given.
    pub fn relative_to_root(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) => rel.to_string_lossy().to_string(),
            Err(_) => path.to_string_lossy().to_string(),
        }
    }

    /// Apply schema migrations to both databases.
    ///
    /// A stored schema version newer than this build understands is fatal:
    /// the process refuses to run against a foreign schema.
    pub async fn migrate(&self) -> Result<()> {
        migrations::run(&self.pool).await?;
        migrations::prepare_shared(&self.shared_pool).await?;
        info!("Database schema is at version {}", migrations::LATEST_VERSION);
        Ok(())
    }

    /// Flush and close both pools. Called on clean shutdown.
    pub async fn close(&self) {
        self.pool.close().await;
        self.shared_pool.close().await;
    }
}
