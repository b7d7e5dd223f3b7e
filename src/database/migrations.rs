//! Schema migrations.
//!
//! Migrations form a linear chain keyed by integer version. Each step is
//! applied inside its own exclusive transaction together with the version
//! bump, so a crash mid-upgrade resumes cleanly from the stored version on
//! the next startup.

use anyhow::Result;
use sqlx::{Pool, Row, Sqlite};
use tracing::info;

use crate::errors::DatabaseError;

pub const LATEST_VERSION: i64 = 2;

/// `(target_version, sql)` steps, ordered. Applying step N upgrades a
/// database at version N-1 to version N.
const MIGRATIONS: &[(i64, &str)] = &[(1, SCHEMA_V1), (2, SCHEMA_V2)];

const SCHEMA_V1: &str = r#"
CREATE TABLE subscriptions (
    id INTEGER NOT NULL UNIQUE,
    keywords TEXT NOT NULL,
    downloader TEXT NOT NULL,
    additional_data TEXT,
    last_check INTEGER,
    check_interval INTEGER NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    paused INTEGER NOT NULL DEFAULT 0,
    time_created INTEGER NOT NULL,
    last_successful_check INTEGER,
    filter TEXT,
    abort_after INTEGER NOT NULL DEFAULT 20,
    max_files_initial INTEGER NOT NULL DEFAULT 10000,
    max_files_regular INTEGER,
    comment TEXT,
    PRIMARY KEY(id AUTOINCREMENT)
);
CREATE INDEX keyword_index ON subscriptions (keywords);

CREATE TABLE single_url_queue (
    id INTEGER NOT NULL UNIQUE,
    url TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    ignore_anchor INTEGER NOT NULL DEFAULT 0,
    additional_data TEXT,
    status_text TEXT,
    status INTEGER NOT NULL DEFAULT -1,
    time_added INTEGER NOT NULL,
    time_processed INTEGER,
    metadata_only INTEGER NOT NULL DEFAULT 0,
    overwrite_existing INTEGER NOT NULL DEFAULT 0,
    filter TEXT,
    max_files INTEGER,
    new_files INTEGER,
    already_seen_files INTEGER,
    paused INTEGER NOT NULL DEFAULT 0,
    comment TEXT,
    archived INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY(id AUTOINCREMENT)
);
CREATE INDEX single_url_index ON single_url_queue (url);

CREATE TABLE subscription_checks (
    id INTEGER NOT NULL UNIQUE,
    subscription_id INTEGER,
    time_started INTEGER,
    time_finished INTEGER,
    new_files INTEGER,
    already_seen_files INTEGER,
    status TEXT,
    archived INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY(id AUTOINCREMENT)
);

CREATE TABLE additional_data (
    file TEXT,
    subscription_id INTEGER,
    url_id INTEGER,
    data TEXT,
    time_added INTEGER
);

CREATE TABLE known_urls (
    url TEXT,
    subscription_id INTEGER,
    url_id INTEGER,
    time_added INTEGER,
    status INTEGER DEFAULT 0
);
CREATE INDEX known_url_index ON known_urls (url);

CREATE TABLE log_files_to_parse (
    file TEXT,
    worker TEXT
);
"#;

const SCHEMA_V2: &str = r#"
CREATE TABLE missed_subscription_checks (
    id INTEGER NOT NULL UNIQUE,
    subscription_id INTEGER NOT NULL,
    reason INTEGER NOT NULL DEFAULT 0,
    note TEXT,
    time_added INTEGER NOT NULL,
    archived INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY(id AUTOINCREMENT)
);

CREATE TABLE reverse_lookup_jobs (
    id INTEGER NOT NULL UNIQUE,
    file_path TEXT,
    file_url TEXT,
    config TEXT,
    status INTEGER NOT NULL DEFAULT -1,
    status_text TEXT,
    paused INTEGER NOT NULL DEFAULT 0,
    urls_paused INTEGER NOT NULL DEFAULT 0,
    priority INTEGER NOT NULL DEFAULT 0,
    result_count INTEGER,
    additional_results TEXT,
    time_added INTEGER NOT NULL,
    time_processed INTEGER,
    PRIMARY KEY(id AUTOINCREMENT)
);

ALTER TABLE single_url_queue ADD COLUMN reverse_lookup_id INTEGER;
"#;

/// Schema of the shared known-URL database. It carries no version table
/// and is shared between instances, so it only ever grows additively.
const SHARED_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS known_urls (
    url TEXT,
    status INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS known_url_index ON known_urls (url);
"#;

/// Upgrade the primary database to [`LATEST_VERSION`].
pub async fn run(pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::query("CREATE TABLE IF NOT EXISTS version (version INTEGER NOT NULL)")
        .execute(pool)
        .await?;

    let stored = current_version(pool).await?;
    if stored > LATEST_VERSION {
        return Err(DatabaseError::UnsupportedSchemaVersion {
            found: stored,
            supported: LATEST_VERSION,
        }
        .into());
    }

    for (version, sql) in MIGRATIONS {
        if *version <= stored {
            continue;
        }
        info!("Applying schema migration to version {}", version);

        let mut tx = pool.begin().await?;
        for statement in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&mut *tx).await.map_err(|e| {
                DatabaseError::MigrationFailed {
                    version: *version,
                    message: e.to_string(),
                }
            })?;
        }
        sqlx::query("DELETE FROM version")
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO version (version) VALUES (?)")
            .bind(version)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    }

    Ok(())
}

/// Create the known-URL table in the shared database if missing.
pub async fn prepare_shared(pool: &Pool<Sqlite>) -> Result<()> {
    for statement in SHARED_SCHEMA
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

async fn current_version(pool: &Pool<Sqlite>) -> Result<i64> {
    let rows = sqlx::query("SELECT version FROM version")
        .fetch_all(pool)
        .await?;
    match rows.len() {
        // Fresh database: no version row yet.
        0 => Ok(0),
        1 => Ok(rows[0].get::<i64, _>("version")),
        n => Err(DatabaseError::InvalidVersionTable {
            message: format!("expected one version row, found {n}"),
        }
        .into()),
    }
}
