//! Error type definitions for the fetchqd daemon.
//!
//! Local, recoverable failures (a single download erroring out) never pass
//! through these types; they are folded into status text on the affected
//! row. These types cover failures that must propagate: database and
//! migration problems, adapter-level failures, and invalid API payloads.

use thiserror::Error;

/// Job store specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// The stored schema version is not one this build can upgrade from.
    /// Fatal at startup, before any worker runs.
    #[error("Unsupported schema version {found} (this build supports up to {supported})")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },

    /// The version table is missing or malformed.
    #[error("Invalid version table in database: {message}")]
    InvalidVersionTable { message: String },

    /// A migration step failed partway through the chain.
    #[error("Migration to version {version} failed: {message}")]
    MigrationFailed { version: i64, message: String },
}

/// Execution adapter specific errors.
///
/// These are adapter-level faults (the process could not be started at
/// all), not downloader exit statuses; non-zero exit bitmasks are decoded
/// into status text and handled at the item level.
#[derive(Error, Debug)]
pub enum DownloaderError {
    /// The downloader executable could not be spawned.
    #[error("Failed to spawn downloader process '{executable}': {message}")]
    SpawnFailed { executable: String, message: String },

    /// The console capture file could not be opened for appending.
    #[error("Failed to open console capture file '{path}': {message}")]
    CaptureFile { path: String, message: String },
}
