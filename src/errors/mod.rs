//! Error types for the fetchqd daemon.

pub mod types;

pub use types::{DatabaseError, DownloaderError};
