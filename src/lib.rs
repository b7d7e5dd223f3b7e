//! fetchqd - a durable download-queue daemon.
//!
//! The daemon owns a SQLite-backed job store with three queue classes
//! (subscriptions, single URLs, reverse lookups), decides which items are
//! due, runs them one at a time per class through an external downloader
//! process, and reconciles the downloader's console output and log files
//! back into persistent state.

pub mod config;
pub mod database;
pub mod downloader;
pub mod errors;
pub mod models;
pub mod reconciler;
pub mod utils;
pub mod web;
pub mod workers;

/// Version reported by the control plane API.
pub const API_VERSION: u32 = 1;
