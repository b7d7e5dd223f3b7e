//! Daemon configuration.
//!
//! The configuration lives as `fetchqd.toml` inside the data directory
//! given on the command line. On first run a default file is written out
//! together with the directory skeleton (`logs/`, `temp/`, `data/`).

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "fetchqd.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub web: WebConfig,
    pub downloader: DownloaderConfig,
    pub workers: WorkerConfig,
    pub reverse_lookup: ReverseLookupConfig,
    /// Default field values applied when inserting a subscription for a
    /// given downloader, keyed by downloader name.
    #[serde(default)]
    pub subscription_defaults: HashMap<String, SubscriptionDefaults>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Primary database file, relative to the data directory.
    pub file: String,
    /// Optional absolute path to a shared known-URL database. When set,
    /// multiple daemon instances dedup against the same URL index.
    pub shared_db_override: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
    /// Access key required in the `X-Access-Key` header of every request.
    pub access_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloaderConfig {
    /// The external downloader executable.
    pub executable: String,
    /// Override for the download destination; defaults to `data/` under
    /// the data directory.
    pub data_override: Option<String>,
    /// Override for the anchor (dedup archive) database consumed by the
    /// downloader; defaults to `anchor.db` under the data directory.
    pub anchor_override: Option<String>,
    /// Per-downloader target templates used to turn a subscription's
    /// keywords into a fetchable target. `{keywords}` is substituted.
    /// Downloaders without a template fall back to `name:keywords`.
    #[serde(default)]
    pub target_templates: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Sleep between scheduling passes when a queue is idle.
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReverseLookupConfig {
    /// Lookup presets keyed by name; jobs reference a preset via their
    /// `config` field, falling back to `default`.
    #[serde(default)]
    pub presets: HashMap<String, ReverseLookupPreset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReverseLookupPreset {
    /// Command line of the external lookup tool. `{file}` is replaced by
    /// the file path and `{url}` by the file URL. The tool prints one
    /// result URL per line on stdout.
    pub command: Vec<String>,
    /// Whether result URLs enter the single-URL queue paused, unless the
    /// job overrides it.
    #[serde(default)]
    pub urls_paused: bool,
}

/// Insert-time defaults for subscriptions of a particular downloader.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionDefaults {
    pub check_interval: Option<i64>,
    pub abort_after: Option<i64>,
    pub max_files_initial: Option<i64>,
    pub max_files_regular: Option<i64>,
    pub filter: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                file: "fetchqd.db".to_string(),
                shared_db_override: None,
            },
            web: WebConfig {
                host: "127.0.0.1".to_string(),
                port: 8086,
                access_key: "change-me".to_string(),
            },
            downloader: DownloaderConfig {
                executable: "gallery-dl".to_string(),
                data_override: None,
                anchor_override: None,
                target_templates: HashMap::new(),
            },
            workers: WorkerConfig {
                poll_interval_secs: 2,
            },
            reverse_lookup: ReverseLookupConfig {
                presets: HashMap::new(),
            },
            subscription_defaults: HashMap::new(),
        }
    }
}

impl Config {
    /// Load the configuration from the data directory, creating the
    /// directory skeleton and a default config file on first run.
    pub fn load(root: &Path) -> Result<Self> {
        for sub in ["logs", "temp", "data"] {
            std::fs::create_dir_all(root.join(sub))?;
        }

        let config_file = root.join(CONFIG_FILE_NAME);
        if config_file.exists() {
            let contents = std::fs::read_to_string(&config_file)?;
            Ok(toml::from_str(&contents)?)
        } else {
            let default_config = Self::default();
            let contents = toml::to_string_pretty(&default_config)?;
            std::fs::write(&config_file, contents)?;
            Ok(default_config)
        }
    }

    /// Resolve the primary database path under the data directory.
    pub fn database_path(&self, root: &Path) -> PathBuf {
        root.join(&self.database.file)
    }

    /// Resolve the shared known-URL database path. `None` when no shared
    /// override is configured and the instance-local file should be used.
    pub fn shared_database_path(&self, root: &Path) -> PathBuf {
        match &self.database.shared_db_override {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => root.join("fetchqd.shared.db"),
        }
    }

    /// Destination directory handed to the downloader process.
    pub fn download_dir(&self, root: &Path) -> PathBuf {
        match &self.downloader.data_override {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => root.join("data"),
        }
    }

    /// Anchor (dedup archive) database handed to the downloader process.
    pub fn anchor_path(&self, root: &Path) -> PathBuf {
        match &self.downloader.anchor_override {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => root.join("anchor.db"),
        }
    }

    /// Turn a subscription's downloader + keywords into a target the
    /// external downloader understands.
    pub fn subscription_target(&self, downloader: &str, keywords: &str) -> String {
        match self.downloader.target_templates.get(downloader) {
            Some(template) => template.replace("{keywords}", keywords),
            None => format!("{downloader}:{keywords}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_target_uses_template_when_present() {
        let mut config = Config::default();
        config.downloader.target_templates.insert(
            "artstation".to_string(),
            "https://www.artstation.com/{keywords}".to_string(),
        );
        assert_eq!(
            config.subscription_target("artstation", "someartist"),
            "https://www.artstation.com/someartist"
        );
        assert_eq!(
            config.subscription_target("other", "keyword"),
            "other:keyword"
        );
    }

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.web.port, config.web.port);
        assert_eq!(parsed.database.file, config.database.file);
    }
}
