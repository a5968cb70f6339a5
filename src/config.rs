use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppError, Result};

const APP_DIR: &str = "rss-archiver";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Defaults to `<data_dir>/rss_archiver.db` when unset.
    pub db_path: Option<PathBuf>,

    /// Mirror of the feed registry, one URL per line.
    pub feeds_file: Option<PathBuf>,

    pub archive_dir: Option<PathBuf>,

    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,

    #[serde(default = "default_true")]
    pub fetch_full_content: bool,

    #[serde(default = "default_min_content_chars")]
    pub min_content_chars: usize,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn default_retention_days() -> u32 {
    30
}

fn default_fetch_concurrency() -> usize {
    5
}

fn default_true() -> bool {
    true
}

fn default_min_content_chars() -> usize {
    200
}

fn default_request_timeout() -> u64 {
    30
}

pub fn days_to_duration(days: u32) -> Duration {
    Duration::from_secs(u64::from(days) * 24 * 60 * 60)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            db_path: None,
            feeds_file: None,
            archive_dir: None,
            retention_days: default_retention_days(),
            fetch_concurrency: default_fetch_concurrency(),
            fetch_full_content: true,
            min_content_chars: default_min_content_chars(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Config {
    /// Loads the config at `path` (or the default location), writing a
    /// default file on first run.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::config_path);

        let config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            let config = Config::default();
            config.save(&config_path)?;
            config
        };
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    fn validate(&self) -> Result<()> {
        if self.fetch_concurrency == 0 {
            return Err(AppError::Config(
                "fetch_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("rss_archiver.db"))
    }

    pub fn feeds_file(&self) -> PathBuf {
        self.feeds_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("feeds.txt"))
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.archive_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("archive"))
    }

    pub fn retention(&self) -> Duration {
        days_to_duration(self.retention_days)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Creates every directory the store and archive need.
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        for path in [self.db_path(), self.feeds_file()] {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::create_dir_all(self.archive_dir())?;
        Ok(())
    }
}
