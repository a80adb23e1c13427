//! Monitor configuration
//!
//! Loaded from a TOML file with `[database]`, `[monitor]` and an optional
//! `[logging]` section. Everything is validated before the monitor starts so
//! a bad file fails at startup rather than on the first matched file.

use anyhow::{Context, Result};
use db::PoolConfig;
use dropzone_core::{default_workers, Error, OutcomeFolders};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Database drivers the monitor can talk to
const SUPPORTED_DRIVERS: &[&str] = &["sqlite"];

/// Suffix appended to the configured file name pattern
const FILE_EXTENSION: &str = ".xml";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub database: DatabaseConfig,
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    #[serde(default = "default_driver")]
    pub driver: String,
    pub url: String,
    /// Accepted for other drivers; SQLite has no authentication
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub table: String,
    pub pool_size: Option<usize>,
    pub idle_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorConfig {
    pub folder: PathBuf,
    #[serde(default = "default_pattern")]
    pub file_name_pattern: String,
    pub period: u64,
    #[serde(default)]
    pub time_unit: TimeUnit,
    pub processed_folder: Option<PathBuf>,
    pub corrupted_folder: Option<PathBuf>,
    pub workers: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Directory for daily rolling log files; console only when unset
    pub directory: Option<PathBuf>,
}

/// Unit of `monitor.period`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Milliseconds,
    #[default]
    Seconds,
    Minutes,
    Hours,
}

impl TimeUnit {
    pub fn duration(self, amount: u64) -> Duration {
        match self {
            TimeUnit::Milliseconds => Duration::from_millis(amount),
            TimeUnit::Seconds => Duration::from_secs(amount),
            TimeUnit::Minutes => Duration::from_secs(amount.saturating_mul(60)),
            TimeUnit::Hours => Duration::from_secs(amount.saturating_mul(3600)),
        }
    }
}

fn default_driver() -> String {
    "sqlite".to_string()
}

fn default_pattern() -> String {
    "*".to_string()
}

/// Treat `""` the same as an absent setting
fn non_empty(path: &Option<PathBuf>) -> Option<&Path> {
    path.as_deref().filter(|p| !p.as_os_str().is_empty())
}

impl Config {
    /// Read, parse and validate the file at `path`
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Parse and validate TOML text
    pub fn parse(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> dropzone_core::Result<()> {
        self.database.validate()?;
        self.monitor.validate()
    }
}

impl DatabaseConfig {
    fn validate(&self) -> dropzone_core::Result<()> {
        if !SUPPORTED_DRIVERS
            .iter()
            .any(|d| d.eq_ignore_ascii_case(&self.driver))
        {
            return Err(Error::Config(format!(
                "unsupported database driver {:?} (supported: {})",
                self.driver,
                SUPPORTED_DRIVERS.join(", ")
            )));
        }
        if self.url.trim().is_empty() {
            return Err(Error::Config("database.url is empty".into()));
        }
        if !db::is_identifier(&self.table) {
            return Err(Error::Config(format!(
                "database.table {:?} is not a valid table name",
                self.table
            )));
        }
        if self.pool_size == Some(0) {
            return Err(Error::Config("database.pool_size must be at least 1".into()));
        }
        if self.idle_timeout_secs == Some(0) {
            return Err(Error::Config(
                "database.idle_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn pool_config(&self) -> PoolConfig {
        let defaults = PoolConfig::default();
        PoolConfig {
            capacity: self.pool_size.unwrap_or(defaults.capacity),
            idle_timeout: self
                .idle_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_timeout),
        }
    }
}

impl MonitorConfig {
    fn validate(&self) -> dropzone_core::Result<()> {
        if self.folder.as_os_str().is_empty() {
            return Err(Error::Config("monitor.folder is empty".into()));
        }
        if !self.folder.is_dir() {
            return Err(Error::Config(format!(
                "monitor.folder {} is not an existing directory",
                self.folder.display()
            )));
        }
        if self.file_name_pattern.trim().is_empty() {
            return Err(Error::Config("monitor.file_name_pattern is empty".into()));
        }
        if self.period == 0 {
            return Err(Error::Config("monitor.period must be at least 1".into()));
        }
        if self.workers == Some(0) {
            return Err(Error::Config("monitor.workers must be at least 1".into()));
        }
        Ok(())
    }

    /// Delay between two polls
    pub fn poll_interval(&self) -> Duration {
        self.time_unit.duration(self.period)
    }

    /// Filename globs handed to the watcher
    pub fn patterns(&self) -> Vec<String> {
        vec![format!("{}{}", self.file_name_pattern.trim(), FILE_EXTENSION)]
    }

    pub fn workers(&self) -> usize {
        self.workers.unwrap_or_else(default_workers)
    }

    /// Outcome folders for `watch_dir`
    ///
    /// Relative overrides are resolved against `watch_dir`.
    pub fn outcome_folders(&self, watch_dir: &Path) -> OutcomeFolders {
        let defaults = OutcomeFolders::under(watch_dir);
        let resolve = |path: Option<&Path>, default: PathBuf| match path {
            Some(p) => watch_dir.join(p),
            None => default,
        };
        OutcomeFolders {
            processed: resolve(non_empty(&self.processed_folder), defaults.processed),
            corrupted: resolve(non_empty(&self.corrupted_folder), defaults.corrupted),
        }
    }
}

impl LoggingConfig {
    pub fn directory(&self) -> Option<&Path> {
        non_empty(&self.directory)
    }
}
