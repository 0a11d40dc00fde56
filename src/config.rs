//! Configuration file parser for ~/.config/feedpipe/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as likely typos. Command-line
//! flags override whatever the file says.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::feed::{
    default_user_agent, FetcherConfig, ProcessorConfig, DEFAULT_FORCE_PROBABILITY,
    DEFAULT_MAX_ENTRIES, MAX_FEED_SIZE,
};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// A value parsed but makes no sense
    #[error("Invalid config value for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("HOME environment variable not set")]
    NoHome,
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of concurrent workers.
    pub workers: usize,

    /// SQLite database file. Defaults to `~/.config/feedpipe/feeds.db`.
    pub database: Option<PathBuf>,

    /// Hard deadline for a single feed fetch, in seconds.
    pub fetch_timeout_secs: u64,

    /// Chance that a fetch ignores cache validators and busts caches.
    pub force_probability: f64,

    /// Base user agent sent with every request.
    pub user_agent: Option<String>,

    /// Entries processed per feed document.
    pub max_entries: usize,

    /// Largest response body accepted, in bytes.
    pub max_feed_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: 4,
            database: None,
            fetch_timeout_secs: 150,
            force_probability: DEFAULT_FORCE_PROBABILITY,
            user_agent: None,
            max_entries: DEFAULT_MAX_ENTRIES,
            max_feed_bytes: MAX_FEED_SIZE,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 7] = [
        "workers",
        "database",
        "fetch_timeout_secs",
        "force_probability",
        "user_agent",
        "max_entries",
        "max_feed_bytes",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Out-of-range values → `Err(ConfigError::Invalid)`
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(path = %path.display(), workers = config.workers, "Loaded configuration");
        Ok(config)
    }

    /// Reject values that parse but cannot work
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid {
                key: "workers",
                reason: "must be at least 1".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.force_probability) {
            return Err(ConfigError::Invalid {
                key: "force_probability",
                reason: format!("{} is not between 0 and 1", self.force_probability),
            });
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "fetch_timeout_secs",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// `~/.config/feedpipe`
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        let home = std::env::var_os("HOME").ok_or(ConfigError::NoHome)?;
        Ok(PathBuf::from(home).join(".config").join("feedpipe"))
    }

    /// The configured database path, or the default under [`Config::config_dir`]
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.database {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::config_dir()?.join("feeds.db")),
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn fetcher_config(&self, force: bool) -> FetcherConfig {
        FetcherConfig {
            timeout: self.fetch_timeout(),
            user_agent: self.user_agent.clone().unwrap_or_else(default_user_agent),
            force_probability: self.force_probability,
            force,
        }
    }

    pub fn processor_config(&self, verbose: bool) -> ProcessorConfig {
        ProcessorConfig {
            max_entries: self.max_entries,
            verbose,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
