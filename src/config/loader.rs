use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::config::types::Config;
use crate::gate::TimingSpec;
use crate::request::RetryPolicy;
use crate::store::FileBackingStore;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },
}

impl Config {
    /// Returns the path to the configuration file.
    ///
    /// Uses `~/.config/resilient-client/config.toml` on Unix/macOS,
    /// or equivalent on other platforms via `dirs::config_dir()`.
    /// Falls back to current directory if config_dir is unavailable.
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        config_dir.join("resilient-client").join("config.toml")
    }

    /// Loads configuration from the default config file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Loads configuration from `path`.
    ///
    /// - If the file doesn't exist, returns `Config::default()`.
    /// - If the file exists, parses it as TOML and validates.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// Checks:
    /// - `base_url` is not empty
    /// - the retry section forms a valid [`RetryPolicy`]
    /// - the timing interval is non-zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                message: "request.base_url must not be empty".to_string(),
            });
        }

        self.retry_policy()?;
        self.timing_spec()?;
        Ok(())
    }

    /// Retry policy described by the `[retry]` section.
    pub fn retry_policy(&self) -> Result<RetryPolicy, ConfigError> {
        let retry = &self.retry;
        RetryPolicy::new(
            retry.max_attempts,
            Duration::from_millis(retry.base_delay_ms),
            retry.backoff_multiplier,
            Duration::from_millis(retry.max_delay_ms),
        )
        .map(|policy| policy.with_retryable_statuses(retry.retryable_statuses.clone()))
        .map_err(|e| ConfigError::ValidationError {
            message: format!("retry: {}", e),
        })
    }

    /// Gate spec described by the `[timing]` section.
    pub fn timing_spec(&self) -> Result<TimingSpec, ConfigError> {
        let timing = &self.timing;
        TimingSpec::new(
            timing.mode,
            Duration::from_millis(timing.interval_ms),
            timing.leading,
        )
        .map_err(|e| ConfigError::ValidationError {
            message: format!("timing: {}", e),
        })
    }

    /// Per-attempt timeout from the `[request]` section.
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.request.timeout_seconds))
    }

    /// File backing store rooted at the configured (or default) directory.
    pub fn backing_store(&self) -> FileBackingStore {
        let dir = self
            .storage
            .dir
            .clone()
            .unwrap_or_else(FileBackingStore::default_dir);
        FileBackingStore::new(dir)
    }
}
