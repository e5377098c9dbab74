//! Configuration loader and validator for the cashback mirror.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::sync::SyncSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub remote: Remote,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    #[serde(default = "default_cache_duration_secs")]
    pub cache_duration_secs: u64,
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
    /// Local store URL; defaults to `cache.db` under `data_dir`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
}

/// Remote (authoritative) database settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Remote {
    pub url: String,
    pub auth_token: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_cache_duration_secs() -> u64 {
    1800
}

fn default_sync_interval_secs() -> u64 {
    30
}

fn default_error_backoff_secs() -> u64 {
    60
}

fn default_timeout_secs() -> u64 {
    15
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Replace remote credentials with `TURSO_DATABASE_URL` / `TURSO_AUTH_TOKEN`
    /// and the local store with `DATABASE_URL` when `lookup` yields a non-empty
    /// value for them.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = non_empty("TURSO_DATABASE_URL") {
            self.remote.url = url;
        }
        if let Some(token) = non_empty("TURSO_AUTH_TOKEN") {
            self.remote.auth_token = token;
        }
        if let Some(url) = non_empty("DATABASE_URL") {
            self.app.database_url = Some(url);
        }
    }

    /// Local store location: `app.database_url` if set, else `cache.db` under the data dir.
    pub fn database_url(&self) -> String {
        match &self.app.database_url {
            Some(url) => url.clone(),
            None => format!(
                "sqlite://{}/cache.db",
                self.app.data_dir.trim_end_matches('/')
            ),
        }
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            cache_duration: Duration::from_secs(self.app.cache_duration_secs),
            interval: Duration::from_secs(self.app.sync_interval_secs),
            error_backoff: Duration::from_secs(self.app.error_backoff_secs),
        }
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote.timeout_secs)
    }
}

/// Load configuration from a YAML file, apply environment overrides and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    cfg.apply_env_overrides(|key| std::env::var(key).ok());
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.sync_interval_secs == 0 {
        return Err(ConfigError::Invalid("app.sync_interval_secs must be > 0"));
    }
    if cfg.app.error_backoff_secs == 0 {
        return Err(ConfigError::Invalid("app.error_backoff_secs must be > 0"));
    }
    // cache_duration_secs may be 0: probe the remote on every check.

    let url = cfg.remote.url.trim();
    if url.is_empty() {
        return Err(ConfigError::Invalid("remote.url must be non-empty"));
    }
    if !["https://", "http://", "libsql://"]
        .iter()
        .any(|scheme| url.starts_with(scheme))
    {
        return Err(ConfigError::Invalid(
            "remote.url must start with https://, http:// or libsql://",
        ));
    }
    if cfg.remote.auth_token.trim().is_empty() {
        return Err(ConfigError::Invalid("remote.auth_token must be non-empty"));
    }
    if cfg.remote.timeout_secs == 0 {
        return Err(ConfigError::Invalid("remote.timeout_secs must be > 0"));
    }

    Ok(())
}

/// Returns the example YAML content shipped as `config.example.yaml`.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  cache_duration_secs: 1800
  sync_interval_secs: 30
  error_backoff_secs: 60

remote:
  url: "libsql://your-database.turso.io"
  auth_token: "YOUR_TURSO_AUTH_TOKEN"
  timeout_secs: 15
"#
}
