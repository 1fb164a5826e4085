//! Configuration file handling.
//!
//! Settings come from an optional `seriesboard.toml`; `DATABASE_URL` in the
//! environment overrides the configured database URL.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub stats: StatsConfig,

    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Attempts for one optimistic read-modify-write before giving up.
    #[serde(default = "default_write_attempts")]
    pub write_attempts: u32,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            write_attempts: default_write_attempts(),
        }
    }
}

fn default_write_attempts() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Extra verification attempts after a clock-skew rejection.
    #[serde(default = "default_clock_skew_retries")]
    pub clock_skew_retries: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Tolerated difference between our clock and the issuer's.
    #[serde(default = "default_leeway_secs")]
    pub leeway_secs: i64,

    #[serde(default)]
    pub accounts: Vec<IdentityAccount>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            clock_skew_retries: default_clock_skew_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            leeway_secs: default_leeway_secs(),
            accounts: Vec::new(),
        }
    }
}

fn default_clock_skew_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_leeway_secs() -> i64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityAccount {
    pub token: String,
    pub uid: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub email: String,
    #[serde(default)]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

fn default_filter() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise, then apply the environment.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            Self::default()
        };

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database.url = Some(url);
        }

        Ok(config)
    }

    pub fn database_url(&self) -> Result<&str> {
        self.database
            .url
            .as_deref()
            .context("DATABASE_URL or [database] url must point at a Postgres instance")
    }
}
