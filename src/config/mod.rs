//! Configuration loading.
//!
//! Reads `config.toml` from the platform config directory (or an explicit
//! path). A missing file yields defaults; a malformed one is an error.

pub mod schema;

pub use schema::{
    BreakerConfig, ChannelConfig, ClassifierConfig, Config, FilterConfig, LedgerConfig,
    SchedulerConfig, API_KEY_ENV,
};

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Default config file location, e.g. `~/.config/review-tunnel/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "zeroclaw", "review-tunnel")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

impl Config {
    /// Load from `path`, or from [`default_config_path`] when `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let resolved = match path {
            Some(p) => p.to_path_buf(),
            None => match default_config_path() {
                Some(p) => p,
                None => {
                    tracing::debug!("No config directory available, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        if !resolved.exists() {
            if path.is_some() {
                anyhow::bail!("Config file not found: {}", resolved.display());
            }
            tracing::debug!(path = %resolved.display(), "Config file absent, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&resolved)
            .with_context(|| format!("Failed to read {}", resolved.display()))?;
        let config = Self::from_toml(&raw)
            .with_context(|| format!("Failed to parse {}", resolved.display()))?;
        tracing::info!(path = %resolved.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the runtime cannot honour.
    pub fn validate(&self) -> Result<()> {
        let s = &self.scheduler;
        if !(s.min_interval_hours.is_finite() && s.max_interval_hours.is_finite())
            || s.min_interval_hours <= 0.0
            || s.max_interval_hours < s.min_interval_hours
        {
            anyhow::bail!(
                "scheduler interval must satisfy 0 < min ({}) <= max ({})",
                s.min_interval_hours,
                s.max_interval_hours
            );
        }
        if self.breaker.failure_threshold == 0 {
            anyhow::bail!("breaker.failure_threshold must be at least 1");
        }
        if self.ledger.max_entries_per_agent == Some(0) {
            anyhow::bail!("ledger.max_entries_per_agent must be at least 1 when set");
        }
        Ok(())
    }

    /// JSON schema for the configuration file.
    pub fn json_schema() -> Result<String> {
        let schema = schemars::schema_for!(Config);
        Ok(serde_json::to_string_pretty(&schema)?)
    }
}
