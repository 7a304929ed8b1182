//! Configuration management.
//!
//! Settings layer an optional `config.*` file under `TW`-prefixed
//! environment variables (e.g. `TW_ENGINE__POLL_INTERVAL_SECS=10`).

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Persistence settings
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Exchange connectivity and rate limits
    #[serde(default)]
    pub exchange: ExchangeConfig,
    /// Trading engine reconciliation loop
    #[serde(default)]
    pub engine: EngineConfig,
    /// Strategy supervisor evaluation loop
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path
    #[serde(default = "default_database_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    /// Exchange API requests per second (process-wide)
    #[serde(default = "default_exchange_rps")]
    pub exchange_rps: u32,
    /// Quotation API requests per second (process-wide)
    #[serde(default = "default_quotation_rps")]
    pub quotation_rps: u32,
    /// Total HTTP timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Seconds between reconciliation passes
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Cap on concurrent per-order reconciliation tasks
    #[serde(default = "default_fanout_cap")]
    pub max_concurrent_polls: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    /// Seconds between strategy evaluation passes
    #[serde(default = "default_poll_interval")]
    pub eval_interval_secs: u64,
    /// Cap on concurrent per-strategy evaluation tasks
    #[serde(default = "default_fanout_cap")]
    pub max_concurrent_evals: usize,
}

fn default_database_path() -> String {
    "trade-warden.db".to_string()
}

fn default_exchange_rps() -> u32 {
    8
}

fn default_quotation_rps() -> u32 {
    30
}

fn default_request_timeout() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    5
}

fn default_fanout_cap() -> usize {
    16
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            exchange_rps: default_exchange_rps(),
            quotation_rps: default_quotation_rps(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            max_concurrent_polls: default_fanout_cap(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            eval_interval_secs: default_poll_interval(),
            max_concurrent_evals: default_fanout_cap(),
        }
    }
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl SupervisorConfig {
    pub fn eval_interval(&self) -> Duration {
        Duration::from_secs(self.eval_interval_secs)
    }
}

impl ExchangeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .prefix("TW"),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.engine.poll_interval_secs >= 1,
            "engine poll interval must be at least 1 second"
        );
        anyhow::ensure!(
            self.supervisor.eval_interval_secs >= 1,
            "supervisor eval interval must be at least 1 second"
        );
        anyhow::ensure!(
            self.engine.max_concurrent_polls >= 1 && self.supervisor.max_concurrent_evals >= 1,
            "concurrency caps must be at least 1"
        );
        anyhow::ensure!(
            self.exchange.exchange_rps >= 1 && self.exchange.quotation_rps >= 1,
            "rate limits must be at least 1 request per second"
        );
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            engine: EngineConfig::default(),
            exchange: ExchangeConfig::default(),
            supervisor: SupervisorConfig::default(),
        }
    }
}
