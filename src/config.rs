use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::Level;
use url::Url;

use crate::attestation::{DEFAULT_API_BASE, DEFAULT_POLL_INTERVAL, PollPolicy};
use crate::recovery::SweepIntervals;

#[derive(Parser, Debug)]
pub struct Env {
    /// Path to plaintext TOML configuration file
    #[clap(long)]
    pub config: PathBuf,
}

/// Settings deserialized from the config TOML.
#[derive(Deserialize)]
struct Config {
    database_url: String,
    log_level: Option<LogLevel>,
    attestation: Option<AttestationConfig>,
    recovery: Option<RecoveryConfig>,
}

/// `[attestation]` section: where and how often to poll.
#[derive(Deserialize)]
struct AttestationConfig {
    api_base: Option<Url>,
    poll_interval_secs: Option<u64>,
    max_attempts: Option<usize>,
}

/// `[recovery]` section: sweep cadence overrides.
#[derive(Deserialize)]
struct RecoveryConfig {
    active_sweep_secs: Option<u64>,
    idle_sweep_secs: Option<u64>,
}

/// Combined runtime context assembled from the config file and defaults.
#[derive(Debug, Clone)]
pub struct Ctx {
    pub database_url: String,
    pub log_level: LogLevel,
    /// Attestation service base URL, without a trailing slash.
    pub attestation_api_base: String,
    pub poll_policy: PollPolicy,
    pub sweep_intervals: SweepIntervals,
}

impl Ctx {
    pub fn load_file(config: &Path) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(config)?;
        Self::from_toml(&config_str)
    }

    pub fn from_toml(config_toml: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(config_toml)?;

        let attestation = config.attestation.unwrap_or(AttestationConfig {
            api_base: None,
            poll_interval_secs: None,
            max_attempts: None,
        });
        let attestation_api_base = attestation
            .api_base
            .map(|url| url.to_string().trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let poll_policy = PollPolicy {
            interval: attestation
                .poll_interval_secs
                .map_or(DEFAULT_POLL_INTERVAL, Duration::from_secs),
            max_attempts: attestation.max_attempts,
        };

        let defaults = SweepIntervals::default();
        let recovery = config.recovery.unwrap_or(RecoveryConfig {
            active_sweep_secs: None,
            idle_sweep_secs: None,
        });
        let sweep_intervals = SweepIntervals {
            active: recovery
                .active_sweep_secs
                .map_or(defaults.active, Duration::from_secs),
            idle: recovery
                .idle_sweep_secs
                .map_or(defaults.idle, Duration::from_secs),
        };

        Ok(Self {
            database_url: config.database_url,
            log_level: config.log_level.unwrap_or(LogLevel::Info),
            attestation_api_base,
            poll_policy,
            sweep_intervals,
        })
    }

    pub async fn sqlite_pool(&self) -> Result<SqlitePool, sqlx::Error> {
        configure_sqlite_pool(&self.database_url).await
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(log_level: LogLevel) -> Self {
        match log_level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

impl From<&LogLevel> for Level {
    fn from(log_level: &LogLevel) -> Self {
        match log_level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

pub(crate) async fn configure_sqlite_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let pool = SqlitePool::connect(database_url).await?;

    // WAL allows a live transfer session and a recovery sweep to read
    // concurrently; writes still serialize, which the short ledger
    // transactions tolerate.
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    // When a write is blocked by another connection, wait up to 10 seconds
    // before failing with "database is locked".
    sqlx::query("PRAGMA busy_timeout = 10000")
        .execute(&pool)
        .await?;

    Ok(pool)
}

pub fn setup_tracing(log_level: &LogLevel) {
    let level: Level = log_level.into();
    let default_filter = format!("cctp_orchestrator={level}");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML")]
    Toml(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_falls_back_to_defaults() {
        let ctx = Ctx::from_toml(r#"database_url = "sqlite://transfers.db""#).unwrap();

        assert_eq!(ctx.database_url, "sqlite://transfers.db");
        assert!(matches!(ctx.log_level, LogLevel::Info));
        assert_eq!(ctx.attestation_api_base, DEFAULT_API_BASE);
        assert_eq!(ctx.poll_policy.interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(ctx.poll_policy.max_attempts, None);
        assert_eq!(ctx.sweep_intervals, SweepIntervals::default());
    }

    #[test]
    fn full_config_overrides_every_default() {
        let ctx = Ctx::from_toml(
            r#"
            database_url = "sqlite://transfers.db"
            log_level = "debug"

            [attestation]
            api_base = "https://iris-api-sandbox.circle.com/"
            poll_interval_secs = 5
            max_attempts = 120

            [recovery]
            active_sweep_secs = 10
            idle_sweep_secs = 60
            "#,
        )
        .unwrap();

        assert!(matches!(ctx.log_level, LogLevel::Debug));
        // Trailing slash is trimmed so path joining stays clean.
        assert_eq!(
            ctx.attestation_api_base,
            "https://iris-api-sandbox.circle.com"
        );
        assert_eq!(ctx.poll_policy.interval, Duration::from_secs(5));
        assert_eq!(ctx.poll_policy.max_attempts, Some(120));
        assert_eq!(ctx.sweep_intervals.active, Duration::from_secs(10));
        assert_eq!(ctx.sweep_intervals.idle, Duration::from_secs(60));
    }

    #[test]
    fn malformed_toml_is_rejected() {
        let result = Ctx::from_toml("database_url = ");

        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn invalid_api_base_is_rejected() {
        let result = Ctx::from_toml(
            r#"
            database_url = "sqlite://transfers.db"

            [attestation]
            api_base = "not a url"
            "#,
        );

        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }
}
