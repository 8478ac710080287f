//! Configuration management for the shortcast worker
//!
//! This module handles loading and validating configuration from environment
//! variables (`SHORTCAST_*`) and TOML files.

use anyhow::{Context, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::quota::DEFAULT_UPLOAD_COST;
use crate::scheduler::{
    DispatcherConfig, SchedulePlanner, DEFAULT_JITTER_MINUTES, DEFAULT_MAX_RETRIES,
};
use crate::service::ServiceConfig;
use crate::transport::Privacy;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub worker: WorkerConfig,
    pub quota: QuotaConfig,
    pub planner: PlannerConfig,
    pub upload: UploadConfig,
    pub database: DatabaseConfig,
    pub ops: OpsConfig,
    pub logging: LoggingConfig,
}

/// Poll loop and dispatch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Seconds between dispatch cycles
    pub poll_interval_secs: u64,

    /// Uploads attempted per cycle
    pub batch_size: usize,

    /// Retryable failures before an upload is abandoned
    pub max_retries: u32,

    /// Upper bound on a single transport call
    pub transport_timeout_secs: u64,

    /// Concurrent uploads within a cycle
    pub parallelism: usize,

    /// Pause after a cycle aborted on a storage error
    pub error_backoff_secs: u64,

    /// Due rows fetched per cycle
    pub scan_limit: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            batch_size: 5,
            max_retries: DEFAULT_MAX_RETRIES,
            transport_timeout_secs: 300,
            parallelism: 1,
            error_backoff_secs: 30,
            scan_limit: 100,
        }
    }
}

/// Quota accounting settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Units charged per upload
    pub upload_cost: u64,

    /// Quota given to projects created without an explicit one
    pub default_daily_quota: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            upload_cost: DEFAULT_UPLOAD_COST,
            default_daily_quota: 10_000,
        }
    }
}

/// Schedule planner settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Half-width of the random offset window, in minutes
    pub jitter_minutes: u32,

    /// Fallback slot times ("HH:MM"), in slot order
    pub default_times: Vec<String>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            jitter_minutes: DEFAULT_JITTER_MINUTES,
            default_times: vec!["10:00".into(), "18:00".into(), "14:00".into()],
        }
    }
}

impl PlannerConfig {
    /// Parse `default_times`
    pub fn slot_times(&self) -> Result<Vec<NaiveTime>> {
        self.default_times
            .iter()
            .map(|raw| {
                NaiveTime::parse_from_str(raw, "%H:%M")
                    .with_context(|| format!("Invalid slot time '{raw}', expected HH:MM"))
            })
            .collect()
    }
}

/// Upload request settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub privacy: Privacy,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database path
    pub sqlite_path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/shortcast.db"),
        }
    }
}

/// Ops HTTP endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpsConfig {
    pub enabled: bool,
    pub bind: String,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: String::from("127.0.0.1:9464"),
        }
    }
}

impl OpsConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.bind
            .parse()
            .with_context(|| format!("Invalid ops bind address '{}'", self.bind))
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,

    /// Log format (json or text)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup, on top of defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let d = Self::default();
        let get = |key: &str| lookup(&format!("SHORTCAST_{key}"));

        Ok(Self {
            worker: WorkerConfig {
                poll_interval_secs: parse_or(
                    &get,
                    "POLL_INTERVAL_SECS",
                    d.worker.poll_interval_secs,
                )?,
                batch_size: parse_or(&get, "BATCH_SIZE", d.worker.batch_size)?,
                max_retries: parse_or(&get, "MAX_RETRIES", d.worker.max_retries)?,
                transport_timeout_secs: parse_or(
                    &get,
                    "TRANSPORT_TIMEOUT_SECS",
                    d.worker.transport_timeout_secs,
                )?,
                parallelism: parse_or(&get, "PARALLELISM", d.worker.parallelism)?,
                error_backoff_secs: parse_or(
                    &get,
                    "ERROR_BACKOFF_SECS",
                    d.worker.error_backoff_secs,
                )?,
                scan_limit: parse_or(&get, "SCAN_LIMIT", d.worker.scan_limit)?,
            },
            quota: QuotaConfig {
                upload_cost: parse_or(&get, "UPLOAD_COST", d.quota.upload_cost)?,
                default_daily_quota: parse_or(
                    &get,
                    "DEFAULT_DAILY_QUOTA",
                    d.quota.default_daily_quota,
                )?,
            },
            planner: PlannerConfig {
                jitter_minutes: parse_or(&get, "JITTER_MINUTES", d.planner.jitter_minutes)?,
                default_times: get("DEFAULT_TIMES")
                    .map(|v| v.split(',').map(|t| t.trim().to_string()).collect())
                    .unwrap_or(d.planner.default_times),
            },
            upload: UploadConfig {
                privacy: match get("PRIVACY") {
                    Some(raw) => raw
                        .parse::<Privacy>()
                        .context("Invalid SHORTCAST_PRIVACY")?,
                    None => d.upload.privacy,
                },
            },
            database: DatabaseConfig {
                sqlite_path: get("SQLITE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(d.database.sqlite_path),
            },
            ops: OpsConfig {
                enabled: parse_or(&get, "OPS_ENABLED", d.ops.enabled)?,
                bind: get("OPS_BIND").unwrap_or(d.ops.bind),
            },
            logging: LoggingConfig {
                level: get("LOG_LEVEL").unwrap_or(d.logging.level),
                format: get("LOG_FORMAT").unwrap_or(d.logging.format),
            },
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.worker.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be greater than 0");
        }

        if self.worker.batch_size == 0 {
            anyhow::bail!("batch_size must be greater than 0");
        }

        if self.worker.scan_limit < self.worker.batch_size {
            anyhow::bail!("scan_limit must be at least batch_size");
        }

        if self.worker.max_retries == 0 {
            anyhow::bail!("max_retries must be greater than 0");
        }

        if self.worker.parallelism == 0 {
            anyhow::bail!("parallelism must be greater than 0");
        }

        if self.worker.transport_timeout_secs == 0 {
            anyhow::bail!("transport_timeout_secs must be greater than 0");
        }

        if self.quota.upload_cost == 0 {
            anyhow::bail!("upload_cost must be greater than 0");
        }

        if self.planner.jitter_minutes > 720 {
            anyhow::bail!("jitter_minutes must not exceed 720");
        }

        let times = self.planner.slot_times()?;
        if times.len() < 3 {
            anyhow::bail!("default_times must list at least 3 slot times");
        }

        if self.ops.enabled {
            self.ops.bind_addr()?;
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("log format must be 'text' or 'json'");
        }

        Ok(())
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.worker.poll_interval_secs)
    }

    #[must_use]
    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.worker.error_backoff_secs)
    }

    /// Poll loop timing for [`crate::scheduler::Worker`]
    pub fn worker_loop(&self) -> crate::scheduler::WorkerConfig {
        crate::scheduler::WorkerConfig {
            poll_interval: self.poll_interval(),
            error_backoff: self.error_backoff(),
        }
    }

    /// Dispatcher settings derived from the worker and upload sections
    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig {
            batch_size: self.worker.batch_size,
            scan_limit: self.worker.scan_limit,
            parallelism: self.worker.parallelism,
            transport_timeout: Duration::from_secs(self.worker.transport_timeout_secs),
            max_retries: self.worker.max_retries,
            privacy: self.upload.privacy,
        }
    }

    /// Settings for [`crate::service::SchedulingService`]
    pub fn service(&self) -> ServiceConfig {
        ServiceConfig {
            upload_cost: self.quota.upload_cost,
            default_daily_quota: self.quota.default_daily_quota,
            max_retries: self.worker.max_retries,
        }
    }

    /// Planner with the configured jitter window and fallback slot times
    pub fn planner(&self) -> Result<SchedulePlanner> {
        Ok(SchedulePlanner::new(self.planner.jitter_minutes)
            .with_default_times(self.planner.slot_times()?))
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Invalid value for SHORTCAST_{key}: '{raw}'")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.worker.poll_interval_secs, 60);
        assert_eq!(config.worker.batch_size, 5);
        assert_eq!(config.worker.max_retries, 3);
        assert_eq!(config.worker.transport_timeout_secs, 300);
        assert_eq!(config.quota.upload_cost, 1600);
        assert_eq!(config.planner.jitter_minutes, 30);
        assert_eq!(config.upload.privacy, Privacy::Unlisted);
    }

    #[test]
    fn test_invalid_batch_size() {
        let mut config = Config::default();
        config.worker.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_slot_time() {
        let mut config = Config::default();
        config.planner.default_times = vec!["10:00".into(), "25:00".into(), "14:00".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("SHORTCAST_BATCH_SIZE", "10"),
            ("SHORTCAST_PRIVACY", "private"),
            ("SHORTCAST_DEFAULT_TIMES", "08:00, 12:00,20:00"),
        ]))
        .unwrap();
        assert_eq!(config.worker.batch_size, 10);
        assert_eq!(config.upload.privacy, Privacy::Private);
        assert_eq!(config.planner.default_times, vec!["08:00", "12:00", "20:00"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_rejects_garbage_numbers() {
        let err = Config::from_lookup(lookup(&[("SHORTCAST_MAX_RETRIES", "three")])).unwrap_err();
        assert!(err.to_string().contains("SHORTCAST_MAX_RETRIES"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [worker]
            batch_size = 2

            [upload]
            privacy = "public"
            "#,
        )
        .unwrap();
        assert_eq!(config.worker.batch_size, 2);
        assert_eq!(config.worker.poll_interval_secs, 60);
        assert_eq!(config.upload.privacy, Privacy::Public);
    }

    #[test]
    fn test_dispatcher_conversion() {
        let config = Config::default();
        let dispatcher = config.dispatcher();
        assert_eq!(dispatcher.transport_timeout, Duration::from_secs(300));
        assert_eq!(dispatcher.batch_size, 5);
    }
}
