//! Configuration loading for the job orchestrator.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `ORCHESTRATOR_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const ENV_PREFIX: &str = "ORCHESTRATOR_";

/// Application configuration derived from `ORCHESTRATOR_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub scaling: ScalingConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub sla: SlaConfig,
}

/// Retry policy parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RetryConfig {
    /// Retry ceiling applied to jobs submitted without one (default: 3)
    ///
    /// Environment variable: `ORCHESTRATOR_RETRY_MAX_RETRIES`
    #[serde(default = "default_retry_max_retries")]
    pub max_retries: u32,

    /// Backoff for the first retry in seconds (default: 60)
    ///
    /// Subsequent retries use base_delay_seconds * 2^retry_count.
    ///
    /// Environment variable: `ORCHESTRATOR_RETRY_BASE_DELAY_SECONDS`
    #[serde(default = "default_retry_base_delay_seconds")]
    pub base_delay_seconds: u64,

    /// Upper bound for the backoff in seconds (default: 3600)
    ///
    /// Environment variable: `ORCHESTRATOR_RETRY_MAX_DELAY_SECONDS`
    #[serde(default = "default_retry_max_delay_seconds")]
    pub max_delay_seconds: u64,

    /// Maximum jitter added on top of the backoff, as a fraction of it (default: 0.2)
    ///
    /// Environment variable: `ORCHESTRATOR_RETRY_JITTER_PCT`
    #[serde(default = "default_retry_jitter_pct")]
    pub jitter_pct: f64,
}

/// Scaling advisor parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ScalingConfig {
    /// Jobs one worker is expected to absorb (default: 10)
    #[serde(default = "default_scaling_worker_capacity")]
    pub worker_capacity: u32,

    /// Pending count under which scale-down is suggested (default: 5)
    #[serde(default = "default_scaling_low_water_mark")]
    pub low_water_mark: u64,
}

/// Background loop cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_dispatch_tick_seconds")]
    pub dispatch_tick_seconds: u64,
    #[serde(default = "default_scheduler_release_scan_seconds")]
    pub release_scan_seconds: u64,
    #[serde(default = "default_scheduler_monitor_poll_seconds")]
    pub monitor_poll_seconds: u64,
    /// Maximum jobs dispatched per tick
    #[serde(default = "default_scheduler_dispatch_batch")]
    pub dispatch_batch: u64,
    /// Delay before a job whose dispatch hit an unavailable broker is tried again
    #[serde(default = "default_scheduler_broker_retry_seconds")]
    pub broker_retry_seconds: u64,
}

/// Checkpoint store parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct CheckpointConfig {
    /// Entry lifetime in the checkpoint store (default: 7 days)
    #[serde(default = "default_checkpoint_ttl_seconds")]
    pub ttl_seconds: u64,
    /// `database` persists checkpoints in `checkpoint_entries`; `memory`
    /// keeps them in process only
    #[serde(default = "default_checkpoint_store")]
    pub store: String,
    /// Live entries the in-memory store holds before refusing writes
    #[serde(default = "default_checkpoint_cache_capacity")]
    pub cache_capacity: usize,
}

/// In-process broker parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct BrokerConfig {
    #[serde(default = "default_broker_workers")]
    pub workers: u32,
    #[serde(default = "default_broker_worker_concurrency")]
    pub worker_concurrency: u32,
}

/// SLA reporting parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SlaConfig {
    /// Default reporting window for compliance rates
    #[serde(default = "default_sla_window_hours")]
    pub window_hours: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            retry: RetryConfig::default(),
            scaling: ScalingConfig::default(),
            scheduler: SchedulerConfig::default(),
            checkpoint: CheckpointConfig::default(),
            broker: BrokerConfig::default(),
            sla: SlaConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_retry_max_retries(),
            base_delay_seconds: default_retry_base_delay_seconds(),
            max_delay_seconds: default_retry_max_delay_seconds(),
            jitter_pct: default_retry_jitter_pct(),
        }
    }
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            worker_capacity: default_scaling_worker_capacity(),
            low_water_mark: default_scaling_low_water_mark(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            dispatch_tick_seconds: default_scheduler_dispatch_tick_seconds(),
            release_scan_seconds: default_scheduler_release_scan_seconds(),
            monitor_poll_seconds: default_scheduler_monitor_poll_seconds(),
            dispatch_batch: default_scheduler_dispatch_batch(),
            broker_retry_seconds: default_scheduler_broker_retry_seconds(),
        }
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_checkpoint_ttl_seconds(),
            store: default_checkpoint_store(),
            cache_capacity: default_checkpoint_cache_capacity(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            workers: default_broker_workers(),
            worker_concurrency: default_broker_worker_concurrency(),
        }
    }
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            window_hours: default_sla_window_hours(),
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_delay_seconds == 0 || self.base_delay_seconds > self.max_delay_seconds {
            return Err(ConfigError::InvalidRetryBounds {
                base: self.base_delay_seconds,
                max: self.max_delay_seconds,
            });
        }

        if !(0.0..=1.0).contains(&self.jitter_pct) {
            return Err(ConfigError::InvalidRetryJitter {
                value: self.jitter_pct,
            });
        }

        if self.max_retries > 100 {
            return Err(ConfigError::InvalidRetryCeiling {
                value: self.max_retries,
            });
        }

        Ok(())
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_secs(self.base_delay_seconds)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_seconds)
    }
}

impl ScalingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_capacity == 0 {
            return Err(ConfigError::InvalidWorkerCapacity);
        }
        Ok(())
    }
}

impl SchedulerConfig {
    /// Validate loop cadences are positive and bounded.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("dispatch tick", self.dispatch_tick_seconds),
            ("release scan", self.release_scan_seconds),
            ("monitor poll", self.monitor_poll_seconds),
        ] {
            if value == 0 || value > 3600 {
                return Err(ConfigError::InvalidSchedulerInterval {
                    name: name.to_string(),
                    value,
                });
            }
        }

        if self.dispatch_batch == 0 {
            return Err(ConfigError::InvalidDispatchBatch);
        }

        Ok(())
    }

    pub fn dispatch_tick(&self) -> Duration {
        Duration::from_secs(self.dispatch_tick_seconds)
    }

    pub fn release_scan(&self) -> Duration {
        Duration::from_secs(self.release_scan_seconds)
    }

    pub fn monitor_poll(&self) -> Duration {
        Duration::from_secs(self.monitor_poll_seconds)
    }

    pub fn broker_retry(&self) -> Duration {
        Duration::from_secs(self.broker_retry_seconds)
    }
}

impl CheckpointConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl_seconds == 0 {
            return Err(ConfigError::InvalidCheckpointTtl);
        }
        if !matches!(self.store.as_str(), "database" | "memory") {
            return Err(ConfigError::InvalidCheckpointStore {
                value: self.store.clone(),
            });
        }
        if self.cache_capacity == 0 {
            return Err(ConfigError::InvalidCheckpointCapacity);
        }
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn in_memory(&self) -> bool {
        self.store == "memory"
    }
}

impl BrokerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 || self.worker_concurrency == 0 {
            return Err(ConfigError::InvalidBrokerWorkers {
                workers: self.workers,
                concurrency: self.worker_concurrency,
            });
        }
        Ok(())
    }
}

impl SlaConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.window_hours as i64)
    }
}

impl AppConfig {
    /// Returns a redacted JSON representation (database password is redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if let Ok(mut url) = Url::parse(&config.database_url) {
            if url.password().is_some() && url.set_password(Some("[REDACTED]")).is_ok() {
                config.database_url = url.to_string();
            }
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates every configuration section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }

        if self.database_url.trim().is_empty() {
            return Err(ConfigError::MissingDatabaseUrl);
        }

        self.retry.validate()?;
        self.scaling.validate()?;
        self.scheduler.validate()?;
        self.checkpoint.validate()?;
        self.broker.validate()?;

        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://orchestrator.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_retry_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_seconds() -> u64 {
    60
}

fn default_retry_max_delay_seconds() -> u64 {
    3600 // 1 hour
}

fn default_retry_jitter_pct() -> f64 {
    0.2
}

fn default_scaling_worker_capacity() -> u32 {
    10
}

fn default_scaling_low_water_mark() -> u64 {
    5
}

fn default_scheduler_dispatch_tick_seconds() -> u64 {
    5
}

fn default_scheduler_release_scan_seconds() -> u64 {
    30
}

fn default_scheduler_monitor_poll_seconds() -> u64 {
    60
}

fn default_scheduler_dispatch_batch() -> u64 {
    50
}

fn default_scheduler_broker_retry_seconds() -> u64 {
    15
}

fn default_checkpoint_ttl_seconds() -> u64 {
    604800 // 7 days
}

fn default_checkpoint_store() -> String {
    "database".to_string()
}

fn default_checkpoint_cache_capacity() -> usize {
    10_000
}

fn default_broker_workers() -> u32 {
    2
}

fn default_broker_worker_concurrency() -> u32 {
    10
}

fn default_sla_window_hours() -> u64 {
    24
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
    #[error("log format must be 'json' or 'pretty', got '{value}'")]
    InvalidLogFormat { value: String },
    #[error("database url is missing; set ORCHESTRATOR_DATABASE_URL")]
    MissingDatabaseUrl,
    #[error("retry base delay ({base}s) must be positive and not exceed max delay ({max}s)")]
    InvalidRetryBounds { base: u64, max: u64 },
    #[error("retry jitter percentage must be between 0.0 and 1.0, got {value}")]
    InvalidRetryJitter { value: f64 },
    #[error("retry ceiling must not exceed 100, got {value}")]
    InvalidRetryCeiling { value: u32 },
    #[error("scaling worker capacity must be positive")]
    InvalidWorkerCapacity,
    #[error("scheduler {name} interval must be between 1 and 3600 seconds, got {value}")]
    InvalidSchedulerInterval { name: String, value: u64 },
    #[error("scheduler dispatch batch must be positive")]
    InvalidDispatchBatch,
    #[error("checkpoint ttl must be positive")]
    InvalidCheckpointTtl,
    #[error("checkpoint store must be 'database' or 'memory', got '{value}'")]
    InvalidCheckpointStore { value: String },
    #[error("checkpoint cache capacity must be positive")]
    InvalidCheckpointCapacity,
    #[error("broker needs at least one worker with positive concurrency, got {workers} x {concurrency}")]
    InvalidBrokerWorkers { workers: u32, concurrency: u32 },
}

/// Loads configuration using layered `.env` files and `ORCHESTRATOR_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads and validates configuration. Process environment wins over files.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = layered
            .remove("PROFILE")
            .filter(|v| !v.is_empty())
            .unwrap_or(profile_hint);
        let log_level = layered
            .remove("LOG_LEVEL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_level);
        let log_format = layered
            .remove("LOG_FORMAT")
            .filter(|v| !v.is_empty())
            .map(|v| v.to_ascii_lowercase())
            .unwrap_or_else(default_log_format);
        let database_url = layered
            .remove("DATABASE_URL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_database_url);
        let db_max_connections = parse_or(
            &mut layered,
            "DB_MAX_CONNECTIONS",
            default_db_max_connections,
        )?;
        let db_acquire_timeout_ms = parse_or(
            &mut layered,
            "DB_ACQUIRE_TIMEOUT_MS",
            default_db_acquire_timeout_ms,
        )?;

        let retry = RetryConfig {
            max_retries: parse_or(&mut layered, "RETRY_MAX_RETRIES", default_retry_max_retries)?,
            base_delay_seconds: parse_or(
                &mut layered,
                "RETRY_BASE_DELAY_SECONDS",
                default_retry_base_delay_seconds,
            )?,
            max_delay_seconds: parse_or(
                &mut layered,
                "RETRY_MAX_DELAY_SECONDS",
                default_retry_max_delay_seconds,
            )?,
            jitter_pct: parse_or(&mut layered, "RETRY_JITTER_PCT", default_retry_jitter_pct)?,
        };

        let scaling = ScalingConfig {
            worker_capacity: parse_or(
                &mut layered,
                "SCALING_WORKER_CAPACITY",
                default_scaling_worker_capacity,
            )?,
            low_water_mark: parse_or(
                &mut layered,
                "SCALING_LOW_WATER_MARK",
                default_scaling_low_water_mark,
            )?,
        };

        let scheduler = SchedulerConfig {
            dispatch_tick_seconds: parse_or(
                &mut layered,
                "SCHEDULER_DISPATCH_TICK_SECONDS",
                default_scheduler_dispatch_tick_seconds,
            )?,
            release_scan_seconds: parse_or(
                &mut layered,
                "SCHEDULER_RELEASE_SCAN_SECONDS",
                default_scheduler_release_scan_seconds,
            )?,
            monitor_poll_seconds: parse_or(
                &mut layered,
                "SCHEDULER_MONITOR_POLL_SECONDS",
                default_scheduler_monitor_poll_seconds,
            )?,
            dispatch_batch: parse_or(
                &mut layered,
                "SCHEDULER_DISPATCH_BATCH",
                default_scheduler_dispatch_batch,
            )?,
            broker_retry_seconds: parse_or(
                &mut layered,
                "SCHEDULER_BROKER_RETRY_SECONDS",
                default_scheduler_broker_retry_seconds,
            )?,
        };

        let checkpoint = CheckpointConfig {
            ttl_seconds: parse_or(
                &mut layered,
                "CHECKPOINT_TTL_SECONDS",
                default_checkpoint_ttl_seconds,
            )?,
            store: layered
                .remove("CHECKPOINT_STORE")
                .filter(|v| !v.is_empty())
                .map(|v| v.to_ascii_lowercase())
                .unwrap_or_else(default_checkpoint_store),
            cache_capacity: parse_or(
                &mut layered,
                "CHECKPOINT_CACHE_CAPACITY",
                default_checkpoint_cache_capacity,
            )?,
        };

        let broker = BrokerConfig {
            workers: parse_or(&mut layered, "BROKER_WORKERS", default_broker_workers)?,
            worker_concurrency: parse_or(
                &mut layered,
                "BROKER_WORKER_CONCURRENCY",
                default_broker_worker_concurrency,
            )?,
        };

        let sla = SlaConfig {
            window_hours: parse_or(&mut layered, "SLA_WINDOW_HOURS", default_sla_window_hours)?,
        };

        let config = AppConfig {
            profile,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            retry,
            scaling,
            scheduler,
            checkpoint,
            broker,
            sla,
        };

        config.validate()?;
        Ok(config)
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses a layered value, falling back to the default when absent or empty.
/// Unparseable values are rejected rather than silently defaulted.
fn parse_or<T, F>(
    layered: &mut BTreeMap<String, String>,
    key: &str,
    default: F,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    F: FnOnce() -> T,
{
    match layered.remove(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                key: format!("{ENV_PREFIX}{key}"),
                value: raw,
            }),
        None => Ok(default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_delay(), Duration::from_secs(60));
        assert_eq!(config.checkpoint.ttl(), Duration::from_secs(7 * 24 * 3600));
        assert!(!config.checkpoint.in_memory());
    }

    #[test]
    fn unknown_checkpoint_store_is_rejected() {
        let checkpoint = CheckpointConfig {
            store: "redis".to_string(),
            ..CheckpointConfig::default()
        };
        assert!(matches!(
            checkpoint.validate(),
            Err(ConfigError::InvalidCheckpointStore { .. })
        ));
    }

    #[test]
    fn retry_bounds_are_checked() {
        let inverted = RetryConfig {
            base_delay_seconds: 7200,
            max_delay_seconds: 60,
            ..RetryConfig::default()
        };
        assert!(matches!(
            inverted.validate(),
            Err(ConfigError::InvalidRetryBounds { .. })
        ));

        let jitter = RetryConfig {
            jitter_pct: 1.5,
            ..RetryConfig::default()
        };
        assert!(matches!(
            jitter.validate(),
            Err(ConfigError::InvalidRetryJitter { .. })
        ));
    }

    #[test]
    fn zero_worker_capacity_is_rejected() {
        let scaling = ScalingConfig {
            worker_capacity: 0,
            low_water_mark: 5,
        };
        assert!(scaling.validate().is_err());
    }

    #[test]
    fn redacted_json_hides_database_password() {
        let config = AppConfig {
            database_url: "postgresql://app:s3cret@db:5432/jobs".to_string(),
            ..AppConfig::default()
        };
        let rendered = config.redacted_json().unwrap();
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn parse_or_rejects_garbage() {
        let mut layered = BTreeMap::new();
        layered.insert("RETRY_MAX_RETRIES".to_string(), "many".to_string());
        let err = parse_or(&mut layered, "RETRY_MAX_RETRIES", default_retry_max_retries)
            .unwrap_err();
        assert!(err.to_string().contains("ORCHESTRATOR_RETRY_MAX_RETRIES"));

        let value: u32 = parse_or(&mut layered, "RETRY_MAX_RETRIES", || 7).unwrap();
        assert_eq!(value, 7);
    }
}
