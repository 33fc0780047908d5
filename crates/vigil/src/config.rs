//! # Runtime Configuration
//!
//! Configuration comes from three layers, later ones winning:
//! built-in defaults, an optional TOML file, then `VIGIL_*` environment
//! variables. Durations in TOML are humantime strings (`"90s"`, `"5m"`).
//!
//! ## Environment Variables
//!
//! ### Storage
//! - `VIGIL_DATA_DIR` - Directory for the event log, WAL and memory files (default: `./vigil-data`)
//!
//! ### Event Bus and Log
//! - `VIGIL_BUS_POOL_WIDTH` - Concurrent subscriber callbacks (default: 10)
//! - `VIGIL_BUS_SHUTDOWN_TIMEOUT_SECS` - Drain timeout at shutdown (default: 5)
//! - `VIGIL_LOG_BUSY_TIMEOUT_MS` - SQLite busy timeout (default: 5000)
//! - `VIGIL_LOG_WRITE_RETRIES` - Extra append attempts before failing (default: 3)
//! - `VIGIL_LOG_RETRY_BACKOFF_MS` - Base backoff between attempts (default: 100)
//!
//! ### Triggers
//! - `VIGIL_COUNT_THRESHOLD` - Events per count fire (default: 5)
//! - `VIGIL_COUNT_EVENT_TYPE` - Event type counted (default: `driver_response`)
//! - `VIGIL_IDLE_TIMEOUT_SECS` - Quiet time before an idle fire (default: 300)
//! - `VIGIL_IDLE_POLL_INTERVAL_SECS` - Idle poll interval (default: 10)
//! - `VIGIL_IDLE_MAX_CONSECUTIVE_FIRES` - Fires before resting (default: 3)
//! - `VIGIL_PRESSURE_MIN_LEVEL` - Minimum pressure level 0.0-1.0 (default: unset)
//! - `VIGIL_STAGING_DIR` - Staging directory to watch (default: unset, watch disabled)
//! - `VIGIL_STAGING_POLL_INTERVAL_SECS` - Staging poll interval (default: 30)
//! - `VIGIL_STAGING_COOLDOWN_SECS` - Quiet period after a staging fire (default: 600)
//!
//! ### Maintenance
//! - `VIGIL_RETENTION_DAYS` - Event age kept by the retention sweep (default: 30)
//! - `VIGIL_CHECKPOINT_THRESHOLD` - WAL entries that force a checkpoint (default: 100)
//! - `VIGIL_CHECKPOINT_INTERVAL_SECS` - Checkpoint check interval (default: 60)
//! - `VIGIL_SNAPSHOT_INTERVAL_SECS` - Snapshot interval (default: 21600)
//! - `VIGIL_SNAPSHOT_DIR` - Snapshot directory (default: `<data_dir>/snapshots`)
//!
//! ### Logging
//! - `VIGIL_LOG_FORMAT` - `json` or `pretty` (default: `pretty`)

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use serde::{Deserialize, Serialize};

use vigil_bus::{EventBusConfig, EventLogConfig};
use vigil_core::EventType;
use vigil_cycle::{CountConfig, EmotionConfig, IdleConfig, PressureConfig, StagingConfig};
use vigil_memory::MemoryConfig;

use crate::telemetry::LogFormat;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid environment variable '{key}': {message}")]
    InvalidEnvVar { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Failed to read config file {}: {message}", path.display())]
    FileError { path: PathBuf, message: String },
}

/// Serde adapter for `Duration` as a humantime string.
pub mod humantime_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(D::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub event_db: String,
    pub wal_file: String,
    pub knowledge_db: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./vigil-data"),
            event_db: "events.db".to_string(),
            wal_file: "memory.wal".to_string(),
            knowledge_db: "knowledge.db".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn event_db_path(&self) -> PathBuf {
        self.data_dir.join(&self.event_db)
    }

    pub fn memory(&self) -> MemoryConfig {
        MemoryConfig {
            data_dir: self.data_dir.clone(),
            wal_file: self.wal_file.clone(),
            knowledge_file: self.knowledge_db.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    pub pool_width: usize,
    #[serde(with = "humantime_duration")]
    pub shutdown_timeout: Duration,
}

impl Default for BusSettings {
    fn default() -> Self {
        let defaults = EventBusConfig::default();
        Self {
            pool_width: defaults.pool_width,
            shutdown_timeout: defaults.shutdown_timeout,
        }
    }
}

impl BusSettings {
    pub fn to_bus_config(&self) -> EventBusConfig {
        EventBusConfig {
            pool_width: self.pool_width,
            shutdown_timeout: self.shutdown_timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLogSettings {
    #[serde(with = "humantime_duration")]
    pub busy_timeout: Duration,
    pub write_retries: u32,
    #[serde(with = "humantime_duration")]
    pub retry_backoff: Duration,
}

impl Default for EventLogSettings {
    fn default() -> Self {
        let defaults = EventLogConfig::default();
        Self {
            busy_timeout: defaults.busy_timeout,
            write_retries: defaults.write_retries,
            retry_backoff: defaults.retry_backoff,
        }
    }
}

impl EventLogSettings {
    pub fn to_log_config(&self) -> EventLogConfig {
        EventLogConfig {
            busy_timeout: self.busy_timeout,
            write_retries: self.write_retries,
            retry_backoff: self.retry_backoff,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CountSettings {
    pub enabled: bool,
    pub event_type: String,
    pub threshold: u32,
}

impl Default for CountSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            event_type: EventType::DriverResponse.to_string(),
            threshold: 5,
        }
    }
}

impl CountSettings {
    pub fn to_trigger_config(&self) -> CountConfig {
        CountConfig {
            event_type: EventType::parse(&self.event_type),
            threshold: self.threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmotionSettings {
    pub enabled: bool,
    pub event_type: String,
    pub meta_key: String,
    pub negative: Vec<String>,
    /// How long a negative emotion keeps counting as recent for idle classification
    #[serde(with = "humantime_duration")]
    pub recency: Duration,
}

impl Default for EmotionSettings {
    fn default() -> Self {
        let defaults = EmotionConfig::default();
        Self {
            enabled: true,
            event_type: defaults.event_type.to_string(),
            meta_key: defaults.meta_key,
            negative: defaults.negative.into_iter().collect(),
            recency: Duration::from_secs(30 * 60),
        }
    }
}

impl EmotionSettings {
    pub fn to_trigger_config(&self) -> EmotionConfig {
        EmotionConfig {
            event_type: EventType::parse(&self.event_type),
            meta_key: self.meta_key.clone(),
            negative: self.negative.iter().cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdleSettings {
    pub enabled: bool,
    #[serde(with = "humantime_duration")]
    pub timeout: Duration,
    #[serde(with = "humantime_duration")]
    pub poll_interval: Duration,
    pub max_consecutive_fires: u32,
    pub activity_types: Vec<String>,
    /// Memory tag marking an open goal
    pub goal_tag: String,
}

impl Default for IdleSettings {
    fn default() -> Self {
        let defaults = IdleConfig::default();
        Self {
            enabled: true,
            timeout: defaults.timeout,
            poll_interval: defaults.poll_interval,
            max_consecutive_fires: defaults.max_consecutive_fires,
            activity_types: defaults
                .activity_types
                .iter()
                .map(ToString::to_string)
                .collect(),
            goal_tag: "goal".to_string(),
        }
    }
}

impl IdleSettings {
    pub fn to_trigger_config(&self) -> IdleConfig {
        IdleConfig {
            timeout: self.timeout,
            poll_interval: self.poll_interval,
            max_consecutive_fires: self.max_consecutive_fires,
            activity_types: self
                .activity_types
                .iter()
                .map(|t| EventType::parse(t))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PressureSettings {
    pub enabled: bool,
    pub min_level: Option<f64>,
}

impl Default for PressureSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            min_level: None,
        }
    }
}

impl PressureSettings {
    pub fn to_trigger_config(&self) -> PressureConfig {
        PressureConfig {
            min_level: self.min_level,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingSettings {
    /// The watch runs only when a directory is set
    pub dir: Option<PathBuf>,
    #[serde(with = "humantime_duration")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_duration")]
    pub cooldown: Duration,
}

impl Default for StagingSettings {
    fn default() -> Self {
        let defaults = StagingConfig::default();
        Self {
            dir: None,
            poll_interval: defaults.poll_interval,
            cooldown: defaults.cooldown,
        }
    }
}

impl StagingSettings {
    pub fn to_trigger_config(&self) -> StagingConfig {
        StagingConfig {
            poll_interval: self.poll_interval,
            cooldown: self.cooldown,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggersConfig {
    pub count: CountSettings,
    pub emotion: EmotionSettings,
    pub idle: IdleSettings,
    pub pressure: PressureSettings,
    pub staging: StagingSettings,
}

/// Upper bound on `maintenance.retention_days` (one century).
pub const MAX_RETENTION_DAYS: u32 = 36_500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub retention_days: u32,
    #[serde(with = "humantime_duration")]
    pub retention_interval: Duration,
    pub checkpoint_threshold: usize,
    #[serde(with = "humantime_duration")]
    pub checkpoint_interval: Duration,
    #[serde(with = "humantime_duration")]
    pub snapshot_interval: Duration,
    /// Defaults to `<data_dir>/snapshots`
    pub snapshot_dir: Option<PathBuf>,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            retention_interval: Duration::from_secs(60 * 60),
            checkpoint_threshold: 100,
            checkpoint_interval: Duration::from_secs(60),
            snapshot_interval: Duration::from_secs(6 * 60 * 60),
            snapshot_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub format: LogFormat,
}

/// Complete runtime configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VigilConfig {
    pub storage: StorageConfig,
    pub bus: BusSettings,
    pub log: EventLogSettings,
    pub triggers: TriggersConfig,
    pub maintenance: MaintenanceConfig,
    pub telemetry: TelemetryConfig,
}

impl VigilConfig {
    /// Parse a TOML file; missing sections and fields take their defaults.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| ConfigError::FileError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&raw).map_err(|e| match e {
            ConfigError::FileError { message, .. } => ConfigError::FileError {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::FileError {
            path: PathBuf::from("<inline>"),
            message: e.to_string(),
        })
    }

    /// Defaults or `path`, then environment overrides, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        VigilConfigBuilder::from_config(base).apply_env()?.build()
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.maintenance
            .snapshot_dir
            .clone()
            .unwrap_or_else(|| self.storage.data_dir.join("snapshots"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(message: &str) -> Result<(), ConfigError> {
            Err(ConfigError::ValidationError(message.to_string()))
        }

        if self.storage.data_dir.as_os_str().is_empty() {
            return invalid("storage.data_dir cannot be empty");
        }
        if self.bus.pool_width == 0 {
            return invalid("bus.pool_width must be greater than 0");
        }
        if self.bus.shutdown_timeout.is_zero() {
            return invalid("bus.shutdown_timeout must be greater than 0");
        }

        let triggers = &self.triggers;
        if triggers.count.threshold == 0 {
            return invalid("triggers.count.threshold must be greater than 0");
        }
        if triggers.emotion.meta_key.is_empty() {
            return invalid("triggers.emotion.meta_key cannot be empty");
        }
        if triggers.idle.timeout.is_zero() || triggers.idle.poll_interval.is_zero() {
            return invalid("triggers.idle.timeout and poll_interval must be greater than 0");
        }
        if triggers.idle.poll_interval > triggers.idle.timeout {
            return invalid("triggers.idle.poll_interval must be <= triggers.idle.timeout");
        }
        if triggers.idle.max_consecutive_fires == 0 {
            return invalid("triggers.idle.max_consecutive_fires must be greater than 0");
        }
        if let Some(level) = triggers.pressure.min_level {
            if !(0.0..=1.0).contains(&level) {
                return invalid("triggers.pressure.min_level must be between 0.0 and 1.0");
            }
        }
        if triggers.staging.poll_interval.is_zero() {
            return invalid("triggers.staging.poll_interval must be greater than 0");
        }
        if triggers.staging.cooldown < triggers.staging.poll_interval {
            return invalid("triggers.staging.cooldown must be >= triggers.staging.poll_interval");
        }

        let maintenance = &self.maintenance;
        if maintenance.retention_days == 0 {
            return invalid("maintenance.retention_days must be greater than 0");
        }
        if maintenance.retention_days > MAX_RETENTION_DAYS {
            return invalid(&format!(
                "maintenance.retention_days must be at most {MAX_RETENTION_DAYS}"
            ));
        }
        if maintenance.checkpoint_threshold == 0 {
            return invalid("maintenance.checkpoint_threshold must be greater than 0");
        }
        if maintenance.retention_interval.is_zero()
            || maintenance.checkpoint_interval.is_zero()
            || maintenance.snapshot_interval.is_zero()
        {
            return invalid("maintenance intervals must be greater than 0");
        }
        Ok(())
    }
}

/// Builder for `VigilConfig` with environment variable support
#[derive(Debug, Clone, Default)]
pub struct VigilConfigBuilder {
    config: VigilConfig,
}

impl VigilConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_config(config: VigilConfig) -> Self {
        Self { config }
    }

    /// Defaults overlaid with `VIGIL_*` environment variables
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` if a variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env()
    }

    /// Overlay `VIGIL_*` environment variables onto the current values.
    pub fn apply_env(mut self) -> Result<Self, ConfigError> {
        let c = &mut self.config;

        if let Some(dir) = get_env_string("VIGIL_DATA_DIR") {
            c.storage.data_dir = PathBuf::from(dir);
        }

        if let Some(width) = get_env_usize("VIGIL_BUS_POOL_WIDTH")? {
            c.bus.pool_width = width;
        }
        if let Some(secs) = get_env_u64("VIGIL_BUS_SHUTDOWN_TIMEOUT_SECS")? {
            c.bus.shutdown_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = get_env_u64("VIGIL_LOG_BUSY_TIMEOUT_MS")? {
            c.log.busy_timeout = Duration::from_millis(ms);
        }
        if let Some(retries) = get_env_u32("VIGIL_LOG_WRITE_RETRIES")? {
            c.log.write_retries = retries;
        }
        if let Some(ms) = get_env_u64("VIGIL_LOG_RETRY_BACKOFF_MS")? {
            c.log.retry_backoff = Duration::from_millis(ms);
        }

        let triggers = &mut c.triggers;
        if let Some(threshold) = get_env_u32("VIGIL_COUNT_THRESHOLD")? {
            triggers.count.threshold = threshold;
        }
        if let Some(event_type) = get_env_string("VIGIL_COUNT_EVENT_TYPE") {
            triggers.count.event_type = event_type;
        }
        if let Some(secs) = get_env_u64("VIGIL_IDLE_TIMEOUT_SECS")? {
            triggers.idle.timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = get_env_u64("VIGIL_IDLE_POLL_INTERVAL_SECS")? {
            triggers.idle.poll_interval = Duration::from_secs(secs);
        }
        if let Some(fires) = get_env_u32("VIGIL_IDLE_MAX_CONSECUTIVE_FIRES")? {
            triggers.idle.max_consecutive_fires = fires;
        }
        if let Some(level) = get_env_f64("VIGIL_PRESSURE_MIN_LEVEL")? {
            triggers.pressure.min_level = Some(level);
        }
        if let Some(dir) = get_env_string("VIGIL_STAGING_DIR") {
            triggers.staging.dir = Some(PathBuf::from(dir));
        }
        if let Some(secs) = get_env_u64("VIGIL_STAGING_POLL_INTERVAL_SECS")? {
            triggers.staging.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = get_env_u64("VIGIL_STAGING_COOLDOWN_SECS")? {
            triggers.staging.cooldown = Duration::from_secs(secs);
        }

        let maintenance = &mut c.maintenance;
        if let Some(days) = get_env_u32("VIGIL_RETENTION_DAYS")? {
            maintenance.retention_days = days;
        }
        if let Some(threshold) = get_env_usize("VIGIL_CHECKPOINT_THRESHOLD")? {
            maintenance.checkpoint_threshold = threshold;
        }
        if let Some(secs) = get_env_u64("VIGIL_CHECKPOINT_INTERVAL_SECS")? {
            maintenance.checkpoint_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = get_env_u64("VIGIL_SNAPSHOT_INTERVAL_SECS")? {
            maintenance.snapshot_interval = Duration::from_secs(secs);
        }
        if let Some(dir) = get_env_string("VIGIL_SNAPSHOT_DIR") {
            maintenance.snapshot_dir = Some(PathBuf::from(dir));
        }

        if let Some(format) = get_env_string("VIGIL_LOG_FORMAT") {
            c.telemetry.format = format.parse().map_err(|message| ConfigError::InvalidEnvVar {
                key: "VIGIL_LOG_FORMAT".to_string(),
                message,
            })?;
        }

        Ok(self)
    }

    #[must_use]
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.storage.data_dir = dir.into();
        self
    }

    #[must_use]
    pub fn pool_width(mut self, width: usize) -> Self {
        self.config.bus.pool_width = width;
        self
    }

    #[must_use]
    pub fn count_threshold(mut self, threshold: u32) -> Self {
        self.config.triggers.count.threshold = threshold;
        self
    }

    #[must_use]
    pub fn idle(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.config.triggers.idle.timeout = timeout;
        self.config.triggers.idle.poll_interval = poll_interval;
        self
    }

    #[must_use]
    pub fn staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.triggers.staging.dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn retention_days(mut self, days: u32) -> Self {
        self.config.maintenance.retention_days = days;
        self
    }

    #[must_use]
    pub fn checkpoint_threshold(mut self, threshold: usize) -> Self {
        self.config.maintenance.checkpoint_threshold = threshold;
        self
    }

    /// Validate and return the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if the configuration is invalid.
    pub fn build(self) -> Result<VigilConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// Environment variable helper functions

fn get_env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn get_env_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    get_env_parsed(key, "u64")
}

fn get_env_u32(key: &str) -> Result<Option<u32>, ConfigError> {
    get_env_parsed(key, "u32")
}

fn get_env_usize(key: &str) -> Result<Option<usize>, ConfigError> {
    get_env_parsed(key, "usize")
}

fn get_env_f64(key: &str) -> Result<Option<f64>, ConfigError> {
    get_env_parsed(key, "f64")
}

fn get_env_parsed<T>(key: &str, kind: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(val) => val
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("invalid {kind} value '{val}': {e}"),
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = VigilConfigBuilder::new().build().unwrap();
        assert_eq!(config.bus.pool_width, 10);
        assert_eq!(config.triggers.count.threshold, 5);
        assert_eq!(config.triggers.count.event_type, "driver_response");
        assert_eq!(config.maintenance.retention_days, 30);
        assert_eq!(config.snapshot_dir(), PathBuf::from("./vigil-data/snapshots"));
    }

    #[test]
    fn test_toml_with_humantime_durations() {
        let config = VigilConfig::from_toml_str(
            r#"
            [storage]
            data_dir = "/var/lib/vigil"

            [bus]
            pool_width = 4
            shutdown_timeout = "2s"

            [triggers.idle]
            timeout = "1m"
            poll_interval = "500ms"

            [triggers.staging]
            dir = "/srv/inbox"
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/vigil"));
        assert_eq!(config.storage.event_db, "events.db");
        assert_eq!(config.bus.pool_width, 4);
        assert_eq!(config.bus.shutdown_timeout, Duration::from_secs(2));
        assert_eq!(config.triggers.idle.timeout, Duration::from_secs(60));
        assert_eq!(config.triggers.idle.poll_interval, Duration::from_millis(500));
        assert_eq!(config.triggers.idle.max_consecutive_fires, 3);
        assert_eq!(config.triggers.staging.dir, Some(PathBuf::from("/srv/inbox")));
        config.validate().unwrap();
    }

    #[test]
    fn test_toml_round_trip() {
        let config = VigilConfig::default();
        let raw = toml::to_string(&config).unwrap();
        assert_eq!(VigilConfig::from_toml_str(&raw).unwrap(), config);
    }

    #[test]
    fn test_bad_duration_is_rejected() {
        let err = VigilConfig::from_toml_str("[bus]\nshutdown_timeout = \"soon\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::FileError { .. }));
    }

    #[test]
    fn test_validation_rules() {
        let cases: Vec<(VigilConfigBuilder, &str)> = vec![
            (VigilConfigBuilder::new().pool_width(0), "bus.pool_width"),
            (VigilConfigBuilder::new().count_threshold(0), "triggers.count.threshold"),
            (
                VigilConfigBuilder::new().idle(Duration::from_secs(10), Duration::from_secs(20)),
                "poll_interval must be <=",
            ),
            (VigilConfigBuilder::new().retention_days(0), "retention_days"),
            (
                VigilConfigBuilder::new().retention_days(200_000_000),
                "retention_days must be at most",
            ),
            (VigilConfigBuilder::new().checkpoint_threshold(0), "checkpoint_threshold"),
        ];
        for (builder, expected) in cases {
            let message = builder.build().unwrap_err().to_string();
            assert!(message.contains(expected), "{message} should mention {expected}");
        }

        let mut config = VigilConfig::default();
        config.triggers.staging.cooldown = Duration::from_secs(1);
        assert!(config.validate().is_err());
        config = VigilConfig::default();
        config.triggers.pressure.min_level = Some(1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_missing_file_fails() {
        let err = VigilConfig::load_from_file("/definitely/not/here.toml").unwrap_err();
        match err {
            ConfigError::FileError { path, .. } => {
                assert_eq!(path, PathBuf::from("/definitely/not/here.toml"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
