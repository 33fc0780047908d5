//! Tests for `VIGIL_*` environment variable configuration

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serial_test::serial;
use vigil::{ConfigError, LogFormat, VigilConfig, VigilConfigBuilder};

const VARS: &[&str] = &[
    "VIGIL_DATA_DIR",
    "VIGIL_BUS_POOL_WIDTH",
    "VIGIL_BUS_SHUTDOWN_TIMEOUT_SECS",
    "VIGIL_LOG_BUSY_TIMEOUT_MS",
    "VIGIL_LOG_WRITE_RETRIES",
    "VIGIL_LOG_RETRY_BACKOFF_MS",
    "VIGIL_COUNT_THRESHOLD",
    "VIGIL_COUNT_EVENT_TYPE",
    "VIGIL_IDLE_TIMEOUT_SECS",
    "VIGIL_IDLE_POLL_INTERVAL_SECS",
    "VIGIL_IDLE_MAX_CONSECUTIVE_FIRES",
    "VIGIL_PRESSURE_MIN_LEVEL",
    "VIGIL_STAGING_DIR",
    "VIGIL_STAGING_POLL_INTERVAL_SECS",
    "VIGIL_STAGING_COOLDOWN_SECS",
    "VIGIL_RETENTION_DAYS",
    "VIGIL_CHECKPOINT_THRESHOLD",
    "VIGIL_CHECKPOINT_INTERVAL_SECS",
    "VIGIL_SNAPSHOT_INTERVAL_SECS",
    "VIGIL_SNAPSHOT_DIR",
    "VIGIL_LOG_FORMAT",
];

fn set_env(key: &str, value: &str) {
    unsafe {
        env::set_var(key, value);
    }
}

fn clear_env(key: &str) {
    unsafe {
        env::remove_var(key);
    }
}

fn clear_all_vigil_env_vars() {
    for key in VARS {
        clear_env(key);
    }
}

#[test]
#[serial]
fn test_defaults_without_env() {
    clear_all_vigil_env_vars();

    let config = VigilConfigBuilder::from_env()
        .expect("should load config")
        .build()
        .expect("should build config");

    assert_eq!(config, VigilConfig::default());
}

#[test]
#[serial]
fn test_storage_and_bus_overrides() {
    clear_all_vigil_env_vars();
    set_env("VIGIL_DATA_DIR", "/tmp/vigil-env");
    set_env("VIGIL_BUS_POOL_WIDTH", "4");
    set_env("VIGIL_BUS_SHUTDOWN_TIMEOUT_SECS", "9");
    set_env("VIGIL_LOG_WRITE_RETRIES", "0");
    set_env("VIGIL_LOG_RETRY_BACKOFF_MS", "25");

    let config = VigilConfigBuilder::from_env()
        .expect("should load config")
        .build()
        .expect("should build config");

    assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/vigil-env"));
    assert_eq!(config.bus.pool_width, 4);
    assert_eq!(config.bus.shutdown_timeout, Duration::from_secs(9));
    assert_eq!(config.log.write_retries, 0);
    assert_eq!(config.log.retry_backoff, Duration::from_millis(25));
    assert_eq!(config.snapshot_dir(), PathBuf::from("/tmp/vigil-env/snapshots"));

    clear_all_vigil_env_vars();
}

#[test]
#[serial]
fn test_trigger_and_maintenance_overrides() {
    clear_all_vigil_env_vars();
    set_env("VIGIL_COUNT_THRESHOLD", "7");
    set_env("VIGIL_COUNT_EVENT_TYPE", "tool_result");
    set_env("VIGIL_IDLE_TIMEOUT_SECS", "60");
    set_env("VIGIL_IDLE_POLL_INTERVAL_SECS", "5");
    set_env("VIGIL_PRESSURE_MIN_LEVEL", "0.8");
    set_env("VIGIL_STAGING_DIR", "/srv/inbox");
    set_env("VIGIL_RETENTION_DAYS", "7");
    set_env("VIGIL_CHECKPOINT_THRESHOLD", "50");
    set_env("VIGIL_LOG_FORMAT", "json");

    let config = VigilConfigBuilder::from_env()
        .expect("should load config")
        .build()
        .expect("should build config");

    let triggers = &config.triggers;
    assert_eq!(triggers.count.threshold, 7);
    assert_eq!(triggers.count.event_type, "tool_result");
    assert_eq!(triggers.idle.timeout, Duration::from_secs(60));
    assert_eq!(triggers.idle.poll_interval, Duration::from_secs(5));
    assert_eq!(triggers.pressure.min_level, Some(0.8));
    assert_eq!(triggers.staging.dir, Some(PathBuf::from("/srv/inbox")));
    assert_eq!(config.maintenance.retention_days, 7);
    assert_eq!(config.maintenance.checkpoint_threshold, 50);
    assert_eq!(config.telemetry.format, LogFormat::Json);

    clear_all_vigil_env_vars();
}

#[test]
#[serial]
fn test_invalid_number_is_reported_with_key() {
    clear_all_vigil_env_vars();
    set_env("VIGIL_BUS_POOL_WIDTH", "lots");

    let err = VigilConfigBuilder::from_env().unwrap_err();
    match err {
        ConfigError::InvalidEnvVar { key, message } => {
            assert_eq!(key, "VIGIL_BUS_POOL_WIDTH");
            assert!(message.contains("lots"));
        }
        other => panic!("unexpected error: {other}"),
    }

    clear_all_vigil_env_vars();
}

#[test]
#[serial]
fn test_env_values_are_validated() {
    clear_all_vigil_env_vars();
    set_env("VIGIL_IDLE_TIMEOUT_SECS", "5");
    set_env("VIGIL_IDLE_POLL_INTERVAL_SECS", "30");

    let err = VigilConfigBuilder::from_env()
        .expect("should load config")
        .build()
        .unwrap_err();
    assert!(matches!(err, ConfigError::ValidationError(_)));

    clear_all_vigil_env_vars();
}

#[test]
#[serial]
fn test_env_overrides_file() {
    clear_all_vigil_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vigil.toml");
    std::fs::write(
        &path,
        "[bus]\npool_width = 3\n\n[maintenance]\nretention_days = 14\n",
    )
    .unwrap();
    set_env("VIGIL_RETENTION_DAYS", "2");

    let config = VigilConfig::load(Some(&path)).expect("should load config");
    assert_eq!(config.bus.pool_width, 3);
    assert_eq!(config.maintenance.retention_days, 2);

    clear_all_vigil_env_vars();
}

#[test]
#[serial]
fn test_invalid_log_format() {
    clear_all_vigil_env_vars();
    set_env("VIGIL_LOG_FORMAT", "xml");

    assert!(matches!(
        VigilConfigBuilder::from_env(),
        Err(ConfigError::InvalidEnvVar { .. })
    ));

    clear_all_vigil_env_vars();
}
