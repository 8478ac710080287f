//! Tests for config loading

use std::io::Write;

use shortcast::config::Config;
use shortcast::transport::Privacy;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_partial_toml_keeps_defaults() {
    let file = write_config(
        r#"
[worker]
batch_size = 10
parallelism = 4

[upload]
privacy = "private"
"#,
    );

    let config = Config::from_file(file.path()).unwrap();
    assert!(config.validate().is_ok());
    assert_eq!(config.worker.batch_size, 10);
    assert_eq!(config.worker.parallelism, 4);
    assert_eq!(config.worker.poll_interval_secs, 60);
    assert_eq!(config.upload.privacy, Privacy::Private);
    assert_eq!(config.quota.upload_cost, 1600);

    let dispatcher = config.dispatcher();
    assert_eq!(dispatcher.batch_size, 10);
    assert_eq!(dispatcher.parallelism, 4);
    assert_eq!(dispatcher.transport_timeout.as_secs(), 300);
}

#[test]
fn test_full_toml() {
    let file = write_config(
        r#"
[worker]
poll_interval_secs = 30
batch_size = 3
max_retries = 5
transport_timeout_secs = 120
parallelism = 2
error_backoff_secs = 10
scan_limit = 50

[quota]
upload_cost = 1600
default_daily_quota = 20000

[planner]
jitter_minutes = 15
default_times = ["09:00", "13:30", "20:00"]

[database]
sqlite_path = "/var/lib/shortcast/db.sqlite"

[ops]
enabled = false
bind = "0.0.0.0:9464"

[logging]
level = "debug"
format = "json"
"#,
    );

    let config = Config::from_file(file.path()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.poll_interval().as_secs(), 30);
    assert_eq!(config.worker_loop().error_backoff.as_secs(), 10);
    assert_eq!(config.service().max_retries, 5);
    assert_eq!(config.service().default_daily_quota, 20_000);
    assert_eq!(config.planner.slot_times().unwrap().len(), 3);
    assert_eq!(config.planner().unwrap().jitter_minutes(), 15);
    assert!(!config.ops.enabled);
    assert_eq!(config.logging.format, "json");
}

#[test]
fn test_invalid_values_rejected() {
    let file = write_config(
        r#"
[worker]
batch_size = 10
scan_limit = 5
"#,
    );
    let config = Config::from_file(file.path()).unwrap();
    assert!(config.validate().is_err());

    let file = write_config(
        r#"
[planner]
default_times = ["10:00", "18:00"]
"#,
    );
    let config = Config::from_file(file.path()).unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn test_malformed_toml_is_error() {
    let file = write_config("[worker\nbatch_size = ");
    assert!(Config::from_file(file.path()).is_err());
}

#[test]
fn test_missing_file_is_error() {
    assert!(Config::from_file(std::path::Path::new("/nonexistent/shortcast.toml")).is_err());
}
