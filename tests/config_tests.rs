use logpull::config::types::{AdvancePolicy, AuthConfig, CheckpointStorageConfig, SinkConfig};
use logpull::config::{generate::generate_starter_config, load_config, ConfigError};
use logpull::window::WindowPlanner;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_generated_config_is_valid() {
    std::env::set_var("LOGPULL_ZONE_TAG", "0123456789abcdef");
    std::env::set_var("LOGPULL_API_KEY", "secret");
    std::env::set_var("LOGPULL_EMAIL", "ops@example.com");

    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");
    fs::write(&config_path, generate_starter_config()).unwrap();

    let config = load_config(&config_path).expect("Generated config should be valid");
    assert_eq!(config.source.zone_tag, "0123456789abcdef");
    assert!(matches!(
        config.source.auth,
        AuthConfig::ApiKey { ref email, .. } if email == "ops@example.com"
    ));
    assert_eq!(config.schedule.max_segment, Duration::from_secs(120));
    assert_eq!(config.checkpoint.advance, AdvancePolicy::Contiguous);
    assert!(matches!(config.sink, SinkConfig::Stdout));
}

#[test]
fn test_missing_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let err = load_config(&temp_dir.path().join("absent.yml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
    assert!(err.to_string().contains("absent.yml"));
}

#[test]
fn test_full_config_from_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");
    let config_yaml = r#"
source:
  zone_tag: zone-a
  api_base: http://localhost:8080
  auth:
    service_key: v1.0-abc
  request_timeout: 15s
  max_retries: 5
  retry_interval: 500ms

schedule:
  period: 5m
  safety_lag: 10m
  max_segment: 60s
  tick_timeout: 4m

workers:
  download: 2
  processing: 8
  output_buffer: 50
  tmp_dir: /tmp/logpull-units
  delete_after_processing: false

checkpoint:
  name: edge
  advance: window
  storage:
    type: s3
    bucket: checkpoints
    access_key: AKIA
    secret_key: shh
    endpoint: http://localhost:9000

sink:
  type: file
  path: /tmp/logpull-events.jsonl
"#;
    fs::write(&config_path, config_yaml).unwrap();

    let config = load_config(&config_path).unwrap();
    assert_eq!(config.source.api_base, "http://localhost:8080");
    assert_eq!(config.source.request_timeout, Duration::from_secs(15));
    assert_eq!(config.source.retry_interval, Duration::from_millis(500));
    assert_eq!(config.schedule.tick_timeout, Some(Duration::from_secs(240)));
    assert_eq!(config.workers.processing, 8);
    assert!(!config.workers.delete_after_processing);
    assert_eq!(config.checkpoint.advance, AdvancePolicy::Window);

    let CheckpointStorageConfig::S3(s3) = &config.checkpoint.storage else {
        panic!("expected s3 storage");
    };
    assert_eq!(s3.bucket, "checkpoints");
    assert_eq!(s3.region, "us-east-1");
    assert_eq!(s3.endpoint.as_deref(), Some("http://localhost:9000"));
}

#[test]
fn test_out_of_range_period_is_clamped_not_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");
    fs::write(
        &config_path,
        r#"
source:
  zone_tag: zone
  auth:
    service_key: k
schedule:
  period: 2h
"#,
    )
    .unwrap();

    let config = load_config(&config_path).unwrap();
    let planner = WindowPlanner::new(config.schedule.period, config.schedule.safety_lag);
    assert_eq!(planner.period(), Duration::from_secs(300));
}

#[test]
fn test_missing_auth_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");
    fs::write(&config_path, "source:\n  zone_tag: zone\n").unwrap();

    assert!(load_config(&config_path).is_err());
}
