use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub sink: SinkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub zone_tag: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    pub auth: AuthConfig,
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_interval", with = "humantime_serde")]
    pub retry_interval: Duration,
}

fn default_api_base() -> String {
    "https://api.cloudflare.com".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_interval() -> Duration {
    Duration::from_secs(2)
}

/// Credentials sent with every log request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuthConfig {
    ApiKey { api_key: String, email: String },
    ServiceKey { service_key: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_period", with = "humantime_serde")]
    pub period: Duration,
    #[serde(default = "default_safety_lag", with = "humantime_serde")]
    pub safety_lag: Duration,
    #[serde(default = "default_max_segment", with = "humantime_serde")]
    pub max_segment: Duration,
    #[serde(default, with = "humantime_serde")]
    pub tick_timeout: Option<Duration>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            period: default_period(),
            safety_lag: default_safety_lag(),
            max_segment: default_max_segment(),
            tick_timeout: None,
        }
    }
}

fn default_period() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_safety_lag() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_max_segment() -> Duration {
    Duration::from_secs(120)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(default = "default_worker_count")]
    pub download: usize,
    #[serde(default = "default_worker_count")]
    pub processing: usize,
    #[serde(default = "default_output_buffer")]
    pub output_buffer: usize,
    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: PathBuf,
    #[serde(default = "default_delete_after_processing")]
    pub delete_after_processing: bool,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            download: default_worker_count(),
            processing: default_worker_count(),
            output_buffer: default_output_buffer(),
            tmp_dir: default_tmp_dir(),
            delete_after_processing: default_delete_after_processing(),
        }
    }
}

fn default_worker_count() -> usize {
    6
}

fn default_output_buffer() -> usize {
    1000
}

fn default_tmp_dir() -> PathBuf {
    PathBuf::from("tmp_logs/")
}

fn default_delete_after_processing() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default = "default_checkpoint_name")]
    pub name: String,
    #[serde(default)]
    pub advance: AdvancePolicy,
    #[serde(default)]
    pub storage: CheckpointStorageConfig,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            name: default_checkpoint_name(),
            advance: AdvancePolicy::default(),
            storage: CheckpointStorageConfig::default(),
        }
    }
}

fn default_checkpoint_name() -> String {
    "logpull".to_string()
}

/// How far the checkpoint moves after a tick with failed segments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdvancePolicy {
    /// Up to the end of the longest run of completed segments from the window start
    #[default]
    Contiguous,
    /// Over the whole window, whatever happened to individual segments
    Window,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CheckpointStorageConfig {
    Disk {
        #[serde(default = "default_disk_path")]
        path: PathBuf,
    },
    S3(S3StorageConfig),
}

impl Default for CheckpointStorageConfig {
    fn default() -> Self {
        Self::Disk {
            path: default_disk_path(),
        }
    }
}

fn default_disk_path() -> PathBuf {
    PathBuf::from("/var/lib/logpull/")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3StorageConfig {
    pub bucket: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SinkConfig {
    #[default]
    Stdout,
    File {
        path: PathBuf,
    },
}
