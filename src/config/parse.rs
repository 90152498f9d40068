use super::types::*;
use crate::config::{expand_env_vars, expand_tilde};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid pattern: {0}")]
    Regex(#[from] regex::Error),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let yaml_string = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(inner) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), inner),
        )),
        other => other,
    })
}

/// Parse and validate a config document held in memory.
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    let yaml_string = expand_env_vars(yaml)?;
    check_unexpanded_vars(&yaml_string)?;

    let mut config: Config = serde_yaml::from_str(&yaml_string)?;
    expand_paths(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Fails with the names of any `$env{VAR}` references that were not set
fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let re = regex::Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}")?;
    let mut unexpanded_vars: Vec<String> = yaml_string
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .flat_map(|line| re.captures_iter(line))
        .map(|cap| cap[1].to_string())
        .collect();

    if unexpanded_vars.is_empty() {
        return Ok(());
    }

    unexpanded_vars.sort();
    unexpanded_vars.dedup();

    let error_msg = if unexpanded_vars.len() == 1 {
        format!(
            "Environment variable $env{{{0}}} is not set.\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variable: export {0}=...\n\
             2. Replace $env{{{0}}} in the config file with the actual value",
            unexpanded_vars[0]
        )
    } else {
        format!(
            "Environment variables are not set: {}\n\
             \n\
             Set them before starting, or replace the references in the config file",
            unexpanded_vars.join(", ")
        )
    };

    Err(ConfigError::Validation(error_msg))
}

fn expand_paths(config: &mut Config) {
    config.workers.tmp_dir = expand_tilde(&config.workers.tmp_dir);

    if let CheckpointStorageConfig::Disk { path } = &mut config.checkpoint.storage {
        *path = expand_tilde(path);
    }

    if let SinkConfig::File { path } = &mut config.sink {
        *path = expand_tilde(path);
    }
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.source.zone_tag.trim().is_empty() {
        errors.push("source.zone_tag must not be empty".to_string());
    }

    if !config.source.api_base.starts_with("http://")
        && !config.source.api_base.starts_with("https://")
    {
        errors.push(format!(
            "source.api_base '{}' must be an http(s) URL",
            config.source.api_base
        ));
    }

    match &config.source.auth {
        AuthConfig::ApiKey { api_key, email } => {
            if api_key.is_empty() || email.is_empty() {
                errors.push("source.auth: api_key and email must both be set".to_string());
            }
        }
        AuthConfig::ServiceKey { service_key } => {
            if service_key.is_empty() {
                errors.push("source.auth.service_key must not be empty".to_string());
            }
        }
    }

    if config.schedule.max_segment.as_secs() == 0 {
        errors.push("schedule.max_segment must be at least one second".to_string());
    }

    if config.schedule.tick_timeout.is_some_and(|t| t.is_zero()) {
        errors.push("schedule.tick_timeout must be greater than zero when set".to_string());
    }

    for (name, value) in [
        ("workers.download", config.workers.download),
        ("workers.processing", config.workers.processing),
        ("workers.output_buffer", config.workers.output_buffer),
    ] {
        if value == 0 {
            errors.push(format!("{name} must be at least 1"));
        }
    }

    if config.checkpoint.name.is_empty() {
        errors.push("checkpoint.name must not be empty".to_string());
    }

    if let CheckpointStorageConfig::S3(s3) = &config.checkpoint.storage {
        if s3.bucket.is_empty() {
            errors.push("checkpoint.storage.bucket must not be empty".to_string());
        }
        if s3.access_key.is_empty() || s3.secret_key.is_empty() {
            errors.push(
                "checkpoint.storage: s3 requires both access_key and secret_key".to_string(),
            );
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}
