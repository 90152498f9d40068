use crate::config::parse::{load_config, ConfigError};
use crate::config::types::Config;
use crate::normalize::CloudflareNormalizer;
use crate::pipeline::{Orchestrator, PipelineError, PipelineSettings};
use crate::sink::{self, SinkError};
use crate::source::{CloudflareSource, SourceError};
use crate::storage::{self, CheckpointError, CheckpointStore};
use crate::window::WindowPlanner;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config not found")]
    ConfigNotFound,

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("log source error: {0}")]
    Source(#[from] SourceError),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

pub(crate) fn require_config_path(config_path: Option<PathBuf>) -> Result<PathBuf, RunError> {
    config_path.ok_or_else(|| {
        eprintln!("Error: config not found");
        eprintln!("Searched locations:");
        eprintln!("  ~/.config/logpull/config.yml");
        eprintln!("  /etc/logpull/config.yml");
        eprintln!("\nUse --config <path> to specify a config file, or run 'logpull config init' to generate one.");
        RunError::ConfigNotFound
    })
}

/// Run the pipeline until Ctrl+C, or for a single tick when `once` is set.
pub async fn run(config_path: Option<PathBuf>, once: bool) -> Result<(), RunError> {
    let config_path = require_config_path(config_path)?;
    let config = load(&config_path)?;

    let shutdown_tx = Arc::new(watch::channel(false).0);
    let mut orchestrator = build_orchestrator(&config, shutdown_tx.subscribe()).await?;

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received, finishing in-flight units");
                signal_tx.send_replace(true);
            }
            Err(e) => error!(error = %e, "Could not listen for shutdown signal"),
        }
    });

    if once {
        let report = orchestrator.run_once().await?;
        info!(
            window = %report.window,
            events = report.events,
            saved = report.saved,
            "Single tick complete"
        );
    } else {
        info!(zone = %config.source.zone_tag, "Pipeline started, press Ctrl+C to shutdown");
        orchestrator.run().await?;
        info!("Pipeline shutdown complete");
    }

    drop(shutdown_tx);
    Ok(())
}

pub(crate) fn load(config_path: &Path) -> Result<Config, RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    Ok(load_config(config_path)?)
}

/// Wire the configured backend, source and sink into an orchestrator.
pub async fn build_orchestrator(
    config: &Config,
    shutdown: watch::Receiver<bool>,
) -> Result<Orchestrator, RunError> {
    let storage = storage::from_config(&config.checkpoint, &config.source.zone_tag);
    info!(location = %storage.location(), "Opening checkpoint");
    let checkpoint = Arc::new(CheckpointStore::open(storage).await?);

    let source = Arc::new(CloudflareSource::new(&config.source)?);
    let sink = sink::from_config(&config.sink).await?;
    let planner = WindowPlanner::new(config.schedule.period, config.schedule.safety_lag);

    Ok(Orchestrator::new(
        PipelineSettings::from_config(config),
        planner,
        checkpoint,
        source,
        Arc::new(CloudflareNormalizer::new()),
        sink,
        shutdown,
    ))
}
