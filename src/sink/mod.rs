use crate::config::types::SinkConfig;
use crate::normalize::NormalizedEvent;
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write event: {0}")]
    Io(#[from] std::io::Error),
}

/// Downstream consumer of normalized events.
#[async_trait]
pub trait Sink: Send {
    async fn publish(&mut self, event: &NormalizedEvent) -> Result<(), SinkError>;

    /// Push buffered events out; called once per tick after the last event.
    async fn flush(&mut self) -> Result<(), SinkError>;
}

/// Writes one JSON object per line.
pub struct JsonLinesSink<W> {
    writer: BufWriter<W>,
}

impl<W: AsyncWrite + Send + Unpin> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl JsonLinesSink<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl JsonLinesSink<tokio::fs::File> {
    /// Append to `path`, creating it and its parent directory if needed
    pub async fn append(path: &Path) -> Result<Self, SinkError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self::new(file))
    }
}

#[async_trait]
impl<W: AsyncWrite + Send + Unpin> Sink for JsonLinesSink<W> {
    async fn publish(&mut self, event: &NormalizedEvent) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush().await?;
        Ok(())
    }
}

pub async fn from_config(config: &SinkConfig) -> Result<Box<dyn Sink>, SinkError> {
    match config {
        SinkConfig::Stdout => Ok(Box::new(JsonLinesSink::stdout())),
        SinkConfig::File { path } => {
            tracing::info!(path = %path.display(), "Writing events to file");
            Ok(Box::new(JsonLinesSink::append(path).await?))
        }
    }
}
