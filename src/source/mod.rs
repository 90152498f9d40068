pub mod cloudflare;
pub mod retry;

pub use cloudflare::CloudflareSource;
pub use retry::RetryPolicy;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Response body of one log request, possibly gzip-compressed.
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("provider returned no data")]
    NoData,

    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl SourceError {
    /// Whether another attempt at the same request could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NoData => false,
            Self::Status { status, .. } => status_is_retryable(*status),
            Self::Http(e) => e.status().map_or(true, |s| status_is_retryable(s.as_u16())),
            Self::Io(e) => e.kind() != std::io::ErrorKind::StorageFull,
        }
    }
}

fn status_is_retryable(status: u16) -> bool {
    !(400..500).contains(&status) || status == 408 || status == 429
}

/// Provider of raw request logs for a time range.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Fetch records with timestamps in `[start, end]` (Unix seconds, inclusive).
    async fn fetch(&self, zone: &str, start: i64, end: i64) -> Result<ByteStream, SourceError>;
}
