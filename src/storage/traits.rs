use async_trait::async_trait;
use std::path::PathBuf;

/// Backend that holds the serialized checkpoint object.
///
/// Implementations move opaque bytes; encoding lives in
/// [`CheckpointStore`](super::checkpoint::CheckpointStore).
#[async_trait]
pub trait Storage: Send + Sync {
    /// Human-readable location used in log lines (`/var/lib/x.state`, `s3://b/k`)
    fn location(&self) -> String;

    /// `Ok(None)` when no checkpoint has been written yet.
    async fn read_checkpoint(&self) -> Result<Option<Vec<u8>>, StorageError>;

    /// Replace the stored checkpoint. Must not leave a partially written object.
    async fn write_checkpoint(&self, bytes: &[u8]) -> Result<(), StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("object storage error: {0}")]
    ObjectStore(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
