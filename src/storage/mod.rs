pub mod checkpoint;
pub mod disk;
pub mod s3;
pub mod traits;

pub use checkpoint::{read_stored, Checkpoint, CheckpointError, CheckpointStore};
pub use disk::DiskStorage;
pub use s3::S3Storage;
pub use traits::{Storage, StorageError};

use crate::config::types::{CheckpointConfig, CheckpointStorageConfig};
use std::sync::Arc;

/// Build the configured checkpoint backend for one zone.
pub fn from_config(config: &CheckpointConfig, zone: &str) -> Arc<dyn Storage> {
    match &config.storage {
        CheckpointStorageConfig::Disk { path } => {
            Arc::new(DiskStorage::new(path, &config.name, zone))
        }
        CheckpointStorageConfig::S3(s3) => Arc::new(S3Storage::new(s3, &config.name, zone)),
    }
}
