use super::traits::{Storage, StorageError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Checkpoint kept as a JSON file on local disk.
///
/// Writes go to a sibling `.tmp` file that is synced and then renamed over
/// the real one, so a crash mid-save leaves the previous checkpoint intact.
pub struct DiskStorage {
    path: PathBuf,
}

impl DiskStorage {
    /// `dir/{name}-{zone}.state`
    pub fn new(dir: &Path, name: &str, zone: &str) -> Self {
        Self {
            path: dir.join(format!("{name}-{zone}.state")),
        }
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl Storage for DiskStorage {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    async fn read_checkpoint(&self) -> Result<Option<Vec<u8>>, StorageError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(&self.path, e)),
        }
    }

    async fn write_checkpoint(&self, bytes: &[u8]) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(parent, e))?;
        }

        let tmp = self.tmp_path();
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| StorageError::io(&tmp, e))?;
        file.write_all(bytes)
            .await
            .map_err(|e| StorageError::io(&tmp, e))?;
        file.sync_all()
            .await
            .map_err(|e| StorageError::io(&tmp, e))?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StorageError::io(&self.path, e))
    }
}
