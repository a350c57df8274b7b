use crate::error::UploaderError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

/// Resolves recorder paths and handles file removal for the uploader
#[derive(Debug, Clone)]
pub struct FileStorage {
    base_path: Arc<PathBuf>,
}

impl FileStorage {
    /// Create a new file storage with the given base path
    pub fn new(path: String) -> Self {
        let base_path = PathBuf::from(path);
        Self {
            base_path: Arc::new(base_path),
        }
    }

    /// Absolute path of a file the recorder reported relative to its root
    pub fn resolve(&self, relative_path: &str) -> PathBuf {
        self.base_path
            .join(relative_path.trim_start_matches(['/', '\\']))
    }

    /// Fresh, uniquely named merge target next to the first source file
    pub fn merge_target(&self, first_relative_path: &str) -> PathBuf {
        let first = self.resolve(first_relative_path);
        let dir = first
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.base_path.to_path_buf());

        dir.join(format!("{}.flv", Uuid::new_v4().simple()))
    }

    /// Delete a file
    pub async fn remove_file(&self, path: &Path) -> Result<(), UploaderError> {
        tokio::fs::remove_file(path).await.map_err(|e| {
            error!("Failed to delete file {}: {}", path.display(), e);
            UploaderError::StorageError(format!("Failed to delete file: {}", e))
        })?;

        debug!("Deleted file: {}", path.display());
        Ok(())
    }
}
