use flv::FlvError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UploaderError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Request error: {0}")]
    RequestError(String),
    #[error("Upload error: {0}")]
    UploadError(String),
    #[error("Orphan event: {0}")]
    OrphanEvent(String),
    #[error("Merge error: {0}")]
    Merge(#[from] FlvError),
}
