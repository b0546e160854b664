//! Storage abstraction trait
//!
//! This module defines the Storage trait that both object stores implement.

use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use marketcast_core::{Classify, Disposition};
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl Classify for StorageError {
    /// `NotFound` is retryable: the landing store is eventually consistent and
    /// can lag the notification that announced the object.
    fn disposition(&self) -> Disposition {
        match self {
            StorageError::InvalidKey(_) | StorageError::ConfigError(_) => Disposition::Terminal,
            _ => Disposition::Retryable,
        }
    }
}

impl From<StorageError> for std::io::Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::IoError(e) => e,
            StorageError::NotFound(key) => {
                std::io::Error::new(std::io::ErrorKind::NotFound, key)
            }
            other => std::io::Error::other(other.to_string()),
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Chunked object body.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// Metadata the pipeline validates before promoting an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// MIME type as stored, `application/octet-stream` when the store has none.
    pub content_type: String,
    pub content_length: u64,
}

/// Storage abstraction trait
///
/// Implemented by the S3 and local filesystem backends. Writes are atomic from
/// a reader's point of view: an object is either visible with its full content
/// or not visible at all.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Content type and length of an object. Fails with `NotFound` if absent.
    async fn head(&self, storage_key: &str) -> StorageResult<ObjectMetadata>;

    /// Download a file by its storage key
    async fn download(&self, storage_key: &str) -> StorageResult<Vec<u8>>;

    /// Download a file as a stream (for large files)
    async fn download_stream(&self, storage_key: &str) -> StorageResult<ByteStream>;

    /// Upload data to a specific storage key. Returns the public URL of the object.
    async fn upload_with_key(
        &self,
        storage_key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> StorageResult<String>;

    /// Upload from a reader until EOF, without buffering the whole object.
    /// Returns the public URL of the object.
    async fn upload_stream(
        &self,
        storage_key: &str,
        content_type: &str,
        reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
    ) -> StorageResult<String>;

    /// Public URL of a key in this store. Does not check existence.
    fn public_url(&self, storage_key: &str) -> String;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}
