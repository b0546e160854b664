//! Shared key helpers for storage backends.

use crate::{StorageError, StorageResult};

/// Reject keys that could escape a store's root or are empty.
pub fn validate_key(storage_key: &str) -> StorageResult<()> {
    if storage_key.is_empty() {
        return Err(StorageError::InvalidKey("Storage key is empty".to_string()));
    }
    if storage_key.contains("..") || storage_key.starts_with('/') {
        return Err(StorageError::InvalidKey(
            "Storage key contains invalid characters".to_string(),
        ));
    }
    Ok(())
}

/// Replace (or append) the extension of the last path segment.
///
/// `product-image/7/photo.jpeg` with `webp` becomes `product-image/7/photo.webp`.
pub fn with_extension(storage_key: &str, extension: &str) -> String {
    let (dir, file) = match storage_key.rfind('/') {
        Some(idx) => storage_key.split_at(idx + 1),
        None => ("", storage_key),
    };
    let stem = match file.rfind('.') {
        Some(0) | None => file,
        Some(idx) => &file[..idx],
    };
    format!("{}{}.{}", dir, stem, extension)
}

/// Lowercase extension of the last path segment, if any.
pub fn extension(storage_key: &str) -> Option<String> {
    let file = storage_key.rsplit('/').next()?;
    match file.rfind('.') {
        Some(0) | None => None,
        Some(idx) => Some(file[idx + 1..].to_lowercase()),
    }
}

/// Content type inferred from a key's extension, for backends that keep no
/// per-object metadata.
pub fn content_type_for_key(storage_key: &str) -> &'static str {
    match extension(storage_key).as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("avif") => "image/avif",
        Some("heic") => "image/heic",
        Some("bmp") => "image/bmp",
        Some("svg") => "image/svg+xml",
        Some("mp4") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        Some("m4v") => "video/x-m4v",
        Some("mkv") => "video/x-matroska",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}
