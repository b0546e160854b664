//! Marketcast Storage Library
//!
//! Object store adapter used by the upload pipeline. Two logical stores are
//! involved: a temporary landing store (write-once, short-lived) that clients
//! upload into, and a permanent store (long-lived, CDN-fronted) that validated
//! objects are promoted to.
//!
//! # Key format
//!
//! Keys are `{category}/{owner_id}/{filename}` and identical in both stores,
//! except for converted objects whose extension follows the target format.
//! Keys must not contain `..` or a leading `/`.

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod stores;
pub mod traits;

// Re-export commonly used types
pub use factory::{create_object_stores, create_storage};
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
pub use marketcast_core::StorageBackend;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use stores::ObjectStores;
pub use traits::{ByteStream, ObjectMetadata, Storage, StorageError, StorageResult};
