//! Marketcast Core Library
//!
//! Domain models, configuration and error classification shared by every crate
//! of the upload validation and dispatch pipeline.

pub mod config;
pub mod disposition;
pub mod models;
pub mod storage_types;

// Re-export commonly used types
pub use config::{
    CacheBackend, CacheConfig, ConversionQuality, LogFormat, QueueConfig, RegulationLimits,
    StorageConfig, WorkerConfig,
};
pub use disposition::{Classify, Disposition};
pub use models::{AssetCategory, Conversion, Outcome, Regulation, Stage, UploadEvent, UploadStatus};
pub use storage_types::StorageBackend;
