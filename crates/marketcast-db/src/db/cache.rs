use async_trait::async_trait;
use marketcast_core::{CacheBackend, CacheConfig, Classify, Disposition, UploadEvent};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::{InMemoryUploadEventCache, PgUploadEventCache};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored row that cannot be mapped back to an `UploadEvent`.
    #[error("Invalid upload event record for key {key}: {reason}")]
    InvalidRecord { key: String, reason: String },
}

impl Classify for CacheError {
    /// Connectivity problems are transient. A corrupt row will not heal on
    /// redelivery; the terminal path overwrites it with a fresh outcome.
    fn disposition(&self) -> Disposition {
        match self {
            CacheError::InvalidRecord { .. } => Disposition::Terminal,
            CacheError::Database(_) | CacheError::Migration(_) => Disposition::Retryable,
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Key-value store of upload outcomes, keyed by object path.
#[async_trait]
pub trait UploadEventCache: Send + Sync {
    /// Look up the record for `key`. A key that was never recorded yields a
    /// fresh `Unknown` record, not an error.
    async fn get(&self, key: &str) -> CacheResult<UploadEvent>;

    /// Upsert the record for `key`. Last write wins; the first `created_at`
    /// is kept.
    async fn insert(&self, key: &str, event: &UploadEvent) -> CacheResult<()>;
}

/// Factory function to create the cache selected by configuration
pub async fn create_upload_event_cache(
    config: &CacheConfig,
) -> Result<Arc<dyn UploadEventCache>, anyhow::Error> {
    match config.backend {
        CacheBackend::Postgres => {
            tracing::info!("Initializing PostgreSQL upload event cache");
            let cache = PgUploadEventCache::connect(config).await?;
            Ok(Arc::new(cache))
        }
        CacheBackend::Memory => {
            tracing::info!(
                ttl_secs = ?config.ttl_secs,
                "Initializing in-memory upload event cache"
            );
            let cache = InMemoryUploadEventCache::new(config.ttl_secs.map(Duration::from_secs));
            Ok(Arc::new(cache))
        }
    }
}
