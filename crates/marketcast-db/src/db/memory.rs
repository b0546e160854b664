use async_trait::async_trait;
use marketcast_core::UploadEvent;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::{CacheResult, UploadEventCache};

struct Entry {
    event: UploadEvent,
    stored_at: Instant,
}

/// Process-local idempotency cache.
///
/// Records expire `ttl` after their last write; expired records read as
/// `Unknown`. The lock is never held across an await point.
pub struct InMemoryUploadEventCache {
    entries: RwLock<HashMap<String, Entry>>,
    ttl: Option<Duration>,
}

impl InMemoryUploadEventCache {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    fn is_expired(&self, entry: &Entry) -> bool {
        self.ttl
            .is_some_and(|ttl| entry.stored_at.elapsed() >= ttl)
    }

    /// Drop expired records and return how many were removed.
    pub async fn cleanup_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !self.is_expired(entry));
        let removed = before - entries.len();
        if removed > 0 {
            tracing::debug!(removed, "Expired upload events removed");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for InMemoryUploadEventCache {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl UploadEventCache for InMemoryUploadEventCache {
    async fn get(&self, key: &str) -> CacheResult<UploadEvent> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if !self.is_expired(entry) => Ok(entry.event.clone()),
            _ => Ok(UploadEvent::new(key)),
        }
    }

    async fn insert(&self, key: &str, event: &UploadEvent) -> CacheResult<()> {
        let mut entries = self.entries.write().await;
        let mut event = event.clone();
        event.key = key.to_string();
        if let Some(existing) = entries.get(key) {
            if !self.is_expired(existing) {
                event.created_at = existing.event.created_at;
            }
        }
        entries.insert(
            key.to_string(),
            Entry {
                event,
                stored_at: Instant::now(),
            },
        );
        Ok(())
    }
}
