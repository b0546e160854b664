//! In-memory object store with fault injection and concurrency tracking.

use async_trait::async_trait;
use bytes::Bytes;
use marketcast_storage::{
    ByteStream, ObjectMetadata, Storage, StorageBackend, StorageError, StorageResult,
};
use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;

const CHUNK_SIZE: usize = 16 * 1024;

#[derive(Clone)]
struct StoredObject {
    data: Vec<u8>,
    content_type: String,
}

pub struct MemoryStorage {
    base_url: String,
    objects: Mutex<HashMap<String, StoredObject>>,
    /// Keys whose metadata lookup fails with a transient error.
    failing_heads: Mutex<HashSet<String>>,
    /// When set, metadata lookups wait until the gate is opened.
    gate: Option<watch::Receiver<bool>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    head_calls: AtomicUsize,
    uploads: AtomicUsize,
}

/// Decrements the in-flight counter when a call finishes or is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Holds gated metadata lookups until opened.
pub struct Gate(watch::Sender<bool>);

impl Gate {
    pub fn open(&self) {
        self.0.send_replace(true);
    }
}

impl MemoryStorage {
    pub fn new(base_url: &str) -> Self {
        Self::build(base_url, None)
    }

    /// A store whose metadata lookups block until the returned gate opens.
    pub fn gated(base_url: &str) -> (Self, Gate) {
        let (tx, rx) = watch::channel(false);
        (Self::build(base_url, Some(rx)), Gate(tx))
    }

    fn build(base_url: &str, gate: Option<watch::Receiver<bool>>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            objects: Mutex::new(HashMap::new()),
            failing_heads: Mutex::new(HashSet::new()),
            gate,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            head_calls: AtomicUsize::new(0),
            uploads: AtomicUsize::new(0),
        }
    }

    /// Store an object directly, without counting it as an upload.
    pub fn put(&self, key: &str, data: Vec<u8>, content_type: &str) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<(Vec<u8>, String)> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|o| (o.data.clone(), o.content_type.clone()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn fail_head(&self, key: &str) {
        self.failing_heads.lock().unwrap().insert(key.to_string());
    }

    pub fn heal_head(&self, key: &str) {
        self.failing_heads.lock().unwrap().remove(key);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Yield until at least `count` metadata lookups are in flight.
    pub async fn wait_for_in_flight(&self, count: usize) {
        while self.in_flight() < count {
            tokio::task::yield_now().await;
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn head_calls(&self) -> usize {
        self.head_calls.load(Ordering::SeqCst)
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(&self.in_flight)
    }

    fn store(&self, key: &str, data: Vec<u8>, content_type: &str) -> String {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.put(key, data, content_type);
        self.public_url(key)
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn head(&self, storage_key: &str) -> StorageResult<ObjectMetadata> {
        let _guard = self.enter();
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let mut gate = gate.clone();
            let _ = gate.wait_for(|open| *open).await;
        }

        if self.failing_heads.lock().unwrap().contains(storage_key) {
            return Err(StorageError::BackendError(format!(
                "connection reset while reading {}",
                storage_key
            )));
        }

        self.objects
            .lock()
            .unwrap()
            .get(storage_key)
            .map(|o| ObjectMetadata {
                content_type: o.content_type.clone(),
                content_length: o.data.len() as u64,
            })
            .ok_or_else(|| StorageError::NotFound(storage_key.to_string()))
    }

    async fn download(&self, storage_key: &str) -> StorageResult<Vec<u8>> {
        self.get(storage_key)
            .map(|(data, _)| data)
            .ok_or_else(|| StorageError::NotFound(storage_key.to_string()))
    }

    async fn download_stream(&self, storage_key: &str) -> StorageResult<ByteStream> {
        let data = self.download(storage_key).await?;
        let chunks: Vec<StorageResult<Bytes>> = data
            .chunks(CHUNK_SIZE)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn upload_with_key(
        &self,
        storage_key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> StorageResult<String> {
        Ok(self.store(storage_key, data, content_type))
    }

    async fn upload_stream(
        &self,
        storage_key: &str,
        content_type: &str,
        mut reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
    ) -> StorageResult<String> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;
        Ok(self.store(storage_key, data, content_type))
    }

    fn public_url(&self, storage_key: &str) -> String {
        format!("{}/{}", self.base_url, storage_key)
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}
