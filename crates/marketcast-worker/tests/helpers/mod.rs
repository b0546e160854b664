//! Test helpers: an upload pipeline wired to in-memory stores and cache.
//!
//! Run with `cargo test -p marketcast-worker`.
#![allow(dead_code)]

pub mod fixtures;
pub mod storage;

use marketcast_core::{ConversionQuality, RegulationLimits};
use marketcast_db::InMemoryUploadEventCache;
use marketcast_processing::{Converter, RegulationCatalog};
use marketcast_storage::ObjectStores;
use marketcast_worker::{Dispatcher, UploadPipeline};
use std::sync::Arc;

pub use storage::{Gate, MemoryStorage};

pub const REFERENCE_DOMAIN: &str = "https://assets.example.com";

pub struct HarnessOptions {
    pub concurrency: usize,
    pub revalidate_succeeded: bool,
    pub limits: RegulationLimits,
    /// Hold metadata lookups on the temporary store until `Harness::gate`
    /// is opened.
    pub gated: bool,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            revalidate_succeeded: false,
            limits: RegulationLimits::default(),
            gated: false,
        }
    }
}

pub struct Harness {
    pub temporary: Arc<MemoryStorage>,
    pub permanent: Arc<MemoryStorage>,
    pub cache: Arc<InMemoryUploadEventCache>,
    pub pipeline: Arc<UploadPipeline>,
    pub dispatcher: Dispatcher,
    pub gate: Option<Gate>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_options(HarnessOptions::default())
    }

    pub fn with_options(options: HarnessOptions) -> Self {
        let (temporary, gate) = if options.gated {
            let (storage, gate) = MemoryStorage::gated("http://landing.local");
            (storage, Some(gate))
        } else {
            (MemoryStorage::new("http://landing.local"), None)
        };
        let temporary = Arc::new(temporary);
        let permanent = Arc::new(MemoryStorage::new("http://assets.local"));
        let cache = Arc::new(InMemoryUploadEventCache::default());

        let stores = ObjectStores::new(
            temporary.clone(),
            permanent.clone(),
            Some(REFERENCE_DOMAIN.to_string()),
        );
        let converter = Converter::new(stores.clone(), ConversionQuality::default());
        let catalog = Arc::new(RegulationCatalog::marketplace(&options.limits));

        let pipeline = Arc::new(UploadPipeline::new(
            cache.clone(),
            stores,
            catalog,
            converter,
            options.revalidate_succeeded,
        ));
        let dispatcher = Dispatcher::new(pipeline.clone(), options.concurrency);

        Self {
            temporary,
            permanent,
            cache,
            pipeline,
            dispatcher,
            gate,
        }
    }

    /// Land an object in the temporary store.
    pub fn land(&self, key: &str, data: Vec<u8>, content_type: &str) {
        self.temporary.put(key, data, content_type);
    }

    pub fn reference_url(key: &str) -> String {
        format!("{}/{}", REFERENCE_DOMAIN, key)
    }
}
