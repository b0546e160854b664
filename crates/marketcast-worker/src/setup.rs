//! Wiring of the pipeline from configuration.

use std::sync::Arc;

use anyhow::{Context, Result};
use marketcast_core::WorkerConfig;
use marketcast_db::create_upload_event_cache;
use marketcast_processing::{Converter, RegulationCatalog};
use marketcast_storage::create_object_stores;

use crate::dispatcher::Dispatcher;
use crate::pipeline::UploadPipeline;

/// Build the dispatcher and everything it shares across records.
pub async fn build_dispatcher(config: &WorkerConfig) -> Result<Dispatcher> {
    let stores = create_object_stores(config)
        .await
        .context("Failed to initialize object stores")?;
    let cache = create_upload_event_cache(&config.cache)
        .await
        .context("Failed to initialize upload event cache")?;
    let catalog = Arc::new(RegulationCatalog::marketplace(&config.limits));
    let converter = Converter::new(stores.clone(), config.quality);

    let pipeline = UploadPipeline::new(
        cache,
        stores,
        catalog,
        converter,
        config.revalidate_succeeded,
    );

    tracing::info!(
        concurrency = config.concurrency,
        revalidate_succeeded = config.revalidate_succeeded,
        image_conversion = ?config.limits.image_conversion,
        "Upload pipeline ready"
    );

    Ok(Dispatcher::new(Arc::new(pipeline), config.concurrency))
}
