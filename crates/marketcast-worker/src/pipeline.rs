//! Per-record processing
//!
//! One object key walks `Received -> CacheChecked -> MetadataFetched ->
//! Validated -> (Converted) -> Promoted -> Recorded`. Terminal failures are
//! recorded as `Failed` and reported as handled; retryable failures leave the
//! cache untouched and are returned so the queue redelivers.

use std::future::Future;
use std::sync::Arc;

use marketcast_core::{Classify, Outcome, Stage, UploadEvent};
use marketcast_db::UploadEventCache;
use marketcast_processing::{Converter, RegulationCatalog};
use marketcast_storage::ObjectStores;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{FailureCause, PipelineError};
use crate::notification::ObjectRecord;

/// Result of a record that was handled, successfully or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecordOutcome {
    Succeeded {
        key: String,
        reference_url: String,
    },
    /// The key was already recorded as succeeded; nothing was done.
    Skipped {
        key: String,
        reference_url: Option<String>,
    },
    Failed {
        key: String,
        stage: Stage,
        reason: String,
    },
}

pub struct UploadPipeline {
    cache: Arc<dyn UploadEventCache>,
    stores: ObjectStores,
    catalog: Arc<RegulationCatalog>,
    converter: Converter,
    revalidate_succeeded: bool,
}

impl UploadPipeline {
    pub fn new(
        cache: Arc<dyn UploadEventCache>,
        stores: ObjectStores,
        catalog: Arc<RegulationCatalog>,
        converter: Converter,
        revalidate_succeeded: bool,
    ) -> Self {
        Self {
            cache,
            stores,
            catalog,
            converter,
            revalidate_succeeded,
        }
    }

    /// Process one landed object.
    ///
    /// Returns `Ok` for every record the queue should not redeliver, including
    /// terminal failures. Every network call aborts when `cancel` fires.
    #[tracing::instrument(skip(self, record, cancel), fields(key = %record.key))]
    pub async fn process(
        &self,
        record: &ObjectRecord,
        cancel: &CancellationToken,
    ) -> Result<RecordOutcome, PipelineError> {
        let key = record.key.as_str();

        let mut event = match cancellable(cancel, self.cache.get(key)).await {
            Ok(event) => event,
            Err(cause) if cause.is_retryable() => {
                return Err(PipelineError::new(key, Stage::Received, cause));
            }
            Err(cause) => {
                tracing::warn!(error = %cause, "Unreadable cache record, processing as new");
                UploadEvent::new(key)
            }
        };

        if event.is_succeeded() && !self.revalidate_succeeded {
            tracing::info!(
                stage = %Stage::CacheChecked,
                reference_url = ?event.reference_url,
                "Key already succeeded, skipping"
            );
            return Ok(RecordOutcome::Skipped {
                key: key.to_string(),
                reference_url: event.reference_url,
            });
        }

        let result = self.run(&event, cancel).await;
        self.finalize(&mut event, result, cancel).await
    }

    /// Steps after the idempotency check. Errors carry the last stage completed.
    async fn run(
        &self,
        event: &UploadEvent,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        let key = event.key.as_str();
        let mut stage = Stage::CacheChecked;
        let fail = |stage: Stage, cause: FailureCause| PipelineError::new(key, stage, cause);

        let metadata = cancellable(cancel, self.stores.temporary.head(key))
            .await
            .map_err(|c| fail(stage, c))?;
        stage = Stage::MetadataFetched;
        tracing::debug!(
            content_type = %metadata.content_type,
            content_length = metadata.content_length,
            "Metadata fetched"
        );

        let regulation = self
            .catalog
            .resolve(key)
            .map_err(|e| fail(stage, e.into()))?;
        self.catalog
            .validate(regulation, &metadata.content_type, metadata.content_length)
            .map_err(|e| fail(stage, e.into()))?;
        stage = Stage::Validated;

        if regulation.requires_conversion() {
            let converted = cancellable(cancel, self.converter.convert(regulation, event))
                .await
                .map_err(|c| fail(stage, c))?;
            if let Some(converted) = converted {
                // The converter wrote the result to the permanent store.
                tracing::debug!(
                    stage = %Stage::Converted,
                    promoted_key = %converted.key,
                    content_type = %converted.content_type,
                    "Converted object promoted"
                );
                return Ok(converted.reference_url);
            }
        }

        let reference_url = cancellable(
            cancel,
            self.stores.promote(key, key, &metadata.content_type),
        )
        .await
        .map_err(|c| fail(stage, c))?;

        Ok(reference_url)
    }

    /// Record the outcome of `result` once a terminal status was reached, and
    /// map it to what the dispatcher sees.
    async fn finalize(
        &self,
        event: &mut UploadEvent,
        result: Result<String, PipelineError>,
        cancel: &CancellationToken,
    ) -> Result<RecordOutcome, PipelineError> {
        let (outcome, result, stage) = match result {
            Ok(reference_url) => (
                RecordOutcome::Succeeded {
                    key: event.key.clone(),
                    reference_url: reference_url.clone(),
                },
                Outcome::Succeeded { reference_url },
                Stage::Promoted,
            ),
            Err(err) if err.is_retryable() => {
                tracing::warn!(
                    stage = %err.stage,
                    error = %err.cause,
                    "Retryable failure, leaving record for redelivery"
                );
                return Err(err);
            }
            Err(err) => {
                tracing::warn!(
                    stage = %err.stage,
                    error = %err.cause,
                    "Terminal failure, recording as failed"
                );
                let reason = err.cause.to_string();
                (
                    RecordOutcome::Failed {
                        key: event.key.clone(),
                        stage: err.stage,
                        reason: reason.clone(),
                    },
                    Outcome::Failed {
                        stage: err.stage,
                        reason,
                    },
                    err.stage,
                )
            }
        };

        event.set_result(result);

        let key = event.key.clone();
        cancellable(cancel, self.cache.insert(&key, event))
            .await
            .map_err(|cause| {
                tracing::error!(stage = %stage, error = %cause, "Failed to record outcome");
                PipelineError::new(&key, stage, cause)
            })?;

        tracing::info!(
            stage = %Stage::Recorded,
            status = %event.status,
            "Outcome recorded"
        );

        Ok(outcome)
    }
}

/// Run `fut` unless `cancel` fires first.
async fn cancellable<T, E>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, E>>,
) -> Result<T, FailureCause>
where
    E: Into<FailureCause>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FailureCause::Cancelled),
        result = fut => result.map_err(Into::into),
    }
}
