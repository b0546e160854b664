//! Batch fan-out over a bounded worker pool.

use std::sync::Arc;

use marketcast_core::{Classify, Stage};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::error::{FailureCause, PipelineError};
use crate::notification::{self, ObjectRecord};
use crate::pipeline::{RecordOutcome, UploadPipeline};

/// Counts for one batch invocation.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub records: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Bodies or records that could not be parsed.
    pub malformed: usize,
    /// Test events and non-creation records.
    pub ignored: usize,
    /// Records never started because the batch was already failing.
    pub not_started: usize,
    /// Records that hit a retryable error.
    pub retryable: usize,
}

impl BatchReport {
    fn absorb(&mut self, outcome: &RecordOutcome) {
        match outcome {
            RecordOutcome::Succeeded { .. } => self.succeeded += 1,
            RecordOutcome::Skipped { .. } => self.skipped += 1,
            RecordOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

/// Runs the records of a batch through the pipeline, at most `concurrency`
/// at a time.
///
/// Terminal failures are absorbed. The first retryable failure stops new
/// records from starting; records already in flight run to completion and the
/// batch returns that failure so the whole batch is redelivered.
#[derive(Clone)]
pub struct Dispatcher {
    pipeline: Arc<UploadPipeline>,
    concurrency: usize,
}

impl Dispatcher {
    pub fn new(pipeline: Arc<UploadPipeline>, concurrency: usize) -> Self {
        Self {
            pipeline,
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Parse queue message bodies and dispatch every record they carry.
    ///
    /// Unparseable bodies are logged and counted, never retried.
    pub async fn dispatch(
        &self,
        bodies: &[String],
        cancel: &CancellationToken,
    ) -> Result<BatchReport, PipelineError> {
        let mut report = BatchReport::default();
        let mut records = Vec::new();

        for body in bodies {
            match notification::parse(body) {
                Ok(envelope) => {
                    report.malformed += envelope.malformed;
                    report.ignored += envelope.ignored;
                    records.extend(envelope.records);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed notification");
                    report.malformed += 1;
                }
            }
        }

        self.dispatch_records(records, cancel, report).await
    }

    /// Dispatch already parsed records, adding to `report`.
    pub async fn dispatch_records(
        &self,
        records: Vec<ObjectRecord>,
        cancel: &CancellationToken,
        mut report: BatchReport,
    ) -> Result<BatchReport, PipelineError> {
        let start = std::time::Instant::now();
        let total = records.len();
        report.records += total;

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        // Set by a worker before it releases its slot, so the loop below sees
        // it as soon as it can start the next record.
        let stop = CancellationToken::new();
        let mut tasks = JoinSet::new();
        let mut first_error: Option<PipelineError> = None;
        let mut started = 0;

        for record in records {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    first_error.get_or_insert_with(|| {
                        PipelineError::new(&record.key, Stage::Received, FailureCause::Cancelled)
                    });
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            if stop.is_cancelled() {
                break;
            }

            let pipeline = self.pipeline.clone();
            let cancel = cancel.clone();
            let stop = stop.clone();
            tasks.spawn(async move {
                let result = pipeline.process(&record, &cancel).await;
                if matches!(&result, Err(e) if e.is_retryable()) {
                    stop.cancel();
                }
                drop(permit);
                result
            });
            started += 1;
        }

        while let Some(joined) = tasks.join_next().await {
            Self::collect(joined, &mut report, &mut first_error);
        }
        report.not_started = total - started;

        tracing::info!(
            records = report.records,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            malformed = report.malformed,
            ignored = report.ignored,
            retryable = report.retryable,
            not_started = report.not_started,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Batch dispatched"
        );

        match first_error {
            Some(err) => {
                tracing::warn!(
                    key = %err.key,
                    stage = %err.stage,
                    error = %err.cause,
                    "Batch failed with retryable error"
                );
                Err(err)
            }
            None => Ok(report),
        }
    }

    fn collect(
        joined: Result<Result<RecordOutcome, PipelineError>, JoinError>,
        report: &mut BatchReport,
        first_error: &mut Option<PipelineError>,
    ) {
        let result = joined.unwrap_or_else(|e| {
            tracing::error!(error = %e, "Worker task panicked");
            Err(PipelineError::new(
                "<unknown>",
                Stage::Received,
                FailureCause::Task(e.to_string()),
            ))
        });

        match result {
            Ok(outcome) => report.absorb(&outcome),
            Err(err) if err.is_retryable() => {
                report.retryable += 1;
                first_error.get_or_insert(err);
            }
            Err(err) => {
                tracing::warn!(
                    key = %err.key,
                    stage = %err.stage,
                    error = %err.cause,
                    "Terminal failure could not be recorded"
                );
                report.failed += 1;
            }
        }
    }
}
