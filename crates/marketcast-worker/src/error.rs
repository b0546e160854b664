use marketcast_core::{Classify, Disposition, Stage};
use marketcast_db::CacheError;
use marketcast_processing::{ConvertError, RegulationError};
use marketcast_storage::StorageError;
use thiserror::Error;

/// Why a record stopped.
#[derive(Debug, Error)]
pub enum FailureCause {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Regulation(#[from] RegulationError),

    #[error(transparent)]
    Convert(#[from] ConvertError),

    /// The invocation was cancelled or ran out of time.
    #[error("Cancelled before completion")]
    Cancelled,

    /// The worker task died without producing a result.
    #[error("Worker task failed: {0}")]
    Task(String),
}

impl Classify for FailureCause {
    fn disposition(&self) -> Disposition {
        match self {
            FailureCause::Cache(e) => e.disposition(),
            FailureCause::Storage(e) => e.disposition(),
            FailureCause::Regulation(e) => e.disposition(),
            FailureCause::Convert(e) => e.disposition(),
            FailureCause::Cancelled | FailureCause::Task(_) => Disposition::Retryable,
        }
    }
}

/// A record that could not be processed, with the last stage it completed.
#[derive(Debug, Error)]
#[error("{key}: {cause} (after stage {stage})")]
pub struct PipelineError {
    pub key: String,
    pub stage: Stage,
    #[source]
    pub cause: FailureCause,
}

impl PipelineError {
    pub fn new(key: impl Into<String>, stage: Stage, cause: impl Into<FailureCause>) -> Self {
        Self {
            key: key.into(),
            stage,
            cause: cause.into(),
        }
    }
}

impl Classify for PipelineError {
    fn disposition(&self) -> Disposition {
        self.cause.disposition()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disposition_follows_cause() {
        let err = PipelineError::new(
            "video/1/a.mp4",
            Stage::CacheChecked,
            StorageError::BackendError("connection reset".into()),
        );
        assert_eq!(err.disposition(), Disposition::Retryable);

        let err = PipelineError::new(
            "video/1/a.mp4",
            Stage::MetadataFetched,
            RegulationError::EmptyContent,
        );
        assert_eq!(err.disposition(), Disposition::Terminal);

        let err = PipelineError::new("video/1/a.mp4", Stage::Validated, FailureCause::Cancelled);
        assert!(err.is_retryable());
        assert_eq!(
            err.to_string(),
            "video/1/a.mp4: Cancelled before completion (after stage validated)"
        );
    }
}
