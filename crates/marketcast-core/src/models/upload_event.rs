use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    /// No worker has recorded an outcome for this key yet.
    #[default]
    Unknown,
    Succeeded,
    Failed,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, UploadStatus::Unknown)
    }
}

impl Display for UploadStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            UploadStatus::Unknown => write!(f, "unknown"),
            UploadStatus::Succeeded => write!(f, "succeeded"),
            UploadStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for UploadStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(UploadStatus::Unknown),
            "succeeded" => Ok(UploadStatus::Succeeded),
            "failed" => Ok(UploadStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid upload status: {}", s)),
        }
    }
}

/// Processing stages of one object key, in the order a worker walks them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    CacheChecked,
    MetadataFetched,
    Validated,
    Converted,
    Promoted,
    Recorded,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Stage::Received => write!(f, "received"),
            Stage::CacheChecked => write!(f, "cache_checked"),
            Stage::MetadataFetched => write!(f, "metadata_fetched"),
            Stage::Validated => write!(f, "validated"),
            Stage::Converted => write!(f, "converted"),
            Stage::Promoted => write!(f, "promoted"),
            Stage::Recorded => write!(f, "recorded"),
        }
    }
}

impl FromStr for Stage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(Stage::Received),
            "cache_checked" => Ok(Stage::CacheChecked),
            "metadata_fetched" => Ok(Stage::MetadataFetched),
            "validated" => Ok(Stage::Validated),
            "converted" => Ok(Stage::Converted),
            "promoted" => Ok(Stage::Promoted),
            "recorded" => Ok(Stage::Recorded),
            _ => Err(anyhow::anyhow!("Invalid stage: {}", s)),
        }
    }
}

/// Terminal result of one processing attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded {
        reference_url: String,
    },
    /// `stage` is the last stage the worker completed before the failure.
    Failed {
        stage: Stage,
        reason: String,
    },
}

/// The unit of work and the idempotency record, keyed by object path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadEvent {
    pub key: String,
    pub status: UploadStatus,
    /// Permanent-store location, only set when `status` is `Succeeded`.
    pub reference_url: Option<String>,
    pub failure_reason: Option<String>,
    pub stage: Option<Stage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadEvent {
    /// A fresh record with no outcome, as returned by the cache for unseen keys.
    pub fn new(key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            status: UploadStatus::Unknown,
            reference_url: None,
            failure_reason: None,
            stage: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == UploadStatus::Succeeded
    }

    /// Apply the outcome of the current processing attempt.
    ///
    /// Clears the fields that belong to the other outcome so a key that failed
    /// once and succeeded on a later delivery carries no stale reason.
    pub fn set_result(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Succeeded { reference_url } => {
                self.status = UploadStatus::Succeeded;
                self.reference_url = Some(reference_url);
                self.failure_reason = None;
                self.stage = Some(Stage::Recorded);
            }
            Outcome::Failed { stage, reason } => {
                self.status = UploadStatus::Failed;
                self.reference_url = None;
                self.failure_reason = Some(reason);
                self.stage = Some(stage);
            }
        }
        self.updated_at = Utc::now();
    }
}
