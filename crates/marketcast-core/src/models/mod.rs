//! Data models for the upload pipeline
//!
//! `upload_event` holds the idempotency record, `regulation` the static
//! per-category upload policy.

mod regulation;
mod upload_event;

pub use regulation::{AssetCategory, Conversion, Regulation};
pub use upload_event::{Outcome, Stage, UploadEvent, UploadStatus};
