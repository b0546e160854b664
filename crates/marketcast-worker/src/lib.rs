//! Marketcast upload worker
//!
//! Receives notifications of objects landed in the temporary store, validates
//! them against their category's regulation, converts images, promotes them to
//! the permanent store and records the outcome in the idempotency cache.

pub mod dispatcher;
pub mod error;
pub mod notification;
pub mod pipeline;
pub mod queue;
pub mod setup;
pub mod telemetry;

pub use dispatcher::{BatchReport, Dispatcher};
pub use error::{FailureCause, PipelineError};
pub use notification::{Envelope, NotificationError, ObjectRecord};
pub use pipeline::{RecordOutcome, UploadPipeline};
pub use queue::SqsConsumer;
pub use setup::build_dispatcher;
pub use telemetry::init_tracing;
