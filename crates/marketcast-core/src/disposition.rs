//! Retry classification for pipeline errors
//!
//! Every error that can surface while processing an upload is either
//! retryable (redelivery of the notification may fix it) or terminal
//! (redelivery cannot change the outcome and must not be attempted).

use std::fmt::{Display, Formatter, Result as FmtResult};

/// Whether a failure should be handed back to the queue for redelivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Transient I/O, timeouts, cancellation. Propagated to the caller.
    Retryable,
    /// Validation and format failures. Recorded and absorbed.
    Terminal,
}

impl Disposition {
    pub fn is_retryable(self) -> bool {
        matches!(self, Disposition::Retryable)
    }
}

impl Display for Disposition {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Disposition::Retryable => write!(f, "retryable"),
            Disposition::Terminal => write!(f, "terminal"),
        }
    }
}

/// Implemented by every error type that crosses a pipeline stage.
pub trait Classify {
    fn disposition(&self) -> Disposition;

    /// Shorthand for `self.disposition().is_retryable()`
    fn is_retryable(&self) -> bool {
        self.disposition().is_retryable()
    }
}
