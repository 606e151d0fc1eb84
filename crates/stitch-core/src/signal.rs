//! Signals an allocation surfaces to its scheduler.

use thiserror::Error;

use crate::hints::ExclusionHints;

/// Coarse signal class, for logging and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// Re-offer the same aggregate within this attempt.
    RetryAggregate,
    /// Tear the attempt down and ask the path computer again.
    RestartFromScs,
    /// Abort.
    Fatal,
}

/// Non-success outcome of an engine operation.
#[derive(Debug, Clone, Error)]
pub enum StitchSignal {
    /// Local repair chose new tags; offer this aggregate again.
    #[error("Retry aggregate {aggregate}: {reason}")]
    RetryAggregate { aggregate: String, reason: String },

    /// The attempt cannot converge; recompute the topology avoiding `hints`.
    #[error("Restart from path computation after {aggregate}: {reason}")]
    RestartFromScs {
        aggregate: String,
        reason: String,
        hints: ExclusionHints,
    },

    /// Unrecoverable.
    #[error("Stitching failed at {context}: {message}")]
    Fatal { context: String, message: String },
}

impl StitchSignal {
    pub fn retry(aggregate: impl Into<String>, reason: impl Into<String>) -> Self {
        StitchSignal::RetryAggregate {
            aggregate: aggregate.into(),
            reason: reason.into(),
        }
    }

    pub fn restart(
        aggregate: impl Into<String>,
        reason: impl Into<String>,
        hints: ExclusionHints,
    ) -> Self {
        StitchSignal::RestartFromScs {
            aggregate: aggregate.into(),
            reason: reason.into(),
            hints,
        }
    }

    /// Creates a fatal signal naming where it happened.
    pub fn fatal(context: impl Into<String>, message: impl Into<String>) -> Self {
        StitchSignal::Fatal {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Fatal signal for a user abort.
    pub fn cancelled(context: impl Into<String>) -> Self {
        Self::fatal(context, "stitching cancelled by user")
    }

    pub fn kind(&self) -> SignalKind {
        match self {
            StitchSignal::RetryAggregate { .. } => SignalKind::RetryAggregate,
            StitchSignal::RestartFromScs { .. } => SignalKind::RestartFromScs,
            StitchSignal::Fatal { .. } => SignalKind::Fatal,
        }
    }

    /// Returns true unless the signal is fatal.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StitchSignal::Fatal { .. })
    }
}

/// Result of an engine operation.
pub type StitchResult<T> = Result<T, StitchSignal>;
