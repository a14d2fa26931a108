//! Error and retry-policy types for the SpyGlass analysis domain.
//!
//! [`PipelineError`] covers conditions that halt a run or prevent one from
//! starting. Errors local to one port call ([`GenerationError`],
//! [`IndexingError`]) are defined here too so that infrastructure crates can
//! produce them without depending on each other. Parse failures live with the
//! parser in [`crate::parser`].
//!
//! [`RetryPolicy`] is a cross-cutting concern: any error type that participates
//! in retry decisions must be able to produce a [`RetryPolicy`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Stage;

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// - `Retryable` errors: network failures, timeouts, rate limiting, 5xx.
/// - `NonRetryable` errors: invalid credentials, malformed requests,
///   cancellation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    ///
    /// `after` optionally specifies the minimum delay before retrying (e.g.
    /// derived from a `Retry-After` response header).
    Retryable {
        /// Minimum back-off before the next attempt. `None` means apply the
        /// caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried.
    NonRetryable,
}

// ---------------------------------------------------------------------------
// Port errors
// ---------------------------------------------------------------------------

/// Failure of a single generation call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenerationError {
    /// Network, timeout, or provider-overload condition. Safe to retry.
    #[error("transient generation failure: {message}")]
    Transient {
        message: String,
        /// Provider-supplied back-off hint.
        retry_after: Option<Duration>,
    },

    /// Non-retryable provider error (invalid credentials, rejected request).
    #[error("generation failed: {message}")]
    Fatal { message: String },

    /// The call was abandoned because its run was cancelled.
    #[error("generation cancelled")]
    Cancelled,
}

impl GenerationError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::Transient { retry_after, .. } => RetryPolicy::Retryable {
                after: *retry_after,
            },
            Self::Fatal { .. } | Self::Cancelled => RetryPolicy::NonRetryable,
        }
    }
}

/// Failure to hand a run summary to the document store.
#[derive(Debug, Error)]
pub enum IndexingError {
    #[error("document store unreachable: {0}")]
    Unavailable(String),

    #[error("document store rejected the summary: {0}")]
    Rejected(String),

    #[error("could not serialise run summary: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("document store I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Pipeline-level errors
// ---------------------------------------------------------------------------

/// Errors that halt a run or prevent it from starting.
///
/// Stage-local conditions (a parse failure within retry budget, a transient
/// call failure the port recovers from) never surface as this type; they are
/// absorbed by the refine loop or the port's own retries.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The generation port gave up on a stage (retries exhausted or fatal
    /// provider error).
    #[error("stage '{stage}' failed: {source}")]
    StageExecution {
        stage: Stage,
        #[source]
        source: GenerationError,
    },

    /// Configuration is missing or invalid. Raised before any run starts.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The caller's request is outside the accepted input domain.
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// The run was cancelled before or during `stage`.
    #[error("run cancelled during {stage}")]
    Cancelled { stage: Stage },

    /// The synthesis output could not be turned into a trend collection.
    #[error("final result could not be parsed: {0}")]
    FinalParse(#[from] crate::ParseFailure),

    /// The orchestrator produced an event its current phase does not accept.
    #[error(transparent)]
    Transition(#[from] crate::InvalidTransition),
}

impl PipelineError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}
