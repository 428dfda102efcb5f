//! Error types for the branchline engine
//!
//! Provides error handling for:
//! - Generation service failures
//! - Retry pipeline stage and reconciliation failures
//! - Structure rewrites and deviation handling
//! - Configuration loading and tracing setup

use crate::pipeline::{GenerationMetrics, GenerationStage};
use crate::service::{ReconciliationDiagnostic, ReconciliationFailureReason};
use branchline_structure::{ProgressionError, StructureError, VersionError};
use std::path::PathBuf;

/// Failure reported by a generation service
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    /// Transient failure; the caller may try again later
    #[error("service unavailable: {0}")]
    Retryable(String),

    /// Permanent failure
    #[error("service failed: {0}")]
    Fatal(String),

    /// Response could not be interpreted
    #[error("invalid service response: {0}")]
    InvalidResponse(String),
}

impl ServiceError {
    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

/// Retry pipeline errors
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A stage call failed; no further attempt was made
    #[error("{stage} stage failed on attempt {attempt}: {source}")]
    Stage {
        /// Failing stage
        stage: GenerationStage,
        /// 1-based attempt number
        attempt: u32,
        /// Service failure
        #[source]
        source: ServiceError,
    },

    /// Diagnostics remained after the last attempt
    #[error(
        "reconciliation failed after {} attempts with {} diagnostics",
        metrics.attempts,
        diagnostics.len()
    )]
    ReconciliationFailed {
        /// Diagnostics of the final attempt
        diagnostics: Vec<ReconciliationDiagnostic>,
        /// Reasons each attempt was rejected, in attempt order
        attempt_reasons: Vec<Vec<ReconciliationFailureReason>>,
        /// Metrics across all attempts
        metrics: Box<GenerationMetrics>,
    },
}

/// Structure rewrite errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RewriteError {
    /// Rewrite service call failed
    #[error("rewrite service failed: {0}")]
    Service(#[from] ServiceError),

    /// Regenerated outline could not be merged
    #[error("merge failed: {0}")]
    Merge(#[from] StructureError),

    /// A concluded beat changed during the rewrite
    #[error("rewrite altered a concluded beat")]
    PreservedBeatsAltered,
}

/// Deviation handling errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviationError {
    /// Structure rewrite failed
    #[error(transparent)]
    Rewrite(#[from] RewriteError),

    /// New version could not be recorded
    #[error("version error: {0}")]
    Version(#[from] VersionError),

    /// A deviation must invalidate at least one beat
    #[error("deviation invalidates no beats")]
    EmptyInvalidatedBeats,
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// TOML could not be parsed
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Tracing setup errors
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// Filter directive did not parse
    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    /// A global subscriber is already installed
    #[error("tracing already initialised: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Main engine error type
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Structure or page service failed outside the retry pipeline
    #[error("service error: {0}")]
    Service(#[from] ServiceError),

    /// Generated outline violated the structure contract
    #[error("structure error: {0}")]
    Structure(#[from] StructureError),

    /// Beat progression contract violated
    #[error("progression error: {0}")]
    Progression(#[from] ProgressionError),

    /// Version precondition or resolution failed
    #[error("version error: {0}")]
    Version(#[from] VersionError),

    /// Generation pipeline failed
    #[error("generation failed: {0}")]
    Pipeline(#[from] PipelineError),

    /// Deviation handling failed
    #[error("deviation handling failed: {0}")]
    Deviation(#[from] DeviationError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Timeout
    #[error("page generation timed out after {duration_secs}s")]
    Timeout {
        /// Configured limit
        duration_secs: u64,
    },
}

impl EngineError {
    /// Check if the whole page generation may be retried by the caller
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Service(e)
            | Self::Pipeline(PipelineError::Stage { source: e, .. })
            | Self::Deviation(DeviationError::Rewrite(RewriteError::Service(e))) => {
                e.is_retryable()
            }
            _ => false,
        }
    }

    /// Check if error is a broken invariant rather than a runtime failure
    #[must_use]
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::Structure(_)
                | Self::Progression(_)
                | Self::Version(_)
                | Self::Deviation(
                    DeviationError::Version(_)
                        | DeviationError::EmptyInvalidatedBeats
                        | DeviationError::Rewrite(
                            RewriteError::Merge(_) | RewriteError::PreservedBeatsAltered
                        )
                )
        )
    }
}
