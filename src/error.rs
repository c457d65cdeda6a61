//! Error types for shard coordination
//!
//! Component hooks report [`ComponentError`]. Whether such an error is fatal
//! or only degrades the response depends on the hook that raised it; the
//! coordinator turns fatal ones into [`CoordinatorError`].

use crate::{shard::ShardId, stage::Stage};

/// Errors raised by component hooks
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ComponentError {
    #[error("Invalid value for parameter '{name}': {reason}")]
    InvalidParam { name: String, reason: String },

    #[error("Missing required parameter: {name}")]
    MissingParam { name: String },

    #[error("Request state not initialized: {0}")]
    MissingState(&'static str),

    #[error("Malformed response from shard {shard}: {reason}")]
    MalformedResponse { shard: ShardId, reason: String },

    #[error("Invalid component configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("{message}")]
    Internal { message: String },
}

impl ComponentError {
    pub fn internal(message: impl Into<String>) -> Self {
        ComponentError::Internal {
            message: message.into(),
        }
    }
}

/// Result type for component hooks
pub type ComponentResult<T> = Result<T, ComponentError>;

/// Fatal request errors. No partial result is produced when one of these is
/// returned.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Component '{component}' failed to prepare request {request_id}: {source}")]
    PrepareFailed {
        request_id: String,
        component: String,
        #[source]
        source: ComponentError,
    },

    #[error("Component '{component}' failed to process request {request_id}: {source}")]
    ProcessFailed {
        request_id: String,
        component: String,
        #[source]
        source: ComponentError,
    },

    #[error("Shard transport unavailable for request {request_id} (shard {shard}): {message}")]
    TransportUnavailable {
        request_id: String,
        shard: ShardId,
        message: String,
    },

    #[error("Coordination did not converge for request {request_id} after {rounds} rounds (stage {stage})")]
    NotConverged {
        request_id: String,
        rounds: u32,
        stage: Stage,
    },

    #[error("Request {request_id} was cancelled at stage {stage}")]
    Cancelled { request_id: String, stage: Stage },

    #[error("Request {request_id} exceeded its {timeout_ms}ms deadline at stage {stage}")]
    DeadlineExceeded {
        request_id: String,
        stage: Stage,
        timeout_ms: u64,
    },

    #[error("Partial results rejected for request {request_id} at stage {stage}: {reason}")]
    PartialResultsRejected {
        request_id: String,
        stage: Stage,
        reason: String,
    },
}

impl CoordinatorError {
    pub fn request_id(&self) -> &str {
        match self {
            CoordinatorError::PrepareFailed { request_id, .. }
            | CoordinatorError::ProcessFailed { request_id, .. }
            | CoordinatorError::TransportUnavailable { request_id, .. }
            | CoordinatorError::NotConverged { request_id, .. }
            | CoordinatorError::Cancelled { request_id, .. }
            | CoordinatorError::DeadlineExceeded { request_id, .. }
            | CoordinatorError::PartialResultsRejected { request_id, .. } => request_id,
        }
    }

    /// Short machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            CoordinatorError::PrepareFailed { .. } => "prepare_failed",
            CoordinatorError::ProcessFailed { .. } => "process_failed",
            CoordinatorError::TransportUnavailable { .. } => "transport_unavailable",
            CoordinatorError::NotConverged { .. } => "coordination_not_converged",
            CoordinatorError::Cancelled { .. } => "request_cancelled",
            CoordinatorError::DeadlineExceeded { .. } => "deadline_exceeded",
            CoordinatorError::PartialResultsRejected { .. } => "partial_results_rejected",
        }
    }
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
