use std::time::Duration;

use thiserror::Error;

use crate::models::{OperationId, OperationKind, OperationState};

/// Failure delivered on an operation's result sink, or returned by the
/// scheduler's own entry points.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RadioError {
    #[error("transport rejected {0}")]
    StartRejected(String),

    #[error("{kind} timed out after {after:?}")]
    Timeout { kind: OperationKind, after: Duration },

    #[error("transport disconnected: {0}")]
    TransportDisconnected(String),

    #[error("scan failed with error code {0}")]
    ScanFailed(i32),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation failed: {0}")]
    OperationFailed(String),

    #[error("{0} already submitted")]
    AlreadySubmitted(OperationId),

    #[error("radio scheduler closed")]
    SchedulerClosed,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to spawn radio worker: {0}")]
    WorkerSpawn(String),
}

impl RadioError {
    /// The terminal state an operation ends in when it fails with this error.
    pub fn terminal_state(&self) -> OperationState {
        match self {
            RadioError::Timeout { .. } => OperationState::TimedOut,
            RadioError::Cancelled => OperationState::Cancelled,
            _ => OperationState::Failed,
        }
    }
}

pub type Result<T> = std::result::Result<T, RadioError>;
