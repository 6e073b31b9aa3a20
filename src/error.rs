//! Error types for morphspace.
//!
//! All errors are strongly typed using thiserror. Contract violations indicate
//! a caller or model bug and fail fast; exploration errors are search-level
//! conditions such as cancellation or a full runtime queue. Propagation
//! rejections are *not* errors: they are ordinary search outcomes carried as
//! data (see `propagation::PropagationResult`).

use thiserror::Error;

use crate::tuple::NodeId;
use crate::versioned::Version;

/// Contract violations: caller/model bugs, never a search outcome.
#[derive(Debug, Error)]
pub enum ContractError {
    #[error("Arity mismatch for symbol '{symbol}': expected {expected}, got {actual}")]
    ArityMismatch {
        symbol: String,
        expected: usize,
        actual: usize,
    },

    #[error("Symbol '{symbol}' is not registered in this store")]
    UnknownSymbol {
        symbol: String,
    },

    #[error("Symbol '{symbol}' registered twice")]
    DuplicateSymbol {
        symbol: String,
    },

    #[error("Version {version} was never committed")]
    UnknownVersion {
        version: Version,
    },

    #[error("Version {version} already exists")]
    VersionReused {
        version: Version,
    },

    #[error("Object {node} was never created")]
    NoSuchObject {
        node: NodeId,
    },

    #[error("Rule id {rule} is not registered with this adapter")]
    UnknownRule {
        rule: u64,
    },

    #[error("Trajectory is empty; the model has no committed root")]
    EmptyTrajectory,

    #[error("Model has uncommitted changes where a committed state is required")]
    UncommittedState,

    #[error("Invalid limits: {reason}")]
    InvalidLimits {
        reason: String,
    },
}

/// Search-level errors raised while driving an exploration.
#[derive(Debug, Error)]
pub enum ExplorationError {
    #[error("Exploration was cancelled")]
    Cancelled,

    #[error("Exploration timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Runtime queue is full (capacity: {capacity})")]
    QueueFull {
        capacity: usize,
    },

    #[error("Runtime worker disconnected")]
    Disconnected,

    #[error("Propagation did not reach a fixpoint within {iterations} iterations")]
    PropagationDiverged {
        iterations: usize,
    },
}

/// Top-level error type for morphspace.
///
/// This enum encompasses all possible errors that can occur when using the
/// store or the exploration engine.
#[derive(Debug, Error)]
pub enum MorphError {
    #[error("Contract violation: {0}")]
    Contract(#[from] ContractError),

    #[error("Exploration error: {0}")]
    Exploration(#[from] ExplorationError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl MorphError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a contract violation.
    #[must_use]
    pub const fn is_contract(&self) -> bool {
        matches!(self, Self::Contract(_))
    }

    /// Returns true if this is an exploration error.
    #[must_use]
    pub const fn is_exploration(&self) -> bool {
        matches!(self, Self::Exploration(_))
    }

    /// Returns true if this error was caused by cooperative cancellation.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(
            self,
            Self::Exploration(ExplorationError::Cancelled | ExplorationError::Timeout { .. })
        )
    }
}

/// Result type alias for morphspace operations.
pub type MorphResult<T> = Result<T, MorphError>;
