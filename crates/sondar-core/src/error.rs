//! Engine error taxonomy.
//!
//! Caller-visible rejections (invalid input, conflicts, state violations)
//! are distinguished from internally recovered conditions: pool exhaustion
//! and estimation non-convergence are *not* errors and surface only in
//! outcome metadata.

use thiserror::Error;
use uuid::Uuid;

use crate::model::SessionStatus;

/// Errors surfaced by the session engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed or out-of-range response value; rejected before any state
    /// mutation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The item id is not part of the session's bank.
    #[error("unknown item: {0}")]
    UnknownItem(String),

    /// The item already has an active answer in this session.
    #[error("item already answered: {0}")]
    DuplicateAnswer(String),

    #[error("session not found: {0}")]
    SessionNotFound(Uuid),

    /// A second transaction attempted to advance a session already being
    /// processed. The caller may retry.
    #[error("session {0} is already processing a transaction")]
    ConcurrentModification(Uuid),

    /// Attempt to mutate a session whose status forbids it.
    #[error("session is {status}, operation not permitted")]
    SessionStateViolation { status: SessionStatus },

    /// The requested status change is not a legal transition.
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    /// The collaborator store stayed unavailable through the retry budget;
    /// in-memory progress was discarded.
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
}

impl EngineError {
    /// Rejections caused by the caller's request rather than the system.
    pub fn is_caller_fault(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidInput(_)
                | EngineError::UnknownItem(_)
                | EngineError::DuplicateAnswer(_)
                | EngineError::SessionStateViolation { .. }
                | EngineError::InvalidTransition { .. }
        )
    }

    /// Whether the caller may reasonably retry the same call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::ConcurrentModification(_) | EngineError::PersistenceFailure(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_fault_classification() {
        assert!(EngineError::InvalidInput("x".into()).is_caller_fault());
        assert!(EngineError::SessionStateViolation {
            status: SessionStatus::Finalizada
        }
        .is_caller_fault());
        assert!(!EngineError::PersistenceFailure("down".into()).is_caller_fault());
        assert!(!EngineError::ConcurrentModification(Uuid::new_v4()).is_caller_fault());
    }

    #[test]
    fn retryable_classification() {
        assert!(EngineError::ConcurrentModification(Uuid::new_v4()).is_retryable());
        assert!(EngineError::PersistenceFailure("down".into()).is_retryable());
        assert!(!EngineError::DuplicateAnswer("dep-1".into()).is_retryable());
    }
}
