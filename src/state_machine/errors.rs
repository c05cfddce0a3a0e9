use thiserror::Error;

use super::states::EnrollmentStatus;

/// Errors raised while validating enrollment status transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateMachineError {
    #[error("Invalid state transition from {from} on event {event}")]
    InvalidTransition {
        from: EnrollmentStatus,
        event: String,
    },

    #[error("Enrollment is in terminal state {state}; event {event} rejected")]
    TerminalState {
        state: EnrollmentStatus,
        event: String,
    },

    #[error("Invalid state in storage: {0}")]
    InvalidStoredState(String),
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
