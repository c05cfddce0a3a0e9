//! Crate-level error type.
//!
//! Each subsystem owns a focused error enum; `OutreachError` wraps them for
//! callers that drive the core as a whole, such as the worker binary.

use thiserror::Error;

use crate::capacity::{CapacityError, CipherError};
use crate::config::ConfigurationError;
use crate::database::StoreError;
use crate::messaging::MessagingError;
use crate::orchestration::{DispatchError, EventError, HealingError};
use crate::state_machine::StateMachineError;

#[derive(Error, Debug)]
pub enum OutreachError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Credential error: {0}")]
    Credential(#[from] CipherError),

    #[error("Capacity error: {0}")]
    Capacity(#[from] CapacityError),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("State transition error: {0}")]
    StateTransition(#[from] StateMachineError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Healing error: {0}")]
    Healing(#[from] HealingError),

    #[error("Event error: {0}")]
    Event(#[from] EventError),
}

pub type Result<T> = std::result::Result<T, OutreachError>;
