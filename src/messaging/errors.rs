//! # Messaging Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Queue operation failed: {queue_name}: {operation}: {message}")]
    QueueOperation {
        queue_name: String,
        operation: String,
        message: String,
    },

    #[error("Message serialization error: {message}")]
    MessageSerialization { message: String },

    #[error("Message deserialization error: {message}")]
    MessageDeserialization { message: String },
}

impl MessagingError {
    pub fn queue_operation(
        queue_name: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::QueueOperation {
            queue_name: queue_name.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn serialization(error: impl std::fmt::Display) -> Self {
        Self::MessageSerialization {
            message: error.to_string(),
        }
    }

    pub fn deserialization(error: impl std::fmt::Display) -> Self {
        Self::MessageDeserialization {
            message: error.to_string(),
        }
    }
}

pub type MessagingResult<T> = Result<T, MessagingError>;
