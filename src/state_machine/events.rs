use serde::{Deserialize, Serialize};

/// Events that can trigger enrollment status transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EnrollmentEvent {
    /// Operator pause
    Pause,
    /// Operator resume, also used to hand a replied enrollment back
    Resume,
    /// The contact replied and a human takes over
    MarkReplied,
    /// An appointment was booked
    Book,
    /// The contact declined or the sequence ran out of steps
    Complete,
    /// The contact opted out
    Stop,
    /// Healing ended the sequence
    Fail(String),
    /// Operator removal
    Unenroll,
    /// Healing rewound the current step; status is unchanged
    Rewind,
}

impl EnrollmentEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::MarkReplied => "mark_replied",
            Self::Book => "book",
            Self::Complete => "complete",
            Self::Stop => "stop",
            Self::Fail(_) => "fail",
            Self::Unenroll => "unenroll",
            Self::Rewind => "rewind",
        }
    }

    /// Extract the failure reason if this is a failure event
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(reason) => Some(reason),
            _ => None,
        }
    }

    /// Check if this event always lands in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Book | Self::Complete | Self::Stop | Self::Fail(_) | Self::Unenroll
        )
    }

    pub fn fail_with_reason(reason: impl Into<String>) -> Self {
        Self::Fail(reason.into())
    }
}
