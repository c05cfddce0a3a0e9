use serde::{Deserialize, Serialize};
use std::fmt;

/// Enrollment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    /// Steps are being dispatched
    #[default]
    Active,
    /// Temporarily halted by an operator
    Paused,
    /// The contact replied and a human has taken over the conversation
    Replied,
    /// An appointment was booked
    Booked,
    /// The sequence ran out of steps or the contact declined
    Completed,
    /// The contact opted out
    ManualStop,
    /// Healing gave up on the enrollment
    Failed,
    /// Removed from the sequence by an operator
    Unenrolled,
}

impl EnrollmentStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Booked | Self::Completed | Self::ManualStop | Self::Failed | Self::Unenrolled
        )
    }

    /// Statuses in which delivery failures are still diagnosed and healed
    pub fn accepts_healing(&self) -> bool {
        matches!(self, Self::Active | Self::Paused)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Replied => "replied",
            Self::Booked => "booked",
            Self::Completed => "completed",
            Self::ManualStop => "manual_stop",
            Self::Failed => "failed",
            Self::Unenrolled => "unenrolled",
        }
    }
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EnrollmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "replied" => Ok(Self::Replied),
            "booked" => Ok(Self::Booked),
            "completed" => Ok(Self::Completed),
            "manual_stop" => Ok(Self::ManualStop),
            "failed" => Ok(Self::Failed),
            "unenrolled" => Ok(Self::Unenrolled),
            _ => Err(format!("Invalid enrollment status: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_check() {
        assert!(EnrollmentStatus::Booked.is_terminal());
        assert!(EnrollmentStatus::Completed.is_terminal());
        assert!(EnrollmentStatus::ManualStop.is_terminal());
        assert!(EnrollmentStatus::Failed.is_terminal());
        assert!(EnrollmentStatus::Unenrolled.is_terminal());
        assert!(!EnrollmentStatus::Active.is_terminal());
        assert!(!EnrollmentStatus::Paused.is_terminal());
        assert!(!EnrollmentStatus::Replied.is_terminal());
    }

    #[test]
    fn test_state_string_conversion() {
        assert_eq!(EnrollmentStatus::ManualStop.to_string(), "manual_stop");
        assert_eq!(
            "unenrolled".parse::<EnrollmentStatus>().unwrap(),
            EnrollmentStatus::Unenrolled
        );
        assert!("archived".parse::<EnrollmentStatus>().is_err());
    }

    #[test]
    fn test_state_serde() {
        let json = serde_json::to_string(&EnrollmentStatus::ManualStop).unwrap();
        assert_eq!(json, "\"manual_stop\"");
        let parsed: EnrollmentStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, EnrollmentStatus::ManualStop);
    }
}
