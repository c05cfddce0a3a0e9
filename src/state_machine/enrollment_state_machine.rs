use chrono::Utc;
use tracing::debug;

use super::{
    errors::{StateMachineError, StateMachineResult},
    events::EnrollmentEvent,
    states::EnrollmentStatus,
};
use crate::models::Enrollment;

/// Result of a successful status transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTransition {
    pub from: EnrollmentStatus,
    pub to: EnrollmentStatus,
}

impl StatusTransition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }

    pub fn became_terminal(&self) -> bool {
        !self.from.is_terminal() && self.to.is_terminal()
    }
}

/// Stateless transition table for enrollments.
///
/// Persistence is the caller's concern: the machine validates and applies the
/// transition to an in-memory [`Enrollment`], which the event processor then
/// writes back under the per-enrollment lock.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnrollmentStateMachine;

impl EnrollmentStateMachine {
    pub fn new() -> Self {
        Self
    }

    /// Determine the target state based on current state and event
    pub fn determine_target_state(
        &self,
        current_state: EnrollmentStatus,
        event: &EnrollmentEvent,
    ) -> StateMachineResult<EnrollmentStatus> {
        use EnrollmentEvent as E;
        use EnrollmentStatus as S;

        if current_state.is_terminal() {
            return Err(StateMachineError::TerminalState {
                state: current_state,
                event: event.event_type().to_string(),
            });
        }

        let target = match (current_state, event) {
            (S::Active, E::Pause) => S::Paused,
            (S::Paused, E::Resume) | (S::Replied, E::Resume) => S::Active,
            (S::Active, E::MarkReplied) | (S::Paused, E::MarkReplied) => S::Replied,

            // Re-entrant rewind keeps the enrollment where it is
            (S::Active, E::Rewind) => S::Active,
            (S::Paused, E::Rewind) => S::Paused,

            (_, E::Book) => S::Booked,
            (_, E::Complete) => S::Completed,
            (_, E::Stop) => S::ManualStop,
            (_, E::Fail(_)) => S::Failed,
            (_, E::Unenroll) => S::Unenrolled,

            (from_state, _) => {
                return Err(StateMachineError::InvalidTransition {
                    from: from_state,
                    event: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }

    /// Validate and apply `event` to the enrollment
    pub fn transition(
        &self,
        enrollment: &mut Enrollment,
        event: &EnrollmentEvent,
    ) -> StateMachineResult<StatusTransition> {
        let from = enrollment.status;
        let to = self.determine_target_state(from, event)?;

        if from != to {
            enrollment.status = to;
            enrollment.updated_at = Utc::now();
            if to.is_terminal() {
                enrollment.next_step_at = None;
            }
        }

        debug!(
            enrollment_id = %enrollment.enrollment_id,
            event = event.event_type(),
            from = %from,
            to = %to,
            "Enrollment status transition"
        );

        Ok(StatusTransition { from, to })
    }
}
