// Enrollment lifecycle state machine
//
// An enrollment has exactly one status drawn from a closed set. `active` and
// `paused` are re-entrant; `booked`, `completed`, `manual_stop`, `failed` and
// `unenrolled` are terminal and reject every further transition.

pub mod enrollment_state_machine;
pub mod errors;
pub mod events;
pub mod states;

pub use enrollment_state_machine::{EnrollmentStateMachine, StatusTransition};
pub use errors::{StateMachineError, StateMachineResult};
pub use events::EnrollmentEvent;
pub use states::EnrollmentStatus;
