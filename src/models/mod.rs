//! # Domain Models
//!
//! Plain data types shared by every layer of the orchestration core. Storage
//! specific row types live in [`crate::database`]; these structs are what the
//! state machine, diagnosis engine and healing executor operate on.

pub mod channel;
pub mod contact;
pub mod enrollment;
pub mod healing;
pub mod step;
pub mod umbrella;

pub use channel::{Channel, ChannelOverrideMap};
pub use contact::{Contact, ContactField, PhoneType};
pub use enrollment::{ConversionMetadata, Enrollment};
pub use healing::{
    AlternateContact, FailureHistory, FailureRecord, FailureType, HealingAction,
    HealingActionKind, HealingAuditEntry, HealingHistoryEntry,
};
pub use step::{Step, StepContent, StepFlags};
pub use umbrella::{Credential, UmbrellaAssignment, UmbrellaMapping};
