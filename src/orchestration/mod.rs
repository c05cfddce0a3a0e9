//! # Orchestration
//!
//! The runtime core of outreach sequences:
//!
//! - [`failure_diagnosis`] maps a failure and its history to a healing action
//! - [`healing_executor`] applies that action to the enrollment and re-dispatches
//! - [`channel_dispatcher`] turns a step into a send job on the right queue,
//!   acquiring a shared call slot for voice
//! - [`event_processor`] consumes provider webhook events and drives the
//!   enrollment state machine
//! - [`webhook_worker`] polls the webhook queue and feeds the processor
//!
//! Work on a single enrollment is serialized through [`enrollment_locks`];
//! writers in other processes are caught by the enrollment version.

pub mod channel_dispatcher;
pub mod enrollment_locks;
pub mod event_processor;
pub mod failure_diagnosis;
pub mod healing_executor;
pub mod reply_intent;
pub mod webhook_worker;

pub use channel_dispatcher::{ChannelDispatcher, DispatchError, DispatchReceipt, DispatchResult};
pub use enrollment_locks::{EnrollmentGuard, EnrollmentLocks};
pub use event_processor::{EnrollmentEventProcessor, EventError, EventOutcome, EventResult};
pub use failure_diagnosis::{diagnose, FailureDiagnosis, StandardFailureDiagnosis};
pub use healing_executor::{
    FailureSignal, HealingError, HealingExecutor, HealingOutcome, HealingResult,
};
pub use reply_intent::{KeywordIntentClassifier, ReplyIntentClassifier};
pub use webhook_worker::{JobDisposition, PollSummary, WebhookWorker};
