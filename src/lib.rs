#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, PGMQ in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Outreach Core
//!
//! Runtime orchestration core for multi-channel outreach sequences.
//!
//! ## Overview
//!
//! A tenant enrolls a contact into a sequence of SMS, email and voice steps.
//! A scheduler (outside this crate) sends each step when it comes due; this
//! crate decides what happens around those sends:
//!
//! - the enrollment lifecycle, driven by provider webhook events
//! - diagnosis of delivery failures into a healing action
//! - execution of that action: rewinding, switching channel, skipping or
//!   ending the sequence, and re-dispatching the step
//! - resolution of a tenant's shared voice account and admission of calls
//!   against its concurrency limits
//!
//! ## Module Organization
//!
//! - [`models`] - Enrollments, contacts, steps, healing actions
//! - [`state_machine`] - Enrollment status transitions
//! - [`orchestration`] - Event processing, diagnosis, healing and dispatch
//! - [`capacity`] - Umbrella resolution, credential decryption, call admission
//! - [`messaging`] - Job payloads, queues and content transcoding
//! - [`database`] - Store traits with PostgreSQL and in-memory implementations
//! - [`events`] - Lifecycle event publisher for attribution and notification
//! - [`validation`] - Channel validity of a contact
//! - [`config`] - TOML configuration with environment overlays
//! - [`error`] - Crate-level error type
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use outreach_core::config::ConfigManager;
//! use outreach_core::logging::init_structured_logging;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! init_structured_logging();
//!
//! println!("Webhook concurrency: {}", manager.config().workers.webhook_concurrency);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! Unit tests sit next to the code; `tests/` drives whole scenarios against
//! the in-memory stores and queue:
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # All tests
//! ```

pub mod capacity;
pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod events;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod state_machine;
pub mod validation;

pub use capacity::{AdmissionControl, CapacityResolver, InProcessAdmissionControl, UmbrellaResolver};
pub use config::{ConfigManager, OutreachConfig};
pub use database::CoreStores;
pub use error::{OutreachError, Result};
pub use events::{EventPublisher, LifecycleEvent};
pub use models::{
    Channel, Contact, Enrollment, FailureType, HealingAction, HealingActionKind, Step,
    StepContent,
};
pub use orchestration::{
    ChannelDispatcher, EnrollmentEventProcessor, EventOutcome, FailureDiagnosis,
    HealingExecutor, StandardFailureDiagnosis, WebhookWorker,
};
pub use state_machine::{EnrollmentEvent, EnrollmentStateMachine, EnrollmentStatus};
