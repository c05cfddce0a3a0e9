//! # Persistence
//!
//! Store traits for the tables the orchestration core reads and writes, with a
//! Postgres implementation for production and an in-memory one for tests and
//! local runs.
//!
//! ## Key Components
//!
//! - [`stores`] - `EnrollmentStore`, `ContactStore`, `StepStore`,
//!   `HealingAuditStore`, `UmbrellaAssignmentStore`
//! - [`postgres`] - sqlx-backed stores over a shared `PgPool`
//! - [`in_memory`] - process-local stores with the same contracts
//! - [`connection`] - pool construction and health check
//! - [`migrations`] - embedded schema migrations
//!
//! ## Optimistic Concurrency
//!
//! `EnrollmentStore::update` is a compare-and-swap on the enrollment `version`
//! column. Callers that lose the race receive `StoreError::VersionConflict`
//! and are expected to reload and retry.

pub mod connection;
pub mod errors;
pub mod in_memory;
pub mod migrations;
pub mod postgres;
pub mod stores;

pub use connection::DatabaseConnection;
pub use errors::{StoreError, StoreResult};
pub use in_memory::{
    InMemoryContactStore, InMemoryEnrollmentStore, InMemoryHealingAuditStore, InMemoryStepStore,
    InMemoryUmbrellaStore,
};
pub use migrations::DatabaseMigrations;
pub use postgres::{
    PgContactStore, PgEnrollmentStore, PgHealingAuditStore, PgStepStore,
    PgUmbrellaAssignmentStore,
};
pub use stores::{
    ContactStore, CoreStores, EnrollmentStore, HealingAuditStore, StepStore, UmbrellaAssignmentStore,
};
