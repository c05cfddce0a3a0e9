//! Store traits for the logical tables the core reads and writes.
//!
//! The orchestration layer depends only on these traits; [`super::postgres`]
//! and [`super::in_memory`] provide the implementations.

use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use super::errors::StoreResult;
use super::postgres::{
    PgContactStore, PgEnrollmentStore, PgHealingAuditStore, PgStepStore,
    PgUmbrellaAssignmentStore,
};
use crate::models::{
    Contact, ContactField, Enrollment, FailureHistory, FailureRecord, HealingAuditEntry, Step,
    UmbrellaAssignment,
};

#[async_trait]
pub trait EnrollmentStore: Send + Sync {
    async fn find(&self, enrollment_id: Uuid) -> StoreResult<Option<Enrollment>>;

    async fn insert(&self, enrollment: &Enrollment) -> StoreResult<()>;

    /// Write back every mutable field if the stored version still equals
    /// `enrollment.version`. On success the version is bumped in place; a
    /// moved version yields [`super::StoreError::VersionConflict`].
    async fn update(&self, enrollment: &mut Enrollment) -> StoreResult<()>;
}

#[async_trait]
pub trait ContactStore: Send + Sync {
    async fn find(&self, contact_id: Uuid) -> StoreResult<Option<Contact>>;

    async fn insert(&self, contact: &Contact) -> StoreResult<()>;

    /// Set `email_valid`/`phone_valid`. Single-column write, safe to repeat.
    async fn set_validity(&self, contact_id: Uuid, field: ContactField, valid: bool)
        -> StoreResult<()>;
}

#[async_trait]
pub trait StepStore: Send + Sync {
    async fn find(&self, step_id: Uuid) -> StoreResult<Option<Step>>;

    async fn find_by_order(&self, sequence_id: Uuid, order_index: i32)
        -> StoreResult<Option<Step>>;

    async fn insert(&self, step: &Step) -> StoreResult<()>;
}

#[async_trait]
pub trait HealingAuditStore: Send + Sync {
    async fn append(&self, entry: &HealingAuditEntry) -> StoreResult<()>;

    /// Audit rows of one enrollment, oldest first
    async fn entries_for(&self, enrollment_id: Uuid) -> StoreResult<Vec<HealingAuditEntry>>;

    async fn failure_history(&self, enrollment_id: Uuid) -> StoreResult<FailureHistory> {
        let entries = self.entries_for(enrollment_id).await?;
        Ok(FailureHistory::new(
            entries.iter().map(FailureRecord::from).collect(),
        ))
    }
}

#[async_trait]
pub trait UmbrellaAssignmentStore: Send + Sync {
    /// The tenant's active assignment joined with the shared account limits
    async fn active_assignment(&self, tenant_id: Uuid) -> StoreResult<Option<UmbrellaAssignment>>;

    /// Move a tenant onto another shared account (administrative migration)
    async fn reassign_tenant(
        &self,
        tenant_id: Uuid,
        umbrella_id: Uuid,
        tenant_concurrency_cap: Option<i32>,
        priority_weight: i32,
    ) -> StoreResult<()>;
}

/// The store handles the orchestration layer works against
#[derive(Clone)]
pub struct CoreStores {
    pub enrollments: Arc<dyn EnrollmentStore>,
    pub contacts: Arc<dyn ContactStore>,
    pub steps: Arc<dyn StepStore>,
    pub audit: Arc<dyn HealingAuditStore>,
    pub umbrellas: Arc<dyn UmbrellaAssignmentStore>,
}

impl std::fmt::Debug for CoreStores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreStores").finish_non_exhaustive()
    }
}

impl CoreStores {
    /// Postgres-backed stores sharing one pool
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            enrollments: Arc::new(PgEnrollmentStore::new(pool.clone())),
            contacts: Arc::new(PgContactStore::new(pool.clone())),
            steps: Arc::new(PgStepStore::new(pool.clone())),
            audit: Arc::new(PgHealingAuditStore::new(pool.clone())),
            umbrellas: Arc::new(PgUmbrellaAssignmentStore::new(pool)),
        }
    }
}
