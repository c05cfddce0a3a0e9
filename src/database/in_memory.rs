//! In-memory store implementations
//!
//! Process-local stand-ins for the relational tables, used by tests and local
//! runs. They honour the same contracts as the Postgres stores, including the
//! enrollment version check.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::errors::{StoreError, StoreResult};
use super::stores::{
    ContactStore, EnrollmentStore, HealingAuditStore, StepStore, UmbrellaAssignmentStore,
};
use crate::models::{Contact, ContactField, Enrollment, HealingAuditEntry, Step, UmbrellaAssignment};

#[derive(Debug, Default)]
pub struct InMemoryEnrollmentStore {
    rows: RwLock<HashMap<Uuid, Enrollment>>,
}

impl InMemoryEnrollmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EnrollmentStore for InMemoryEnrollmentStore {
    async fn find(&self, enrollment_id: Uuid) -> StoreResult<Option<Enrollment>> {
        Ok(self.rows.read().await.get(&enrollment_id).cloned())
    }

    async fn insert(&self, enrollment: &Enrollment) -> StoreResult<()> {
        self.rows
            .write()
            .await
            .insert(enrollment.enrollment_id, enrollment.clone());
        Ok(())
    }

    async fn update(&self, enrollment: &mut Enrollment) -> StoreResult<()> {
        let mut rows = self.rows.write().await;
        let stored = rows
            .get_mut(&enrollment.enrollment_id)
            .ok_or_else(|| StoreError::not_found("Enrollment", enrollment.enrollment_id))?;

        if stored.version != enrollment.version {
            return Err(StoreError::VersionConflict {
                enrollment_id: enrollment.enrollment_id,
                expected_version: enrollment.version,
            });
        }

        enrollment.version += 1;
        enrollment.updated_at = Utc::now();
        *stored = enrollment.clone();
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryContactStore {
    rows: RwLock<HashMap<Uuid, Contact>>,
}

impl InMemoryContactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContactStore for InMemoryContactStore {
    async fn find(&self, contact_id: Uuid) -> StoreResult<Option<Contact>> {
        Ok(self.rows.read().await.get(&contact_id).cloned())
    }

    async fn insert(&self, contact: &Contact) -> StoreResult<()> {
        self.rows
            .write()
            .await
            .insert(contact.contact_id, contact.clone());
        Ok(())
    }

    async fn set_validity(
        &self,
        contact_id: Uuid,
        field: ContactField,
        valid: bool,
    ) -> StoreResult<()> {
        let mut rows = self.rows.write().await;
        let contact = rows
            .get_mut(&contact_id)
            .ok_or_else(|| StoreError::not_found("Contact", contact_id))?;
        match field {
            ContactField::Email => contact.email_valid = Some(valid),
            ContactField::Phone => contact.phone_valid = Some(valid),
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStepStore {
    rows: RwLock<HashMap<Uuid, Step>>,
}

impl InMemoryStepStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StepStore for InMemoryStepStore {
    async fn find(&self, step_id: Uuid) -> StoreResult<Option<Step>> {
        Ok(self.rows.read().await.get(&step_id).cloned())
    }

    async fn find_by_order(
        &self,
        sequence_id: Uuid,
        order_index: i32,
    ) -> StoreResult<Option<Step>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|s| s.sequence_id == sequence_id && s.order_index == order_index)
            .cloned())
    }

    async fn insert(&self, step: &Step) -> StoreResult<()> {
        self.rows.write().await.insert(step.step_id, step.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryHealingAuditStore {
    rows: RwLock<Vec<HealingAuditEntry>>,
}

impl InMemoryHealingAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }
}

#[async_trait]
impl HealingAuditStore for InMemoryHealingAuditStore {
    async fn append(&self, entry: &HealingAuditEntry) -> StoreResult<()> {
        self.rows.write().await.push(entry.clone());
        Ok(())
    }

    async fn entries_for(&self, enrollment_id: Uuid) -> StoreResult<Vec<HealingAuditEntry>> {
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .filter(|e| e.enrollment_id == enrollment_id)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone)]
struct SharedAccount {
    account_type: String,
    encrypted_credential: String,
    concurrency_limit: i32,
    active: bool,
}

#[derive(Debug, Clone)]
struct TenantAssignment {
    umbrella_id: Uuid,
    tenant_concurrency_cap: Option<i32>,
    priority_weight: i32,
    active: bool,
}

/// Shared accounts and tenant assignments, joined on read like the SQL store
#[derive(Debug, Default)]
pub struct InMemoryUmbrellaStore {
    accounts: RwLock<HashMap<Uuid, SharedAccount>>,
    assignments: RwLock<HashMap<Uuid, TenantAssignment>>,
    lookups: AtomicUsize,
}

impl InMemoryUmbrellaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_account(
        &self,
        umbrella_id: Uuid,
        account_type: impl Into<String>,
        encrypted_credential: impl Into<String>,
        concurrency_limit: i32,
    ) {
        self.accounts.write().await.insert(
            umbrella_id,
            SharedAccount {
                account_type: account_type.into(),
                encrypted_credential: encrypted_credential.into(),
                concurrency_limit,
                active: true,
            },
        );
    }

    pub async fn deactivate_assignment(&self, tenant_id: Uuid) {
        if let Some(assignment) = self.assignments.write().await.get_mut(&tenant_id) {
            assignment.active = false;
        }
    }

    /// Number of `active_assignment` queries served, i.e. resolver cache misses
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UmbrellaAssignmentStore for InMemoryUmbrellaStore {
    async fn active_assignment(&self, tenant_id: Uuid) -> StoreResult<Option<UmbrellaAssignment>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);

        let assignments = self.assignments.read().await;
        let Some(assignment) = assignments.get(&tenant_id).filter(|a| a.active) else {
            return Ok(None);
        };
        let accounts = self.accounts.read().await;
        let Some(account) = accounts.get(&assignment.umbrella_id).filter(|a| a.active) else {
            return Ok(None);
        };

        Ok(Some(UmbrellaAssignment {
            umbrella_id: assignment.umbrella_id,
            tenant_id,
            account_type: account.account_type.clone(),
            encrypted_credential: account.encrypted_credential.clone(),
            concurrency_limit: account.concurrency_limit,
            tenant_concurrency_cap: assignment.tenant_concurrency_cap,
            priority_weight: assignment.priority_weight,
            active: true,
        }))
    }

    async fn reassign_tenant(
        &self,
        tenant_id: Uuid,
        umbrella_id: Uuid,
        tenant_concurrency_cap: Option<i32>,
        priority_weight: i32,
    ) -> StoreResult<()> {
        if !self.accounts.read().await.contains_key(&umbrella_id) {
            return Err(StoreError::not_found("Umbrella account", umbrella_id));
        }
        self.assignments.write().await.insert(
            tenant_id,
            TenantAssignment {
                umbrella_id,
                tenant_concurrency_cap,
                priority_weight,
                active: true,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_enrollment_update_detects_stale_version() {
        let store = InMemoryEnrollmentStore::new();
        let enrollment = Enrollment::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        store.insert(&enrollment).await.unwrap();

        let mut first = enrollment.clone();
        let mut second = enrollment.clone();

        first.call_count = 1;
        store.update(&mut first).await.unwrap();
        assert_eq!(first.version, 1);

        second.call_count = 7;
        let err = store.update(&mut second).await.unwrap_err();
        assert!(err.is_version_conflict());

        let stored = store.find(enrollment.enrollment_id).await.unwrap().unwrap();
        assert_eq!(stored.call_count, 1);
    }

    #[tokio::test]
    async fn test_umbrella_assignment_requires_active_rows() {
        let store = InMemoryUmbrellaStore::new();
        let tenant = Uuid::new_v4();
        let umbrella = Uuid::new_v4();

        assert!(store.active_assignment(tenant).await.unwrap().is_none());
        assert!(store.reassign_tenant(tenant, umbrella, None, 1).await.is_err());

        store.add_account(umbrella, "vapi", "enc:v1:abc", 10).await;
        store.reassign_tenant(tenant, umbrella, Some(3), 2).await.unwrap();
        let assignment = store.active_assignment(tenant).await.unwrap().unwrap();
        assert_eq!(assignment.tenant_concurrency_cap, Some(3));

        store.deactivate_assignment(tenant).await;
        assert!(store.active_assignment(tenant).await.unwrap().is_none());
        assert_eq!(store.lookup_count(), 3);
    }
}
