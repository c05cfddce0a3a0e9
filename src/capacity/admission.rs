//! Voice concurrency admission control
//!
//! A slot is held per in-flight call. `acquire` checks both the tenant's cap
//! and the shared account's limit resolved for that tenant; `release` gives
//! the slot back and never drops a counter below zero. Because a duplicate
//! release would still free a slot held by another call, callers that may see
//! the same call outcome twice gate releases through [`ReleasedCalls`].

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::resolver::CapacityResolver;
use crate::constants::{RELEASED_CALL_MAX_ENTRIES, RELEASED_CALL_RETENTION};

#[async_trait]
pub trait AdmissionControl: Send + Sync {
    /// Try to take one call slot; `false` means the budget is exhausted
    async fn acquire(&self, umbrella_id: Uuid, tenant_id: Uuid) -> bool;

    async fn release(&self, umbrella_id: Uuid, tenant_id: Uuid);
}

/// Slot counters for a single process
pub struct InProcessAdmissionControl {
    resolver: Arc<dyn CapacityResolver>,
    umbrella_in_use: DashMap<Uuid, u32>,
    tenant_in_use: DashMap<(Uuid, Uuid), u32>,
}

impl std::fmt::Debug for InProcessAdmissionControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessAdmissionControl")
            .field("umbrellas", &self.umbrella_in_use.len())
            .field("tenants", &self.tenant_in_use.len())
            .finish()
    }
}

impl InProcessAdmissionControl {
    pub fn new(resolver: Arc<dyn CapacityResolver>) -> Self {
        Self {
            resolver,
            umbrella_in_use: DashMap::new(),
            tenant_in_use: DashMap::new(),
        }
    }

    pub fn in_use(&self, umbrella_id: Uuid) -> u32 {
        self.umbrella_in_use
            .get(&umbrella_id)
            .map(|count| *count)
            .unwrap_or(0)
    }

    pub fn tenant_in_use(&self, umbrella_id: Uuid, tenant_id: Uuid) -> u32 {
        self.tenant_in_use
            .get(&(umbrella_id, tenant_id))
            .map(|count| *count)
            .unwrap_or(0)
    }
}

#[async_trait]
impl AdmissionControl for InProcessAdmissionControl {
    async fn acquire(&self, umbrella_id: Uuid, tenant_id: Uuid) -> bool {
        let mapping = match self.resolver.resolve(tenant_id).await {
            Ok(mapping) => mapping,
            Err(e) => {
                warn!(tenant_id = %tenant_id, error = %e, "Admission denied: umbrella unresolved");
                return false;
            }
        };
        if mapping.umbrella_id != umbrella_id {
            warn!(
                tenant_id = %tenant_id,
                requested = %umbrella_id,
                assigned = %mapping.umbrella_id,
                "Admission denied: tenant is assigned to another umbrella"
            );
            return false;
        }

        // Umbrella entry is locked first, then the tenant entry, on every path
        let mut umbrella_count = self.umbrella_in_use.entry(umbrella_id).or_insert(0);
        let mut tenant_count = self
            .tenant_in_use
            .entry((umbrella_id, tenant_id))
            .or_insert(0);

        if *umbrella_count >= mapping.concurrency_limit || *tenant_count >= mapping.tenant_cap {
            debug!(
                umbrella_id = %umbrella_id,
                tenant_id = %tenant_id,
                umbrella_in_use = *umbrella_count,
                tenant_in_use = *tenant_count,
                "Admission denied: concurrency budget exhausted"
            );
            return false;
        }

        *umbrella_count += 1;
        *tenant_count += 1;
        true
    }

    async fn release(&self, umbrella_id: Uuid, tenant_id: Uuid) {
        if let Some(mut umbrella_count) = self.umbrella_in_use.get_mut(&umbrella_id) {
            *umbrella_count = umbrella_count.saturating_sub(1);
            if let Some(mut tenant_count) = self.tenant_in_use.get_mut(&(umbrella_id, tenant_id)) {
                *tenant_count = tenant_count.saturating_sub(1);
            }
        }
        debug!(umbrella_id = %umbrella_id, tenant_id = %tenant_id, "Voice slot released");
    }
}

/// Calls whose slot has already been returned
pub struct ReleasedCalls {
    released: moka::future::Cache<String, ()>,
}

impl std::fmt::Debug for ReleasedCalls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleasedCalls")
            .field("entry_count", &self.released.entry_count())
            .finish()
    }
}

impl Default for ReleasedCalls {
    fn default() -> Self {
        Self::with_retention(RELEASED_CALL_MAX_ENTRIES, RELEASED_CALL_RETENTION)
    }
}

impl ReleasedCalls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(max_entries: u64, retention: Duration) -> Self {
        Self {
            released: moka::future::Cache::builder()
                .max_capacity(max_entries)
                .time_to_live(retention)
                .build(),
        }
    }

    /// Claim the release for `key`; only the first claim returns `true`
    pub async fn claim(&self, key: &str) -> bool {
        self.released
            .entry(key.to_string())
            .or_insert(())
            .await
            .is_fresh()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::resolver::CapacityResult;
    use crate::models::{Credential, UmbrellaMapping};

    struct FixedResolver {
        mapping: UmbrellaMapping,
    }

    #[async_trait]
    impl CapacityResolver for FixedResolver {
        async fn resolve(&self, tenant_id: Uuid) -> CapacityResult<UmbrellaMapping> {
            Ok(UmbrellaMapping {
                tenant_id,
                ..self.mapping.clone()
            })
        }

        async fn invalidate(&self, _tenant_id: Uuid) {}
    }

    fn control(limit: u32, cap: u32) -> (InProcessAdmissionControl, Uuid) {
        let umbrella_id = Uuid::new_v4();
        let resolver = FixedResolver {
            mapping: UmbrellaMapping {
                umbrella_id,
                tenant_id: Uuid::nil(),
                account_type: "vapi".to_string(),
                credential: Credential::new("secret"),
                concurrency_limit: limit,
                tenant_cap: cap,
                priority_weight: 1,
            },
        };
        (InProcessAdmissionControl::new(Arc::new(resolver)), umbrella_id)
    }

    #[tokio::test]
    async fn test_tenant_cap_is_enforced() {
        let (admission, umbrella) = control(10, 2);
        let tenant = Uuid::new_v4();

        assert!(admission.acquire(umbrella, tenant).await);
        assert!(admission.acquire(umbrella, tenant).await);
        assert!(!admission.acquire(umbrella, tenant).await);

        admission.release(umbrella, tenant).await;
        assert!(admission.acquire(umbrella, tenant).await);
    }

    #[tokio::test]
    async fn test_shared_limit_spans_tenants() {
        let (admission, umbrella) = control(3, 2);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert!(admission.acquire(umbrella, a).await);
        assert!(admission.acquire(umbrella, a).await);
        assert!(admission.acquire(umbrella, b).await);
        assert!(!admission.acquire(umbrella, b).await);
        assert_eq!(admission.in_use(umbrella), 3);
    }

    #[tokio::test]
    async fn test_release_never_underflows() {
        let (admission, umbrella) = control(3, 3);
        let tenant = Uuid::new_v4();

        admission.release(umbrella, tenant).await;
        assert!(admission.acquire(umbrella, tenant).await);
        admission.release(umbrella, tenant).await;
        admission.release(umbrella, tenant).await;

        assert_eq!(admission.in_use(umbrella), 0);
        assert_eq!(admission.tenant_in_use(umbrella, tenant), 0);
    }

    #[tokio::test]
    async fn test_wrong_umbrella_is_denied() {
        let (admission, _) = control(3, 3);
        assert!(!admission.acquire(Uuid::new_v4(), Uuid::new_v4()).await);
    }

    #[tokio::test]
    async fn test_release_claim_is_granted_once_per_key() {
        let released = ReleasedCalls::new();

        assert!(released.claim("call:a").await);
        assert!(!released.claim("call:a").await);
        assert!(released.claim("call:b").await);
    }
}
