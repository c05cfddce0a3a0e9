//! Umbrella (shared voice account) resolution
//!
//! Maps a tenant to its shared voice-calling account through a moka cache keyed
//! by tenant id with a fixed 30 second TTL. Cache entries hold the credential
//! re-encrypted under a fresh nonce, never in cleartext; every read decrypts.
//!
//! ```text
//! resolve(tenant) ──► cache hit? ──yes──► decrypt ──► UmbrellaMapping
//!                        │
//!                        no
//!                        ▼
//!              store.active_assignment ──none──► NoActiveAssignment
//!                        │
//!                 decrypt, re-encrypt ──► cache.insert ──► UmbrellaMapping
//! ```
//!
//! Administrative migrations call [`UmbrellaResolver::invalidate`] (or
//! [`UmbrellaResolver::migrate_tenant`]) so the next resolution sees the new
//! assignment without waiting for the TTL. Each invalidation bumps a per-tenant
//! generation; a miss that read the store under an older generation drops the
//! entry it just cached instead of letting it outlive the invalidation.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use super::cipher::{CipherError, CredentialCipher};
use crate::constants::{UMBRELLA_CACHE_MAX_CAPACITY, UMBRELLA_CACHE_TTL};
use crate::database::{StoreError, UmbrellaAssignmentStore};
use crate::models::{UmbrellaAssignment, UmbrellaMapping};

#[derive(Error, Debug)]
pub enum CapacityError {
    #[error("Tenant {tenant_id} has no active shared voice account assignment")]
    NoActiveAssignment { tenant_id: Uuid },

    #[error("Credential error: {0}")]
    Credential(#[from] CipherError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type CapacityResult<T> = Result<T, CapacityError>;

/// Tenant-to-umbrella resolution used by dispatch and admission control
#[async_trait]
pub trait CapacityResolver: Send + Sync {
    async fn resolve(&self, tenant_id: Uuid) -> CapacityResult<UmbrellaMapping>;

    /// Drop any cached mapping for the tenant
    async fn invalidate(&self, tenant_id: Uuid);
}

/// Cached form of a mapping; the credential stays encrypted at rest
#[derive(Clone)]
struct CachedUmbrella {
    umbrella_id: Uuid,
    account_type: String,
    encrypted_credential: String,
    concurrency_limit: u32,
    tenant_cap: u32,
    priority_weight: i32,
}

pub struct UmbrellaResolver {
    store: Arc<dyn UmbrellaAssignmentStore>,
    cipher: Arc<dyn CredentialCipher>,
    cache: moka::future::Cache<Uuid, CachedUmbrella>,
    generations: DashMap<Uuid, u64>,
    ttl: Duration,
}

impl std::fmt::Debug for UmbrellaResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UmbrellaResolver")
            .field("max_capacity", &self.cache.policy().max_capacity())
            .field("entry_count", &self.cache.entry_count())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl UmbrellaResolver {
    pub fn new(store: Arc<dyn UmbrellaAssignmentStore>, cipher: Arc<dyn CredentialCipher>) -> Self {
        Self::with_cache_settings(store, cipher, UMBRELLA_CACHE_MAX_CAPACITY, UMBRELLA_CACHE_TTL)
    }

    pub fn with_cache_settings(
        store: Arc<dyn UmbrellaAssignmentStore>,
        cipher: Arc<dyn CredentialCipher>,
        max_capacity: u64,
        ttl: Duration,
    ) -> Self {
        let cache = moka::future::Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();

        debug!(
            max_capacity = max_capacity,
            ttl_seconds = ttl.as_secs(),
            "Umbrella resolver cache created"
        );

        Self {
            store,
            cipher,
            cache,
            generations: DashMap::new(),
            ttl,
        }
    }

    /// Reassign a tenant to another shared account and make the change
    /// visible to the very next resolution
    pub async fn migrate_tenant(
        &self,
        tenant_id: Uuid,
        umbrella_id: Uuid,
        tenant_concurrency_cap: Option<i32>,
        priority_weight: i32,
    ) -> CapacityResult<()> {
        self.store
            .reassign_tenant(tenant_id, umbrella_id, tenant_concurrency_cap, priority_weight)
            .await?;
        self.invalidate(tenant_id).await;

        info!(
            tenant_id = %tenant_id,
            umbrella_id = %umbrella_id,
            "Tenant migrated to new shared voice account"
        );
        Ok(())
    }

    fn mapping_from_cached(
        &self,
        tenant_id: Uuid,
        cached: &CachedUmbrella,
    ) -> CapacityResult<UmbrellaMapping> {
        Ok(UmbrellaMapping {
            umbrella_id: cached.umbrella_id,
            tenant_id,
            account_type: cached.account_type.clone(),
            credential: self.cipher.decrypt(&cached.encrypted_credential)?,
            concurrency_limit: cached.concurrency_limit,
            tenant_cap: cached.tenant_cap,
            priority_weight: cached.priority_weight,
        })
    }

    fn generation(&self, tenant_id: Uuid) -> u64 {
        self.generations.get(&tenant_id).map(|g| *g).unwrap_or(0)
    }

    async fn load(&self, tenant_id: Uuid) -> CapacityResult<UmbrellaMapping> {
        let generation = self.generation(tenant_id);
        let assignment = self
            .store
            .active_assignment(tenant_id)
            .await?
            .ok_or(CapacityError::NoActiveAssignment { tenant_id })?;

        let credential = self.cipher.decrypt(&assignment.encrypted_credential)?;
        let (concurrency_limit, tenant_cap) = effective_limits(&assignment);

        let cached = CachedUmbrella {
            umbrella_id: assignment.umbrella_id,
            account_type: assignment.account_type.clone(),
            encrypted_credential: self.cipher.encrypt(&credential)?,
            concurrency_limit,
            tenant_cap,
            priority_weight: assignment.priority_weight,
        };
        self.cache.insert(tenant_id, cached).await;
        // An invalidation that raced the store read must not leave this entry behind
        if self.generation(tenant_id) != generation {
            self.cache.invalidate(&tenant_id).await;
            debug!(tenant_id = %tenant_id, "Umbrella cache fill discarded after invalidation");
        }

        Ok(UmbrellaMapping {
            umbrella_id: assignment.umbrella_id,
            tenant_id,
            account_type: assignment.account_type,
            credential,
            concurrency_limit,
            tenant_cap,
            priority_weight: assignment.priority_weight,
        })
    }
}

/// Shared limit and the tenant's cap within it; a missing cap means the
/// tenant may use the whole shared limit
fn effective_limits(assignment: &UmbrellaAssignment) -> (u32, u32) {
    let limit = u32::try_from(assignment.concurrency_limit).unwrap_or(0);
    let cap = assignment
        .tenant_concurrency_cap
        .map(|cap| u32::try_from(cap).unwrap_or(0))
        .unwrap_or(limit)
        .min(limit);
    (limit, cap)
}

#[async_trait]
impl CapacityResolver for UmbrellaResolver {
    async fn resolve(&self, tenant_id: Uuid) -> CapacityResult<UmbrellaMapping> {
        if let Some(cached) = self.cache.get(&tenant_id).await {
            debug!(tenant_id = %tenant_id, "Umbrella cache HIT");
            return self.mapping_from_cached(tenant_id, &cached);
        }

        debug!(tenant_id = %tenant_id, "Umbrella cache MISS");
        self.load(tenant_id).await
    }

    async fn invalidate(&self, tenant_id: Uuid) {
        *self.generations.entry(tenant_id).or_insert(0) += 1;
        self.cache.invalidate(&tenant_id).await;
        debug!(tenant_id = %tenant_id, "Umbrella cache entry invalidated");
    }
}
