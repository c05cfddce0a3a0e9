//! Umbrella resolution, reassignment and call-slot accounting.

mod common;

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use common::TestHarness;
use outreach_core::capacity::{
    AdmissionControl, AesGcmCredentialCipher, CapacityResolver, CredentialCipher,
    InProcessAdmissionControl, UmbrellaResolver,
};
use outreach_core::database::{InMemoryUmbrellaStore, UmbrellaAssignmentStore};
use outreach_core::messaging::{CallDisposition, WebhookEvent, WebhookEventJob};
use outreach_core::models::Credential;
use outreach_core::orchestration::EventOutcome;

const KEY: &str = "integration-test-key-material";

async fn store_with_accounts(
    cipher: &AesGcmCredentialCipher,
) -> (Arc<InMemoryUmbrellaStore>, Uuid, Uuid) {
    let store = Arc::new(InMemoryUmbrellaStore::new());
    let old = Uuid::new_v4();
    let new = Uuid::new_v4();
    store
        .add_account(old, "vapi", cipher.encrypt(&Credential::new("old-secret")).unwrap(), 10)
        .await;
    store
        .add_account(new, "vapi", cipher.encrypt(&Credential::new("new-secret")).unwrap(), 4)
        .await;
    (store, old, new)
}

#[tokio::test]
async fn test_invalidation_makes_reassignment_visible_before_ttl() {
    let cipher = Arc::new(AesGcmCredentialCipher::new(KEY).unwrap());
    let (store, old, new) = store_with_accounts(&cipher).await;
    let tenant = Uuid::new_v4();
    store.reassign_tenant(tenant, old, Some(3), 1).await.unwrap();

    let resolver = UmbrellaResolver::with_cache_settings(
        store.clone(),
        cipher,
        100,
        Duration::from_secs(3600),
    );
    assert_eq!(resolver.resolve(tenant).await.unwrap().umbrella_id, old);

    // Administrator moves the tenant behind the resolver's back
    store.reassign_tenant(tenant, new, None, 2).await.unwrap();
    assert_eq!(resolver.resolve(tenant).await.unwrap().umbrella_id, old);

    resolver.invalidate(tenant).await;
    let mapping = resolver.resolve(tenant).await.unwrap();
    assert_eq!(mapping.umbrella_id, new);
    assert_eq!(mapping.credential.expose(), "new-secret");
    assert_eq!(mapping.tenant_cap, 4);
    assert_eq!(mapping.priority_weight, 2);
}

#[tokio::test]
async fn test_migrate_tenant_invalidates_in_one_step() {
    let cipher = Arc::new(AesGcmCredentialCipher::new(KEY).unwrap());
    let (store, old, new) = store_with_accounts(&cipher).await;
    let tenant = Uuid::new_v4();
    store.reassign_tenant(tenant, old, None, 1).await.unwrap();

    let resolver = UmbrellaResolver::new(store, cipher);
    resolver.resolve(tenant).await.unwrap();
    resolver.migrate_tenant(tenant, new, Some(2), 1).await.unwrap();

    let mapping = resolver.resolve(tenant).await.unwrap();
    assert_eq!(mapping.umbrella_id, new);
    assert_eq!(mapping.tenant_cap, 2);
}

#[tokio::test]
async fn test_slots_are_shared_across_tenants_and_returned_on_release() {
    let cipher = Arc::new(AesGcmCredentialCipher::new(KEY).unwrap());
    let (store, _, shared) = store_with_accounts(&cipher).await;
    let tenants: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
    for tenant in &tenants {
        store.reassign_tenant(*tenant, shared, Some(2), 1).await.unwrap();
    }
    let resolver: Arc<dyn CapacityResolver> = Arc::new(UmbrellaResolver::new(store, cipher));
    let admission = InProcessAdmissionControl::new(resolver);

    // Shared limit is 4, each tenant capped at 2
    assert!(admission.acquire(shared, tenants[0]).await);
    assert!(admission.acquire(shared, tenants[0]).await);
    assert!(!admission.acquire(shared, tenants[0]).await);
    assert!(admission.acquire(shared, tenants[1]).await);
    assert!(admission.acquire(shared, tenants[1]).await);
    assert!(!admission.acquire(shared, tenants[2]).await);
    assert_eq!(admission.in_use(shared), 4);

    admission.release(shared, tenants[0]).await;
    assert!(admission.acquire(shared, tenants[2]).await);
    assert_eq!(admission.tenant_in_use(shared, tenants[2]), 1);
}

#[tokio::test]
async fn test_call_outcome_without_enrollment_releases_slot() {
    let h = TestHarness::new();
    let tenant = Uuid::new_v4();
    let umbrella = Uuid::new_v4();
    let job = WebhookEventJob::new(
        tenant,
        None,
        WebhookEvent::CallOutcome {
            disposition: CallDisposition::Busy,
            appointment_booked: false,
            umbrella_id: Some(umbrella),
            call_id: None,
        },
    );

    let outcome = h.processor.handle_event(&job).await.unwrap();
    assert!(matches!(outcome, EventOutcome::Ignored { .. }));
    assert_eq!(h.admission.releases(), vec![(umbrella, tenant)]);
}

#[tokio::test]
async fn test_call_outcome_for_unknown_enrollment_releases_slot() {
    let h = TestHarness::new();
    let tenant = Uuid::new_v4();
    let job = WebhookEventJob::new(
        tenant,
        Some(Uuid::new_v4()),
        WebhookEvent::CallOutcome {
            disposition: CallDisposition::Answered,
            appointment_booked: true,
            umbrella_id: None,
            call_id: Some("call_1".to_string()),
        },
    );

    let outcome = h.processor.handle_event(&job).await.unwrap();
    assert!(matches!(outcome, EventOutcome::Ignored { .. }));
    assert_eq!(h.admission.releases(), vec![(h.umbrella_id, tenant)]);
}

#[tokio::test]
async fn test_malformed_call_outcome_without_tenant_releases_nothing() {
    let h = TestHarness::new();
    let released = h
        .processor
        .release_call_slot_from_raw(None, &json!({ "type": "call-outcome", "tenantId": "not-a-uuid" }))
        .await;

    assert!(!released);
    assert!(h.admission.releases().is_empty());
}
