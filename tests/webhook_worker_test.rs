mod common;

use serde_json::json;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

use common::TestHarness;
use outreach_core::database::EnrollmentStore;
use outreach_core::messaging::{
    enqueue_json, CallDisposition, DeliveryStatus, JobQueue, WebhookEvent, WebhookEventJob,
};
use outreach_core::models::{Contact, Enrollment, PhoneType};
use outreach_core::orchestration::{PollSummary, WebhookWorker};
use outreach_core::state_machine::EnrollmentStatus;

fn worker(h: &TestHarness, concurrency: usize) -> WebhookWorker {
    WebhookWorker::new(h.queue.clone(), h.processor.clone(), h.queues.clone(), concurrency)
}

#[tokio::test]
async fn test_handled_events_are_acked() {
    let h = TestHarness::new();
    let tenant = Uuid::new_v4();
    let contact = Contact::new(tenant).with_phone("+15550100", PhoneType::Mobile);
    let enrollment = h.enroll(&contact, Uuid::new_v4(), 1).await;

    let reply = WebhookEventJob::new(
        tenant,
        Some(enrollment.enrollment_id),
        WebhookEvent::SmsReply {
            body: "unsubscribe".to_string(),
            intent: None,
        },
    );
    enqueue_json(h.queue.as_ref(), &h.queues.webhook_events, &reply)
        .await
        .unwrap();

    let summary = worker(&h, 4).poll_once().await.unwrap();
    assert_eq!(
        summary,
        PollSummary {
            received: 1,
            acked: 1,
            malformed: 0,
            retried: 0
        }
    );
    assert!(h.queue.is_empty(&h.queues.webhook_events).await);
    assert_eq!(
        h.reload(enrollment.enrollment_id).await.status,
        EnrollmentStatus::ManualStop
    );
}

#[tokio::test]
async fn test_malformed_call_outcome_is_acked_after_slot_release() {
    let h = TestHarness::new();
    let tenant = Uuid::new_v4();
    let umbrella = Uuid::new_v4();
    h.queue
        .enqueue(
            &h.queues.webhook_events,
            &json!({
                "type": "call-outcome",
                "tenantId": tenant,
                "umbrellaId": umbrella,
                "disposition": { "unexpected": true }
            }),
        )
        .await
        .unwrap();
    h.queue
        .enqueue(&h.queues.webhook_events, &json!({ "type": "fax-received" }))
        .await
        .unwrap();

    let summary = worker(&h, 4).poll_once().await.unwrap();
    assert_eq!(summary.malformed, 2);
    assert!(h.queue.is_empty(&h.queues.webhook_events).await);
    assert_eq!(h.admission.releases(), vec![(umbrella, tenant)]);
}

#[tokio::test]
async fn test_processing_failure_is_left_for_redelivery() {
    let h = TestHarness::new();
    let tenant = Uuid::new_v4();
    // Contact never stored: healing cannot load it
    let contact = Contact::new(tenant).with_phone("+15550100", PhoneType::Mobile);
    let mut enrollment = Enrollment::new(tenant, contact.contact_id, Uuid::new_v4());
    enrollment.current_step = 1;
    h.enrollments.insert(&enrollment).await.unwrap();

    let job = WebhookEventJob::new(
        tenant,
        Some(enrollment.enrollment_id),
        WebhookEvent::SmsDelivery {
            status: DeliveryStatus::Failed,
            error_code: None,
        },
    );
    enqueue_json(h.queue.as_ref(), &h.queues.webhook_events, &job)
        .await
        .unwrap();

    let summary = worker(&h, 1).poll_once().await.unwrap();
    assert_eq!(summary.retried, 1);
    assert_eq!(h.queue.len(&h.queues.webhook_events).await, 1);
}

#[tokio::test]
async fn test_redelivered_call_outcome_releases_slot_once() {
    let h = TestHarness::new();
    let tenant = Uuid::new_v4();
    let umbrella = Uuid::new_v4();
    // Contact never stored: healing fails and the job is redelivered
    let contact = Contact::new(tenant).with_phone("+15550100", PhoneType::Mobile);
    let mut enrollment = Enrollment::new(tenant, contact.contact_id, Uuid::new_v4());
    enrollment.current_step = 1;
    h.enrollments.insert(&enrollment).await.unwrap();

    let job = WebhookEventJob::new(
        tenant,
        Some(enrollment.enrollment_id),
        WebhookEvent::CallOutcome {
            disposition: CallDisposition::NoAnswer,
            appointment_booked: false,
            umbrella_id: Some(umbrella),
            call_id: None,
        },
    );
    enqueue_json(h.queue.as_ref(), &h.queues.webhook_events, &job)
        .await
        .unwrap();

    let mut queues = h.queues.clone();
    queues.visibility_timeout_seconds = 0;
    let consumer = WebhookWorker::new(h.queue.clone(), h.processor.clone(), queues, 1);
    for _ in 0..3 {
        assert_eq!(consumer.poll_once().await.unwrap().retried, 1);
    }

    assert_eq!(h.admission.releases(), vec![(umbrella, tenant)]);
    assert_eq!(h.queue.len(&h.queues.webhook_events).await, 1);
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let h = TestHarness::new();
    let consumer = worker(&h, 2);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let run = tokio::spawn(async move { consumer.run(shutdown_rx).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown_tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("worker did not stop")
        .unwrap();
}
