//! # Enrollment Event Processor
//!
//! Consumes normalized provider webhook events and drives the enrollment
//! lifecycle.
//!
//! ## Event contract
//!
//! | event           | effect                                                    |
//! |-----------------|-----------------------------------------------------------|
//! | `call-outcome`  | release the call slot first, then count the call; booked → `booked`; no-answer/busy/failed/error → heal; answered or voicemail → recorded |
//! | `sms-reply`     | `stop` → `manual_stop`; `not_interested` → `completed`; anything else flags the reply for a human |
//! | `sms-delivery`  | `failed`/`undelivered` → heal; other statuses recorded     |
//! | `email-opened`, `email-clicked` | engagement timestamp only                 |
//! | `email-bounced` | heal with `email_bounced`                                 |
//!
//! ## Concurrency
//!
//! Everything that touches one enrollment runs under that enrollment's lock
//! from [`EnrollmentLocks`]. Writers in other processes are detected by the
//! enrollment version; the handler is reloaded and re-run up to
//! [`MAX_VERSION_CONFLICT_RETRIES`] times before the conflict is handed back
//! to the job queue.
//!
//! Terminal enrollments ignore every event apart from the slot release.

use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::enrollment_locks::EnrollmentLocks;
use super::failure_diagnosis::FailureDiagnosis;
use super::healing_executor::{FailureSignal, HealingError, HealingExecutor, HealingOutcome};
use super::reply_intent::ReplyIntentClassifier;
use crate::capacity::{AdmissionControl, CapacityResolver, ReleasedCalls};
use crate::constants::MAX_VERSION_CONFLICT_RETRIES;
use crate::database::{CoreStores, StoreError};
use crate::events::{EventPublisher, LifecycleEvent};
use crate::messaging::{CallDisposition, DeliveryStatus, ReplyIntent, WebhookEvent, WebhookEventJob};
use crate::models::{
    AlternateContact, Channel, Contact, ConversionMetadata, Enrollment, FailureType,
    HealingAction,
};
use crate::state_machine::{
    EnrollmentEvent, EnrollmentStateMachine, StateMachineError, StatusTransition,
};

#[derive(Error, Debug)]
pub enum EventError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Healing error: {0}")]
    Healing(#[from] HealingError),

    #[error("State machine error: {0}")]
    StateMachine(#[from] StateMachineError),

    #[error("Enrollment {enrollment_id} not found")]
    EnrollmentNotFound { enrollment_id: Uuid },

    #[error("Contact {contact_id} not found")]
    ContactNotFound { contact_id: Uuid },
}

impl EventError {
    pub fn is_version_conflict(&self) -> bool {
        match self {
            Self::Store(e) => e.is_version_conflict(),
            Self::Healing(e) => e.is_version_conflict(),
            _ => false,
        }
    }
}

pub type EventResult<T> = Result<T, EventError>;

/// What handling one event amounted to
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    /// Nothing was changed
    Ignored { reason: String },
    /// Counters or engagement data were written; status unchanged
    Recorded,
    Transitioned(StatusTransition),
    Healed(HealingOutcome),
}

pub struct EnrollmentEventProcessor {
    stores: CoreStores,
    diagnosis: Arc<dyn FailureDiagnosis>,
    executor: Arc<HealingExecutor>,
    resolver: Arc<dyn CapacityResolver>,
    admission: Arc<dyn AdmissionControl>,
    classifier: Arc<dyn ReplyIntentClassifier>,
    publisher: EventPublisher,
    locks: EnrollmentLocks,
    released_calls: ReleasedCalls,
    state_machine: EnrollmentStateMachine,
}

impl std::fmt::Debug for EnrollmentEventProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrollmentEventProcessor")
            .field("diagnosis", &self.diagnosis.strategy_name())
            .field("active_locks", &self.locks.active())
            .finish()
    }
}

impl EnrollmentEventProcessor {
    pub fn new(
        stores: CoreStores,
        diagnosis: Arc<dyn FailureDiagnosis>,
        executor: Arc<HealingExecutor>,
        resolver: Arc<dyn CapacityResolver>,
        admission: Arc<dyn AdmissionControl>,
        classifier: Arc<dyn ReplyIntentClassifier>,
        publisher: EventPublisher,
    ) -> Self {
        Self {
            stores,
            diagnosis,
            executor,
            resolver,
            admission,
            classifier,
            publisher,
            locks: EnrollmentLocks::new(),
            released_calls: ReleasedCalls::new(),
            state_machine: EnrollmentStateMachine::new(),
        }
    }

    /// Handle one webhook event job
    pub async fn handle_event(&self, job: &WebhookEventJob) -> EventResult<EventOutcome> {
        self.handle_delivery(job, None).await
    }

    /// Handle one job read from the webhook-event queue. Redeliveries of the
    /// same message release the call slot only once.
    pub async fn handle_queued(
        &self,
        msg_id: i64,
        job: &WebhookEventJob,
    ) -> EventResult<EventOutcome> {
        self.handle_delivery(job, Some(msg_id)).await
    }

    async fn handle_delivery(
        &self,
        job: &WebhookEventJob,
        msg_id: Option<i64>,
    ) -> EventResult<EventOutcome> {
        if let WebhookEvent::CallOutcome {
            umbrella_id,
            call_id,
            ..
        } = &job.event
        {
            let key = release_key(job.tenant_id, call_id.as_deref(), msg_id);
            self.release_call_slot(job.tenant_id, *umbrella_id, key).await;
        }

        let Some(enrollment_id) = job.enrollment_id else {
            debug!(
                tenant_id = %job.tenant_id,
                event_type = job.event.event_type(),
                "Event carries no enrollment id"
            );
            return Ok(ignored("event carries no enrollment id"));
        };

        let outcome = self
            .retry_on_conflict(enrollment_id, || Box::pin(self.apply_event(enrollment_id, job)))
            .await?;

        info!(
            enrollment_id = %enrollment_id,
            tenant_id = %job.tenant_id,
            event_type = job.event.event_type(),
            outcome = outcome_name(&outcome),
            "Webhook event processed"
        );
        Ok(outcome)
    }

    /// Route a failure detected outside the webhook path (for example by the
    /// scheduler's pre-dispatch validity check) into diagnosis and healing
    pub async fn report_failure(
        &self,
        tenant_id: Uuid,
        enrollment_id: Uuid,
        step_id: Option<Uuid>,
        failure_type: FailureType,
        details: Value,
    ) -> EventResult<EventOutcome> {
        self.retry_on_conflict(enrollment_id, || {
            let signal = FailureSignal::new(failure_type.clone())
                .for_step(step_id)
                .with_details(details.clone());
            Box::pin(async move {
                let Some(mut enrollment) = self.load_for_tenant(enrollment_id, tenant_id).await?
                else {
                    return Ok(ignored("enrollment not found for tenant"));
                };
                if enrollment.is_terminal() {
                    return Ok(terminal_ignored(&enrollment));
                }
                self.heal(&mut enrollment, signal).await
            })
        })
        .await
    }

    /// Operator-supplied alternate phone or email for the current step
    pub async fn use_alternative_contact(
        &self,
        enrollment_id: Uuid,
        failure_type: FailureType,
        alternate: AlternateContact,
        reason: impl Into<String>,
    ) -> EventResult<HealingOutcome> {
        let reason = reason.into();
        self.retry_on_conflict(enrollment_id, || {
            let signal = FailureSignal::new(failure_type.clone());
            let action = HealingAction::UseAlternativeContact {
                alternate: alternate.clone(),
                reason: reason.clone(),
            };
            Box::pin(async move {
                let mut enrollment = self.load(enrollment_id).await?;
                if !enrollment.status.accepts_healing() {
                    return Err(EventError::StateMachine(StateMachineError::InvalidTransition {
                        from: enrollment.status,
                        event: "use_alternative_contact".to_string(),
                    }));
                }
                let mut contact = self.load_contact(&enrollment).await?;
                let step = self.executor.load_step(&enrollment, None).await?;
                Ok(self
                    .executor
                    .apply(&mut enrollment, &mut contact, step.as_ref(), &signal, action)
                    .await?)
            })
        })
        .await
    }

    pub async fn pause(&self, enrollment_id: Uuid) -> EventResult<StatusTransition> {
        self.operator_transition(enrollment_id, EnrollmentEvent::Pause).await
    }

    pub async fn resume(&self, enrollment_id: Uuid) -> EventResult<StatusTransition> {
        self.operator_transition(enrollment_id, EnrollmentEvent::Resume).await
    }

    pub async fn unenroll(&self, enrollment_id: Uuid) -> EventResult<StatusTransition> {
        self.operator_transition(enrollment_id, EnrollmentEvent::Unenroll).await
    }

    /// Hand the enrollment to a human after a reply
    pub async fn mark_replied(&self, enrollment_id: Uuid) -> EventResult<StatusTransition> {
        self.operator_transition(enrollment_id, EnrollmentEvent::MarkReplied).await
    }

    /// Release the call slot of a call-outcome payload that could not be
    /// decoded. Returns whether the payload identified a slot to release.
    pub async fn release_call_slot_from_raw(&self, msg_id: Option<i64>, payload: &Value) -> bool {
        if payload.get("type").and_then(Value::as_str) != Some("call-outcome") {
            return false;
        }
        let uuid_field = |key: &str| {
            payload
                .get(key)
                .and_then(Value::as_str)
                .and_then(|raw| Uuid::parse_str(raw).ok())
        };
        let Some(tenant_id) = uuid_field("tenantId") else {
            warn!("Malformed call-outcome without a tenant id; call slot cannot be released");
            return false;
        };
        let call_id = payload.get("callId").and_then(Value::as_str);
        let key = release_key(tenant_id, call_id, msg_id);
        self.release_call_slot(tenant_id, uuid_field("umbrellaId"), key).await;
        true
    }

    /// Release the tenant's call slot on the umbrella that placed the call,
    /// falling back to the tenant's current umbrella. A keyed release happens
    /// at most once per key.
    async fn release_call_slot(
        &self,
        tenant_id: Uuid,
        umbrella_id: Option<Uuid>,
        key: Option<String>,
    ) {
        let umbrella_id = match umbrella_id {
            Some(id) => id,
            None => match self.resolver.resolve(tenant_id).await {
                Ok(mapping) => mapping.umbrella_id,
                Err(e) => {
                    error!(
                        tenant_id = %tenant_id,
                        error = %e,
                        "Cannot resolve umbrella to release call slot"
                    );
                    return;
                }
            },
        };
        if let Some(key) = &key {
            if !self.released_calls.claim(key).await {
                debug!(
                    tenant_id = %tenant_id,
                    release_key = %key,
                    "Call slot already released for this call"
                );
                return;
            }
        }
        self.admission.release(umbrella_id, tenant_id).await;
        debug!(tenant_id = %tenant_id, umbrella_id = %umbrella_id, "Call slot released");
    }

    async fn retry_on_conflict<'f, T, F>(&self, enrollment_id: Uuid, mut run: F) -> EventResult<T>
    where
        F: FnMut() -> BoxFuture<'f, EventResult<T>>,
    {
        let _guard = self.locks.lock(enrollment_id).await;
        let mut retries = 0;
        loop {
            match run().await {
                Err(e) if e.is_version_conflict() && retries < MAX_VERSION_CONFLICT_RETRIES => {
                    retries += 1;
                    warn!(
                        enrollment_id = %enrollment_id,
                        retry = retries,
                        "Enrollment modified concurrently; reloading"
                    );
                }
                result => return result,
            }
        }
    }

    async fn operator_transition(
        &self,
        enrollment_id: Uuid,
        event: EnrollmentEvent,
    ) -> EventResult<StatusTransition> {
        self.retry_on_conflict(enrollment_id, || {
            let event = event.clone();
            Box::pin(async move {
                let mut enrollment = self.load(enrollment_id).await?;
                let transition = self.state_machine.transition(&mut enrollment, &event)?;
                self.stores.enrollments.update(&mut enrollment).await?;

                if transition.became_terminal() {
                    self.publish_terminated(&enrollment, transition, "Operator request");
                }
                info!(
                    enrollment_id = %enrollment_id,
                    event = event.event_type(),
                    from = %transition.from,
                    to = %transition.to,
                    "Operator transition applied"
                );
                Ok(transition)
            })
        })
        .await
    }

    async fn apply_event(
        &self,
        enrollment_id: Uuid,
        job: &WebhookEventJob,
    ) -> EventResult<EventOutcome> {
        let Some(mut enrollment) = self.load_for_tenant(enrollment_id, job.tenant_id).await? else {
            return Ok(ignored("enrollment not found for tenant"));
        };
        if enrollment.is_terminal() {
            return Ok(terminal_ignored(&enrollment));
        }

        match &job.event {
            WebhookEvent::CallOutcome {
                disposition,
                appointment_booked,
                call_id,
                ..
            } => {
                self.on_call_outcome(
                    &mut enrollment,
                    job.step_id,
                    *disposition,
                    *appointment_booked,
                    call_id.as_deref(),
                )
                .await
            }
            WebhookEvent::SmsReply { body, intent } => {
                let intent = intent.unwrap_or_else(|| self.classifier.classify(body));
                self.on_sms_reply(&mut enrollment, intent).await
            }
            WebhookEvent::SmsDelivery { status, error_code } => {
                let failure_type = match status {
                    DeliveryStatus::Failed => FailureType::SmsFailed,
                    DeliveryStatus::Undelivered => FailureType::SmsUndelivered,
                    other => {
                        debug!(enrollment_id = %enrollment_id, status = ?other, "SMS delivery status recorded");
                        return Ok(EventOutcome::Recorded);
                    }
                };
                let signal = FailureSignal::new(failure_type)
                    .on_channel(Channel::Sms)
                    .for_step(job.step_id)
                    .with_details(json!({ "status": status, "error_code": error_code }));
                self.heal(&mut enrollment, signal).await
            }
            WebhookEvent::EmailOpened {} | WebhookEvent::EmailClicked { .. } => {
                enrollment.last_engagement_at = Some(Utc::now());
                self.stores.enrollments.update(&mut enrollment).await?;
                Ok(EventOutcome::Recorded)
            }
            WebhookEvent::EmailBounced {
                hard_bounce,
                reason,
            } => {
                let signal = FailureSignal::new(FailureType::EmailBounced)
                    .on_channel(Channel::Email)
                    .for_step(job.step_id)
                    .with_details(json!({ "hard_bounce": hard_bounce, "reason": reason }));
                self.heal(&mut enrollment, signal).await
            }
        }
    }

    async fn on_call_outcome(
        &self,
        enrollment: &mut Enrollment,
        step_id: Option<Uuid>,
        disposition: CallDisposition,
        appointment_booked: bool,
        call_id: Option<&str>,
    ) -> EventResult<EventOutcome> {
        // Read-then-write; redelivery of the same event counts twice
        enrollment.call_count += 1;
        enrollment.last_call_disposition = Some(disposition.as_str().to_string());

        let failure_type = match disposition {
            CallDisposition::Answered if appointment_booked => {
                let now = Utc::now();
                enrollment.last_engagement_at = Some(now);
                enrollment.conversion = Some(ConversionMetadata {
                    converted_at: now,
                    source: "voice_call".to_string(),
                    call_id: call_id.map(str::to_string),
                    details: json!({ "disposition": disposition.as_str() }),
                });
                let transition = self
                    .state_machine
                    .transition(enrollment, &EnrollmentEvent::Book)?;
                self.stores.enrollments.update(enrollment).await?;

                self.publisher.publish(LifecycleEvent::EnrollmentBooked {
                    enrollment_id: enrollment.enrollment_id,
                    tenant_id: enrollment.tenant_id,
                    call_id: call_id.map(str::to_string),
                });
                return Ok(EventOutcome::Transitioned(transition));
            }
            CallDisposition::Answered => {
                enrollment.last_engagement_at = Some(Utc::now());
                None
            }
            CallDisposition::Voicemail | CallDisposition::Unknown => None,
            CallDisposition::NoAnswer => Some(FailureType::CallNoAnswer),
            CallDisposition::Busy => Some(FailureType::CallBusy),
            CallDisposition::Failed | CallDisposition::Error => Some(FailureType::CallFailed),
        };

        match failure_type {
            Some(failure_type) => {
                let signal = FailureSignal::new(failure_type)
                    .on_channel(Channel::Voice)
                    .for_step(step_id)
                    .with_details(json!({ "disposition": disposition.as_str(), "call_id": call_id }));
                self.heal(enrollment, signal).await
            }
            None => {
                self.stores.enrollments.update(enrollment).await?;
                Ok(EventOutcome::Recorded)
            }
        }
    }

    async fn on_sms_reply(
        &self,
        enrollment: &mut Enrollment,
        intent: ReplyIntent,
    ) -> EventResult<EventOutcome> {
        enrollment.last_engagement_at = Some(Utc::now());

        let (event, reason) = match intent {
            ReplyIntent::Stop => (EnrollmentEvent::Stop, "Contact opted out"),
            ReplyIntent::NotInterested => (EnrollmentEvent::Complete, "Contact not interested"),
            _ => {
                enrollment.contact_replied = true;
                enrollment.needs_human_intervention = true;
                self.stores.enrollments.update(enrollment).await?;

                self.publisher.publish(LifecycleEvent::EnrollmentReplied {
                    enrollment_id: enrollment.enrollment_id,
                    tenant_id: enrollment.tenant_id,
                    intent,
                    notify_human: true,
                });
                return Ok(EventOutcome::Recorded);
            }
        };

        let transition = self.state_machine.transition(enrollment, &event)?;
        self.stores.enrollments.update(enrollment).await?;
        self.publish_terminated(enrollment, transition, reason);
        Ok(EventOutcome::Transitioned(transition))
    }

    /// Diagnose and heal one failure. Replied enrollments keep whatever was
    /// recorded on them but are not healed.
    async fn heal(
        &self,
        enrollment: &mut Enrollment,
        signal: FailureSignal,
    ) -> EventResult<EventOutcome> {
        if !enrollment.status.accepts_healing() {
            self.stores.enrollments.update(enrollment).await?;
            info!(
                enrollment_id = %enrollment.enrollment_id,
                status = %enrollment.status,
                failure_type = %signal.failure_type,
                "Failure recorded without healing"
            );
            return Ok(EventOutcome::Recorded);
        }

        let mut contact = self.load_contact(enrollment).await?;
        let history = self
            .stores
            .audit
            .failure_history(enrollment.enrollment_id)
            .await?;
        let step = self.executor.load_step(enrollment, signal.step_id).await?;

        let action = self
            .diagnosis
            .diagnose(&signal.failure_type, &history, &contact, enrollment);
        debug!(
            enrollment_id = %enrollment.enrollment_id,
            failure_type = %signal.failure_type,
            prior_failures = history.len(),
            action = %action.kind(),
            "Failure diagnosed"
        );

        let outcome = self
            .executor
            .apply(enrollment, &mut contact, step.as_ref(), &signal, action)
            .await?;
        Ok(EventOutcome::Healed(outcome))
    }

    async fn load(&self, enrollment_id: Uuid) -> EventResult<Enrollment> {
        self.stores
            .enrollments
            .find(enrollment_id)
            .await?
            .ok_or(EventError::EnrollmentNotFound { enrollment_id })
    }

    /// The enrollment, if it exists and belongs to `tenant_id`
    async fn load_for_tenant(
        &self,
        enrollment_id: Uuid,
        tenant_id: Uuid,
    ) -> EventResult<Option<Enrollment>> {
        match self.stores.enrollments.find(enrollment_id).await? {
            Some(enrollment) if enrollment.tenant_id == tenant_id => Ok(Some(enrollment)),
            Some(enrollment) => {
                warn!(
                    enrollment_id = %enrollment_id,
                    event_tenant = %tenant_id,
                    owner_tenant = %enrollment.tenant_id,
                    "Event tenant does not own the enrollment"
                );
                Ok(None)
            }
            None => {
                warn!(enrollment_id = %enrollment_id, "Event for unknown enrollment");
                Ok(None)
            }
        }
    }

    async fn load_contact(&self, enrollment: &Enrollment) -> EventResult<Contact> {
        self.stores
            .contacts
            .find(enrollment.contact_id)
            .await?
            .ok_or(EventError::ContactNotFound {
                contact_id: enrollment.contact_id,
            })
    }

    fn publish_terminated(&self, enrollment: &Enrollment, transition: StatusTransition, reason: &str) {
        if transition.became_terminal() {
            self.publisher.publish(LifecycleEvent::EnrollmentTerminated {
                enrollment_id: enrollment.enrollment_id,
                tenant_id: enrollment.tenant_id,
                status: transition.to,
                reason: reason.to_string(),
            });
        }
    }
}

/// Identity of one call for slot release: the provider call id when known,
/// else the queue message carrying the outcome
fn release_key(tenant_id: Uuid, call_id: Option<&str>, msg_id: Option<i64>) -> Option<String> {
    match (call_id, msg_id) {
        (Some(call_id), _) => Some(format!("call:{tenant_id}:{call_id}")),
        (None, Some(msg_id)) => Some(format!("msg:{msg_id}")),
        (None, None) => None,
    }
}

fn ignored(reason: &str) -> EventOutcome {
    EventOutcome::Ignored {
        reason: reason.to_string(),
    }
}

fn terminal_ignored(enrollment: &Enrollment) -> EventOutcome {
    EventOutcome::Ignored {
        reason: format!("enrollment is {}", enrollment.status),
    }
}

fn outcome_name(outcome: &EventOutcome) -> &'static str {
    match outcome {
        EventOutcome::Ignored { .. } => "ignored",
        EventOutcome::Recorded => "recorded",
        EventOutcome::Transitioned(_) => "transitioned",
        EventOutcome::Healed(_) => "healed",
    }
}
