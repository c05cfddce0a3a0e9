//! # Healing Executor
//!
//! Applies one diagnosed [`HealingAction`] to an enrollment.
//!
//! ## Overview
//!
//! The executor runs under the caller's per-enrollment lock and works on the
//! caller's in-memory copy of the enrollment. One application is:
//!
//! 1. **Adjust** the diagnosed action against what is actually possible:
//!    channel targets must be valid for the contact (or the action degrades to
//!    `end_sequence`), and `extend_delay` past the rewind bound becomes
//!    `skip_and_advance`.
//! 2. **Mutate** the enrollment: step cursor, override map (merged), status,
//!    the compact healing-history entry and, for persistent failures, the
//!    failed-channel set.
//! 3. **Persist** with a single versioned update. Contact validity flips are
//!    written first; they are single-column and safe to repeat.
//! 4. **Dispatch** whatever the action sends.
//! 5. **Audit**, best-effort, and publish `healing.applied`.
//!
//! A version conflict is returned without auditing so that the caller can
//! reload and re-run the whole handler; every other failure is audited before
//! it is returned.

use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::channel_dispatcher::{ChannelDispatcher, DispatchError, DispatchReceipt};
use crate::constants::{MAX_HEALING_DELAY_SECONDS, SKIP_AND_ADVANCE_DELAY_SECONDS};
use crate::database::{
    ContactStore, CoreStores, EnrollmentStore, HealingAuditStore, StepStore, StoreError,
};
use crate::events::{EventPublisher, LifecycleEvent};
use crate::logging::log_healing_operation;
use crate::messaging::personalize;
use crate::models::{
    AlternateContact, Channel, Contact, ContactField, Enrollment, FailureType, HealingAction,
    HealingAuditEntry, HealingHistoryEntry, Step,
};
use crate::state_machine::{
    EnrollmentEvent, EnrollmentStateMachine, StateMachineError, StatusTransition,
};
use crate::validation::select_valid_target;

#[derive(Error, Debug)]
pub enum HealingError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("State machine error: {0}")]
    StateMachine(#[from] StateMachineError),

    #[error("Enrollment {enrollment_id} has no alternate phone or email to use")]
    MissingAlternativeContact { enrollment_id: Uuid },

    #[error("Enrollment {enrollment_id} has no step at order {step_order}")]
    MissingStep { enrollment_id: Uuid, step_order: i32 },
}

impl HealingError {
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_version_conflict())
    }
}

pub type HealingResult<T> = Result<T, HealingError>;

/// A failure as reported to the executor
#[derive(Debug, Clone, PartialEq)]
pub struct FailureSignal {
    pub failure_type: FailureType,
    /// Channel the failure happened on, when the event says so
    pub channel: Option<Channel>,
    pub step_id: Option<Uuid>,
    /// Raw event details kept in the audit row
    pub details: serde_json::Value,
}

impl FailureSignal {
    pub fn new(failure_type: FailureType) -> Self {
        Self {
            failure_type,
            channel: None,
            step_id: None,
            details: serde_json::Value::Null,
        }
    }

    pub fn on_channel(mut self, channel: Channel) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn for_step(mut self, step_id: Option<Uuid>) -> Self {
        self.step_id = step_id;
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// What the executor actually did
#[derive(Debug, Clone, PartialEq)]
pub struct HealingOutcome {
    /// The action as applied, after adjustment
    pub action: HealingAction,
    pub dispatched: Option<DispatchReceipt>,
    pub transition: Option<StatusTransition>,
    /// Delivery problem hit while sending; recorded, not raised
    pub undelivered: Option<FailureType>,
}

pub struct HealingExecutor {
    enrollments: Arc<dyn EnrollmentStore>,
    contacts: Arc<dyn ContactStore>,
    steps: Arc<dyn StepStore>,
    audit: Arc<dyn HealingAuditStore>,
    dispatcher: Arc<ChannelDispatcher>,
    publisher: EventPublisher,
    state_machine: EnrollmentStateMachine,
    max_step_rewinds: u32,
}

impl std::fmt::Debug for HealingExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealingExecutor")
            .field("max_step_rewinds", &self.max_step_rewinds)
            .finish()
    }
}

/// Facts about the failure that every stage of one application needs
struct HealingContext<'a> {
    step: Option<&'a Step>,
    signal: &'a FailureSignal,
    failing_channel: Option<Channel>,
    /// Authored channel of the step; the key for override entries
    original_channel: Option<Channel>,
    step_order: i32,
    invalidated: Option<ContactField>,
}

/// Where an action sends something
#[derive(Debug, Clone)]
enum Delivery {
    Nothing,
    Step(Channel),
    Address { channel: Channel, address: String },
    Text { channel: Channel, body: String },
}

impl HealingExecutor {
    pub fn new(
        stores: &CoreStores,
        dispatcher: Arc<ChannelDispatcher>,
        publisher: EventPublisher,
        max_step_rewinds: u32,
    ) -> Self {
        Self {
            enrollments: stores.enrollments.clone(),
            contacts: stores.contacts.clone(),
            steps: stores.steps.clone(),
            audit: stores.audit.clone(),
            dispatcher,
            publisher,
            state_machine: EnrollmentStateMachine::new(),
            max_step_rewinds,
        }
    }

    /// The step a failure refers to: the event's step id when given, else the
    /// step at the enrollment's cursor
    pub async fn load_step(
        &self,
        enrollment: &Enrollment,
        step_id: Option<Uuid>,
    ) -> HealingResult<Option<Step>> {
        if let Some(step_id) = step_id {
            if let Some(step) = self.steps.find(step_id).await? {
                return Ok(Some(step));
            }
        }
        Ok(self
            .steps
            .find_by_order(enrollment.sequence_id, enrollment.current_step)
            .await?)
    }

    /// Apply a diagnosed action. `enrollment` and `contact` are updated in
    /// place with what was persisted.
    pub async fn apply(
        &self,
        enrollment: &mut Enrollment,
        contact: &mut Contact,
        step: Option<&Step>,
        signal: &FailureSignal,
        diagnosed: HealingAction,
    ) -> HealingResult<HealingOutcome> {
        let failing_channel = signal
            .channel
            .or_else(|| step.map(|s| enrollment.effective_channel(s.channel)))
            .or_else(|| signal.failure_type.inferred_channel());
        let ctx = HealingContext {
            step,
            signal,
            failing_channel,
            original_channel: step.map(|s| s.channel).or(failing_channel),
            step_order: step.map_or(enrollment.current_step, |s| s.order_index),
            invalidated: match &diagnosed {
                HealingAction::MarkInvalid { field, .. } => Some(*field),
                _ => None,
            },
        };

        // Flip validity before target selection so the field being marked
        // invalid is never chosen as the new target
        if let Some(field) = ctx.invalidated {
            mark_field_invalid(contact, field);
        }

        let action = self.adjust(diagnosed, enrollment, contact, &ctx);

        match self.execute(enrollment, contact, &ctx, &action).await {
            Ok(outcome) => {
                self.record(enrollment, &ctx, &outcome, None).await;
                Ok(outcome)
            }
            Err(e) if e.is_version_conflict() => Err(e),
            Err(e) => {
                let failed = HealingOutcome {
                    action,
                    dispatched: None,
                    transition: None,
                    undelivered: None,
                };
                self.record(enrollment, &ctx, &failed, Some(&e)).await;
                Err(e)
            }
        }
    }

    fn adjust(
        &self,
        action: HealingAction,
        enrollment: &Enrollment,
        contact: &Contact,
        ctx: &HealingContext<'_>,
    ) -> HealingAction {
        let avoid = ctx.failing_channel.unwrap_or(Channel::Sms);
        let step_order = ctx.step_order;

        let retarget = |preferred: Channel, reason: &str| -> Result<(Channel, String), HealingAction> {
            match select_valid_target(contact, preferred, avoid) {
                Some(target) if target == preferred => Ok((target, reason.to_string())),
                Some(target) => Ok((
                    target,
                    format!("{reason} ({preferred} unreachable, using {target})"),
                )),
                None => Err(HealingAction::EndSequence {
                    reason: format!("{reason}; no valid channel remains for the contact"),
                }),
            }
        };

        match action {
            HealingAction::SwitchChannel {
                new_channel,
                reason,
            } => match retarget(new_channel, &reason) {
                Ok((new_channel, reason)) => HealingAction::SwitchChannel {
                    new_channel,
                    reason,
                },
                Err(end) => end,
            },
            HealingAction::OverrideChannel {
                new_channel,
                reason,
            } => match retarget(new_channel, &reason) {
                Ok((new_channel, reason)) => HealingAction::OverrideChannel {
                    new_channel,
                    reason,
                },
                Err(end) => end,
            },
            HealingAction::MarkInvalid {
                field,
                switch_to: Some(preferred),
                reason,
            } => match retarget(preferred, &reason) {
                Ok((target, reason)) => HealingAction::MarkInvalid {
                    field,
                    switch_to: Some(target),
                    reason,
                },
                Err(end) => end,
            },
            HealingAction::ExtendDelay { reason, .. }
                if enrollment.rewinds_for_step(step_order) >= self.max_step_rewinds =>
            {
                HealingAction::SkipAndAdvance {
                    reason: format!(
                        "{reason}; step {step_order} already retried {} times, skipping",
                        self.max_step_rewinds
                    ),
                }
            }
            other => other,
        }
    }

    async fn execute(
        &self,
        enrollment: &mut Enrollment,
        contact: &Contact,
        ctx: &HealingContext<'_>,
        action: &HealingAction,
    ) -> HealingResult<HealingOutcome> {
        let now = Utc::now();
        let mut transition = None;
        let original_channel = ctx.original_channel;

        if let Some(field) = ctx.invalidated {
            self.contacts
                .set_validity(contact.contact_id, field, false)
                .await?;
        }

        let send = match action {
            HealingAction::SwitchChannel { new_channel, .. } => Delivery::Step(*new_channel),
            HealingAction::OverrideChannel { new_channel, .. } => {
                if let Some(original) = original_channel {
                    enrollment.channel_overrides.merge(original, *new_channel);
                }
                Delivery::Step(*new_channel)
            }
            HealingAction::InjectFallbackSms {
                template,
                requeue_delay_seconds,
                ..
            } => {
                if let Some(delay) = requeue_delay_seconds {
                    transition = Some(self.rewind(enrollment, *delay)?);
                }
                match select_valid_target(contact, Channel::Sms, Channel::Voice) {
                    Some(channel) if channel != Channel::Voice => Delivery::Text {
                        channel,
                        body: personalize(template, contact),
                    },
                    _ => {
                        warn!(
                            enrollment_id = %enrollment.enrollment_id,
                            "Contact cannot receive a fallback message; skipping it"
                        );
                        Delivery::Nothing
                    }
                }
            }
            HealingAction::ExtendDelay { delay_seconds, .. } => {
                transition = Some(self.rewind(enrollment, *delay_seconds)?);
                Delivery::Nothing
            }
            HealingAction::MarkInvalid { switch_to, .. } => {
                match (switch_to, original_channel) {
                    (Some(target), Some(original)) => {
                        enrollment.channel_overrides.merge(original, *target);
                        Delivery::Step(*target)
                    }
                    (Some(target), None) => Delivery::Step(*target),
                    (None, _) => Delivery::Nothing,
                }
            }
            HealingAction::SkipAndAdvance { .. } => {
                enrollment.current_step += 1;
                enrollment.next_step_at = Some(now + Duration::seconds(SKIP_AND_ADVANCE_DELAY_SECONDS));
                Delivery::Nothing
            }
            HealingAction::EndSequence { reason } => {
                transition = Some(
                    self.state_machine
                        .transition(enrollment, &EnrollmentEvent::fail_with_reason(reason.clone()))?,
                );
                Delivery::Nothing
            }
            HealingAction::UseAlternativeContact { alternate, .. } => {
                let channel = ctx
                    .step
                    .map(|s| enrollment.effective_channel(s.channel))
                    .or(ctx.failing_channel)
                    .unwrap_or(Channel::Sms);
                alternative_send(enrollment.enrollment_id, channel, alternate)?
            }
            HealingAction::RetryAlternative { .. } => match original_channel {
                Some(original) => Delivery::Step(original),
                None => Delivery::Nothing,
            },
        };

        // Anything that sends the step needs the step
        if matches!(send, Delivery::Step(_) | Delivery::Address { .. }) && ctx.step.is_none() {
            return Err(HealingError::MissingStep {
                enrollment_id: enrollment.enrollment_id,
                step_order: ctx.step_order,
            });
        }

        enrollment.healing_history.push(HealingHistoryEntry {
            action_type: action.kind(),
            failure_type: ctx.signal.failure_type.clone(),
            reason: action.reason().to_string(),
            step_order: ctx.step_order,
            timestamp: now,
        });
        if ctx.signal.failure_type.is_persistent() {
            if let Some(channel) = ctx.failing_channel {
                enrollment.mark_channel_failed(channel);
            }
        }

        self.enrollments.update(enrollment).await?;

        let (dispatched, undelivered) = self.send(enrollment, contact, ctx, send).await?;

        Ok(HealingOutcome {
            action: action.clone(),
            dispatched,
            transition,
            undelivered,
        })
    }

    /// Rewind the cursor so the same step is retried after `delay_seconds`
    fn rewind(&self, enrollment: &mut Enrollment, delay_seconds: u64) -> HealingResult<StatusTransition> {
        let transition = self
            .state_machine
            .transition(enrollment, &EnrollmentEvent::Rewind)?;
        enrollment.current_step = (enrollment.current_step - 1).max(0);
        let delay = i64::try_from(delay_seconds)
            .unwrap_or(i64::MAX)
            .min(MAX_HEALING_DELAY_SECONDS);
        enrollment.next_step_at = Some(Utc::now() + Duration::seconds(delay));
        Ok(transition)
    }

    async fn send(
        &self,
        enrollment: &Enrollment,
        contact: &Contact,
        ctx: &HealingContext<'_>,
        send: Delivery,
    ) -> HealingResult<(Option<DispatchReceipt>, Option<FailureType>)> {
        let result = match (send, ctx.step) {
            (Delivery::Nothing, _) => return Ok((None, None)),
            (Delivery::Step(channel), Some(step)) => {
                self.dispatcher
                    .dispatch_on(channel, enrollment, step, contact)
                    .await
            }
            (Delivery::Address { channel, address }, Some(step)) => {
                self.dispatcher
                    .dispatch_to_address(channel, &address, enrollment, step)
                    .await
            }
            (Delivery::Text { channel, body }, _) => {
                self.dispatcher
                    .send_text(channel, enrollment, contact, ctx.signal.step_id, &body)
                    .await
            }
            (Delivery::Step(_) | Delivery::Address { .. }, None) => return Ok((None, None)),
        };

        match result {
            Ok(receipt) => Ok((Some(receipt), None)),
            Err(e) => match e.as_failure_type() {
                Some(failure_type) => {
                    warn!(
                        enrollment_id = %enrollment.enrollment_id,
                        failure_type = %failure_type,
                        error = %e,
                        "Healing dispatch could not be delivered"
                    );
                    Ok((None, Some(failure_type)))
                }
                None => Err(e.into()),
            },
        }
    }

    /// Audit row, lifecycle events and the canonical log record
    async fn record(
        &self,
        enrollment: &Enrollment,
        ctx: &HealingContext<'_>,
        outcome: &HealingOutcome,
        failure: Option<&HealingError>,
    ) {
        let action = &outcome.action;
        let signal = ctx.signal;
        let failing_channel = ctx.failing_channel;
        let step_order = ctx.step_order;
        let mut action_details = serde_json::to_value(action).unwrap_or(json!({}));
        if let Some(map) = action_details.as_object_mut() {
            if let Some(receipt) = &outcome.dispatched {
                map.insert(
                    "dispatch".to_string(),
                    json!({
                        "channel": receipt.channel,
                        "queue": receipt.queue_name,
                        "msg_id": receipt.msg_id,
                    }),
                );
            }
            if let Some(undelivered) = &outcome.undelivered {
                map.insert("undelivered".to_string(), json!(undelivered));
            }
            if let Some(e) = failure {
                map.insert("error".to_string(), json!(e.to_string()));
            }
        }

        let entry = HealingAuditEntry {
            audit_id: Uuid::new_v4(),
            enrollment_id: enrollment.enrollment_id,
            tenant_id: enrollment.tenant_id,
            step_id: signal.step_id,
            step_order,
            channel: failing_channel,
            failure_type: signal.failure_type.clone(),
            failure_details: signal.details.clone(),
            action_type: action.kind(),
            action_details,
            reason: action.reason().to_string(),
            created_at: Utc::now(),
        };

        if let Err(e) = self.audit.append(&entry).await {
            error!(
                enrollment_id = %enrollment.enrollment_id,
                error = %e,
                "Failed to append healing audit entry"
            );
        }

        log_healing_operation(
            enrollment.enrollment_id,
            enrollment.tenant_id,
            &signal.failure_type,
            action.kind(),
            action.new_channel().or(failing_channel),
            step_order,
            action.reason(),
        );

        if failure.is_some() {
            return;
        }

        self.publisher.publish(LifecycleEvent::HealingApplied {
            enrollment_id: enrollment.enrollment_id,
            tenant_id: enrollment.tenant_id,
            failure_type: signal.failure_type.clone(),
            action: action.kind(),
            channel: action.new_channel(),
            reason: action.reason().to_string(),
        });

        if let Some(transition) = outcome.transition.filter(StatusTransition::became_terminal) {
            self.publisher.publish(LifecycleEvent::EnrollmentTerminated {
                enrollment_id: enrollment.enrollment_id,
                tenant_id: enrollment.tenant_id,
                status: transition.to,
                reason: action.reason().to_string(),
            });
        }

        debug!(
            enrollment_id = %enrollment.enrollment_id,
            version = enrollment.version,
            "Healing action recorded"
        );
    }
}

fn mark_field_invalid(contact: &mut Contact, field: ContactField) {
    match field {
        ContactField::Email => contact.email_valid = Some(false),
        ContactField::Phone => contact.phone_valid = Some(false),
    }
}

/// Alternate phone on phone channels, else alternate email, else the
/// alternate phone by SMS
fn alternative_send(
    enrollment_id: Uuid,
    channel: Channel,
    alternate: &AlternateContact,
) -> HealingResult<Delivery> {
    let phone = alternate
        .phone
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty());
    let email = alternate
        .email
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty());

    match (phone, email) {
        (Some(phone), _) if channel.uses_phone() => Ok(Delivery::Address {
            channel,
            address: phone.to_string(),
        }),
        (_, Some(email)) => Ok(Delivery::Address {
            channel: Channel::Email,
            address: email.to_string(),
        }),
        (Some(phone), None) => Ok(Delivery::Address {
            channel: Channel::Sms,
            address: phone.to_string(),
        }),
        (None, None) => Err(HealingError::MissingAlternativeContact { enrollment_id }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::{AdmissionControl, CapacityResolver, CapacityResult};
    use crate::config::QueuesConfig;
    use crate::database::{
        InMemoryContactStore, InMemoryEnrollmentStore, InMemoryHealingAuditStore,
        InMemoryStepStore, InMemoryUmbrellaStore,
    };
    use crate::messaging::{ContentTranscoder, InMemoryJobQueue};
    use crate::models::{
        Credential, FailureHistory, HealingActionKind, PhoneType, StepContent, StepFlags,
        UmbrellaMapping,
    };
    use crate::orchestration::failure_diagnosis::diagnose;
    use crate::state_machine::EnrollmentStatus;
    use async_trait::async_trait;

    struct OpenResolver;

    #[async_trait]
    impl CapacityResolver for OpenResolver {
        async fn resolve(&self, tenant_id: Uuid) -> CapacityResult<UmbrellaMapping> {
            Ok(UmbrellaMapping {
                umbrella_id: Uuid::nil(),
                tenant_id,
                account_type: "vapi".to_string(),
                credential: Credential::new("secret"),
                concurrency_limit: 10,
                tenant_cap: 10,
                priority_weight: 1,
            })
        }

        async fn invalidate(&self, _tenant_id: Uuid) {}
    }

    struct OpenAdmission;

    #[async_trait]
    impl AdmissionControl for OpenAdmission {
        async fn acquire(&self, _umbrella_id: Uuid, _tenant_id: Uuid) -> bool {
            true
        }

        async fn release(&self, _umbrella_id: Uuid, _tenant_id: Uuid) {}
    }

    struct Harness {
        executor: HealingExecutor,
        enrollments: Arc<InMemoryEnrollmentStore>,
        contacts: Arc<InMemoryContactStore>,
        audit: Arc<InMemoryHealingAuditStore>,
        queue: Arc<InMemoryJobQueue>,
    }

    fn harness(max_step_rewinds: u32) -> Harness {
        let enrollments = Arc::new(InMemoryEnrollmentStore::new());
        let contacts = Arc::new(InMemoryContactStore::new());
        let audit = Arc::new(InMemoryHealingAuditStore::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        let stores = CoreStores {
            enrollments: enrollments.clone(),
            contacts: contacts.clone(),
            steps: Arc::new(InMemoryStepStore::new()),
            audit: audit.clone(),
            umbrellas: Arc::new(InMemoryUmbrellaStore::new()),
        };
        let dispatcher = Arc::new(ChannelDispatcher::new(
            queue.clone(),
            Arc::new(OpenResolver),
            Arc::new(OpenAdmission),
            Arc::new(ContentTranscoder::new()),
            QueuesConfig::default(),
        ));
        Harness {
            executor: HealingExecutor::new(&stores, dispatcher, EventPublisher::default(), max_step_rewinds),
            enrollments,
            contacts,
            audit,
            queue,
        }
    }

    async fn seed(h: &Harness, contact: Contact, current_step: i32) -> (Enrollment, Contact) {
        let mut enrollment = Enrollment::new(contact.tenant_id, contact.contact_id, Uuid::new_v4());
        enrollment.current_step = current_step;
        h.enrollments.insert(&enrollment).await.unwrap();
        h.contacts.insert(&contact).await.unwrap();
        (enrollment, contact)
    }

    fn sms_step(order_index: i32) -> Step {
        Step {
            step_id: Uuid::new_v4(),
            sequence_id: Uuid::new_v4(),
            order_index,
            channel: Channel::Sms,
            content: StepContent::sms("Hi {{first_name}}"),
            flags: StepFlags::default(),
        }
    }

    #[tokio::test]
    async fn test_extend_delay_rewinds_cursor_and_records_history() {
        let h = harness(5);
        let contact = Contact::new(Uuid::new_v4()).with_phone("+15550100", PhoneType::Mobile);
        let (mut enrollment, mut contact) = seed(&h, contact, 2).await;
        let step = sms_step(2);

        let outcome = h
            .executor
            .apply(
                &mut enrollment,
                &mut contact,
                Some(&step),
                &FailureSignal::new(FailureType::SmsUndelivered).on_channel(Channel::Sms),
                HealingAction::ExtendDelay {
                    delay_seconds: 300,
                    reason: "retry".to_string(),
                },
            )
            .await
            .unwrap();

        assert!(outcome.dispatched.is_none());
        let stored = h.enrollments.find(enrollment.enrollment_id).await.unwrap().unwrap();
        assert_eq!(stored.current_step, 1);
        assert_eq!(stored.healing_history.len(), 1);
        assert!(stored.failed_channels.is_empty());
        assert_eq!(h.audit.len().await, 1);
    }

    #[tokio::test]
    async fn test_extend_delay_past_rewind_bound_skips_step() {
        let h = harness(1);
        let contact = Contact::new(Uuid::new_v4()).with_phone("+15550100", PhoneType::Mobile);
        let (mut enrollment, mut contact) = seed(&h, contact, 3).await;
        enrollment.healing_history.push(HealingHistoryEntry {
            action_type: HealingActionKind::ExtendDelay,
            failure_type: FailureType::CallBusy,
            reason: "busy".to_string(),
            step_order: 3,
            timestamp: Utc::now(),
        });
        let mut step = sms_step(3);
        step.channel = Channel::Voice;

        let outcome = h
            .executor
            .apply(
                &mut enrollment,
                &mut contact,
                Some(&step),
                &FailureSignal::new(FailureType::CallBusy),
                HealingAction::ExtendDelay {
                    delay_seconds: 900,
                    reason: "busy".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome.action.kind(), HealingActionKind::SkipAndAdvance);
        assert_eq!(enrollment.current_step, 4);
    }

    #[tokio::test]
    async fn test_override_to_unreachable_channel_ends_sequence() {
        let h = harness(5);
        // Phone only, marked invalid: nothing can reach this contact
        let mut contact = Contact::new(Uuid::new_v4()).with_phone("+15550100", PhoneType::Mobile);
        contact.phone_valid = Some(false);
        let (mut enrollment, mut contact) = seed(&h, contact, 1).await;

        let outcome = h
            .executor
            .apply(
                &mut enrollment,
                &mut contact,
                Some(&sms_step(1)),
                &FailureSignal::new(FailureType::InvalidNumber).on_channel(Channel::Sms),
                HealingAction::OverrideChannel {
                    new_channel: Channel::Email,
                    reason: "number invalid".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome.action.kind(), HealingActionKind::EndSequence);
        assert_eq!(enrollment.status, EnrollmentStatus::Failed);
        assert!(enrollment.channel_overrides.is_empty());
        assert!(enrollment.failed_channels.contains(&Channel::Sms));
    }

    #[tokio::test]
    async fn test_mark_invalid_flips_contact_and_switches() {
        let h = harness(5);
        let contact = Contact::new(Uuid::new_v4())
            .with_phone("+15550100", PhoneType::Mobile)
            .with_email("gone@example.com");
        let (mut enrollment, mut contact) = seed(&h, contact, 1).await;
        let mut step = sms_step(1);
        step.channel = Channel::Email;

        let outcome = h
            .executor
            .apply(
                &mut enrollment,
                &mut contact,
                Some(&step),
                &FailureSignal::new(FailureType::InvalidEmail).on_channel(Channel::Email),
                HealingAction::MarkInvalid {
                    field: ContactField::Email,
                    switch_to: Some(Channel::Sms),
                    reason: "email invalid".to_string(),
                },
            )
            .await
            .unwrap();

        let stored = h.contacts.find(contact.contact_id).await.unwrap().unwrap();
        assert_eq!(stored.email_valid, Some(false));
        assert_eq!(enrollment.effective_channel(Channel::Email), Channel::Sms);
        assert_eq!(outcome.dispatched.unwrap().channel, Channel::Sms);
        assert_eq!(h.queue.len(&QueuesConfig::default().sms_send).await, 1);
    }

    #[tokio::test]
    async fn test_alternative_contact_without_addresses_is_audited_error() {
        let h = harness(5);
        let contact = Contact::new(Uuid::new_v4()).with_phone("+15550100", PhoneType::Mobile);
        let (mut enrollment, mut contact) = seed(&h, contact, 1).await;

        let err = h
            .executor
            .apply(
                &mut enrollment,
                &mut contact,
                Some(&sms_step(1)),
                &FailureSignal::new(FailureType::SmsFailed),
                HealingAction::UseAlternativeContact {
                    alternate: AlternateContact::default(),
                    reason: "operator supplied".to_string(),
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, HealingError::MissingAlternativeContact { .. }));
        assert_eq!(h.audit.len().await, 1);
    }

    #[tokio::test]
    async fn test_alternative_email_is_used_for_email_delivery() {
        let h = harness(5);
        let contact = Contact::new(Uuid::new_v4()).with_phone("+15550100", PhoneType::Mobile);
        let (mut enrollment, mut contact) = seed(&h, contact, 1).await;
        let mut step = sms_step(1);
        step.channel = Channel::Email;

        let outcome = h
            .executor
            .apply(
                &mut enrollment,
                &mut contact,
                Some(&step),
                &FailureSignal::new(FailureType::EmailBounced),
                HealingAction::UseAlternativeContact {
                    alternate: AlternateContact {
                        phone: None,
                        email: Some("other@example.com".to_string()),
                    },
                    reason: "operator supplied".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome.dispatched.unwrap().channel, Channel::Email);
        let jobs = h.queue.messages(&QueuesConfig::default().email_send).await;
        assert_eq!(jobs[0]["contactEmail"], "other@example.com");
    }

    #[tokio::test]
    async fn test_stale_copy_is_version_conflict_without_audit() {
        let h = harness(5);
        let contact = Contact::new(Uuid::new_v4()).with_phone("+15550100", PhoneType::Mobile);
        let (mut enrollment, mut contact) = seed(&h, contact, 1).await;

        let mut concurrent = enrollment.clone();
        h.enrollments.update(&mut concurrent).await.unwrap();

        let err = h
            .executor
            .apply(
                &mut enrollment,
                &mut contact,
                None,
                &FailureSignal::new(FailureType::Unrecognized("odd".to_string())),
                HealingAction::SkipAndAdvance {
                    reason: "skip".to_string(),
                },
            )
            .await
            .unwrap_err();

        assert!(err.is_version_conflict());
        assert_eq!(h.audit.len().await, 0);
    }

    #[tokio::test]
    async fn test_retry_alternative_resends_step_on_original_channel() {
        let h = harness(5);
        let contact = Contact::new(Uuid::new_v4()).with_phone("+15550100", PhoneType::Mobile);
        let (mut enrollment, mut contact) = seed(&h, contact, 1).await;

        let outcome = h
            .executor
            .apply(
                &mut enrollment,
                &mut contact,
                Some(&sms_step(1)),
                &FailureSignal::new(FailureType::SmsFailed).on_channel(Channel::Sms),
                HealingAction::RetryAlternative {
                    reason: "transient carrier error".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome.action.kind(), HealingActionKind::RetryAlternative);
        assert_eq!(outcome.dispatched.unwrap().channel, Channel::Sms);
        assert_eq!(h.queue.len(&QueuesConfig::default().sms_send).await, 1);

        let stored = h.enrollments.find(enrollment.enrollment_id).await.unwrap().unwrap();
        assert_eq!(stored.current_step, 1);
        assert!(stored.channel_overrides.is_empty());
        assert_eq!(stored.healing_history[0].action_type, HealingActionKind::RetryAlternative);
    }

    #[tokio::test]
    async fn test_unplaced_call_texts_contact_and_requeues_call() {
        for failure_type in [FailureType::CallFailed, FailureType::CapacityExhausted] {
            let h = harness(5);
            let contact = Contact::new(Uuid::new_v4())
                .with_phone("+15550100", PhoneType::Mobile)
                .with_full_name("Jordan Lee");
            let (mut enrollment, mut contact) = seed(&h, contact, 2).await;
            let mut step = sms_step(2);
            step.channel = Channel::Voice;
            let action = diagnose(&failure_type, &FailureHistory::empty(), &contact, &enrollment);

            let before = Utc::now();
            let outcome = h
                .executor
                .apply(
                    &mut enrollment,
                    &mut contact,
                    Some(&step),
                    &FailureSignal::new(failure_type.clone()).on_channel(Channel::Voice),
                    action,
                )
                .await
                .unwrap();
            let after = Utc::now();

            assert_eq!(outcome.action.kind(), HealingActionKind::InjectFallbackSms);
            let texts = h.queue.messages(&QueuesConfig::default().sms_send).await;
            assert_eq!(texts.len(), 1);
            assert!(texts[0]["body"].as_str().unwrap().starts_with("Hi Jordan"));
            assert!(h.queue.is_empty(&QueuesConfig::default().voice_call).await);

            let stored = h.enrollments.find(enrollment.enrollment_id).await.unwrap().unwrap();
            assert_eq!(stored.current_step, 1);
            assert_eq!(stored.next_step_order(), 2);
            let next = stored.next_step_at.unwrap();
            assert!(next >= before + Duration::seconds(3600));
            assert!(next <= after + Duration::seconds(3600));
        }
    }
}
