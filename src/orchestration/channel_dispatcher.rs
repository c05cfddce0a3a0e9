//! # Channel Dispatcher
//!
//! Turns "send this step to this contact on this channel" into a send job on
//! the matching queue.
//!
//! ## Overview
//!
//! ```text
//! step + enrollment ──► effective channel (override map)
//!                           │
//!                   contact validity ──invalid──► DispatchError::InvalidContact
//!                           │
//!                   transcode content
//!                           │
//!            voice? ──► resolve umbrella ──► acquire slot ──denied──► CapacityExhausted
//!                           │
//!                        enqueue ──► DispatchReceipt
//! ```
//!
//! A voice slot acquired here is released by the call-outcome handler, or
//! immediately if the enqueue itself fails.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::capacity::{AdmissionControl, CapacityError, CapacityResolver};
use crate::config::QueuesConfig;
use crate::constants::DEFAULT_VOICE_URGENCY_PRIORITY;
use crate::messaging::{
    AssistantConfig, EmailSendJob, JobQueue, MessagingError, OutboundJob, RenderedContent,
    SmsSendJob, Transcoder, VoiceCallJob,
};
use crate::models::{Channel, Contact, Enrollment, FailureType, Step, StepContent};
use crate::validation::{check_contact_validity, ChannelValidity};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Contact cannot be reached on {channel}: {failure_type}")]
    InvalidContact {
        channel: Channel,
        failure_type: FailureType,
    },

    #[error("Capacity resolution failed: {0}")]
    Capacity(#[from] CapacityError),

    #[error("No voice slot available on umbrella {umbrella_id} for tenant {tenant_id}")]
    CapacityExhausted { umbrella_id: Uuid, tenant_id: Uuid },

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),
}

impl DispatchError {
    /// Failure type to feed back into diagnosis, for dispatch errors that are
    /// delivery problems rather than infrastructure problems
    pub fn as_failure_type(&self) -> Option<FailureType> {
        match self {
            Self::InvalidContact { failure_type, .. } => Some(failure_type.clone()),
            Self::CapacityExhausted { .. } => Some(FailureType::CapacityExhausted),
            Self::Capacity(_) | Self::Messaging(_) => None,
        }
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;

/// Proof that a send job was enqueued
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReceipt {
    pub channel: Channel,
    pub queue_name: String,
    pub msg_id: i64,
    /// Umbrella holding the call slot, voice jobs only
    pub umbrella_id: Option<Uuid>,
}

pub struct ChannelDispatcher {
    queue: Arc<dyn JobQueue>,
    resolver: Arc<dyn CapacityResolver>,
    admission: Arc<dyn AdmissionControl>,
    transcoder: Arc<dyn Transcoder>,
    queues: QueuesConfig,
}

impl std::fmt::Debug for ChannelDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelDispatcher")
            .field("queues", &self.queues)
            .finish()
    }
}

impl ChannelDispatcher {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        resolver: Arc<dyn CapacityResolver>,
        admission: Arc<dyn AdmissionControl>,
        transcoder: Arc<dyn Transcoder>,
        queues: QueuesConfig,
    ) -> Self {
        Self {
            queue,
            resolver,
            admission,
            transcoder,
            queues,
        }
    }

    /// Dispatch a step on the channel the enrollment's override map says
    pub async fn dispatch_step(
        &self,
        enrollment: &Enrollment,
        step: &Step,
        contact: &Contact,
    ) -> DispatchResult<DispatchReceipt> {
        let channel = enrollment.effective_channel(step.channel);
        self.dispatch_on(channel, enrollment, step, contact).await
    }

    /// Dispatch a step on an explicit channel, ignoring overrides
    pub async fn dispatch_on(
        &self,
        channel: Channel,
        enrollment: &Enrollment,
        step: &Step,
        contact: &Contact,
    ) -> DispatchResult<DispatchReceipt> {
        let address = reachable_address(contact, channel)?;
        self.send(
            channel,
            &address,
            &step.content,
            enrollment,
            Some(step.step_id),
            urgency_of(step),
        )
        .await
    }

    /// Dispatch a step to an address supplied out-of-band. The contact's
    /// validity flags describe their own address, not this one, so they are
    /// not consulted.
    pub async fn dispatch_to_address(
        &self,
        channel: Channel,
        address: &str,
        enrollment: &Enrollment,
        step: &Step,
    ) -> DispatchResult<DispatchReceipt> {
        self.send(
            channel,
            address,
            &step.content,
            enrollment,
            Some(step.step_id),
            urgency_of(step),
        )
        .await
    }

    /// Send a standalone text (fallback messages) on SMS or email
    pub async fn send_text(
        &self,
        channel: Channel,
        enrollment: &Enrollment,
        contact: &Contact,
        step_id: Option<Uuid>,
        body: &str,
    ) -> DispatchResult<DispatchReceipt> {
        let address = reachable_address(contact, channel)?;
        self.send(
            channel,
            &address,
            &StepContent::sms(body),
            enrollment,
            step_id,
            DEFAULT_VOICE_URGENCY_PRIORITY,
        )
        .await
    }

    async fn send(
        &self,
        channel: Channel,
        address: &str,
        content: &StepContent,
        enrollment: &Enrollment,
        step_id: Option<Uuid>,
        urgency_priority: i32,
    ) -> DispatchResult<DispatchReceipt> {
        let rendered = self.transcoder.render(content, channel);

        if content.native_channel().is_some_and(|native| native != channel) {
            debug!(
                enrollment_id = %enrollment.enrollment_id,
                target = %channel,
                "Transcoding step content across channels"
            );
        }

        match rendered {
            RenderedContent::Sms { body } => {
                let job = OutboundJob::Sms(SmsSendJob {
                    tenant_id: enrollment.tenant_id,
                    contact_phone: address.to_string(),
                    body,
                    enrollment_id: enrollment.enrollment_id,
                    step_id,
                });
                self.enqueue(&self.queues.sms_send, &job, None).await
            }
            RenderedContent::Email {
                subject,
                body_html,
                body_text,
            } => {
                let job = OutboundJob::Email(EmailSendJob {
                    tenant_id: enrollment.tenant_id,
                    contact_email: address.to_string(),
                    subject,
                    body_html,
                    body_text,
                    enrollment_id: enrollment.enrollment_id,
                    step_id,
                });
                self.enqueue(&self.queues.email_send, &job, None).await
            }
            RenderedContent::Voice {
                first_message,
                system_prompt,
            } => {
                let tenant_id = enrollment.tenant_id;
                let mapping = self.resolver.resolve(tenant_id).await?;
                let umbrella_id = mapping.umbrella_id;

                if !self.admission.acquire(umbrella_id, tenant_id).await {
                    warn!(
                        enrollment_id = %enrollment.enrollment_id,
                        tenant_id = %tenant_id,
                        umbrella_id = %umbrella_id,
                        "Voice capacity exhausted"
                    );
                    return Err(DispatchError::CapacityExhausted {
                        umbrella_id,
                        tenant_id,
                    });
                }

                let job = OutboundJob::Voice(VoiceCallJob {
                    tenant_id,
                    contact_phone: address.to_string(),
                    assistant_config: AssistantConfig {
                        first_message,
                        system_prompt,
                    },
                    enrollment_id: enrollment.enrollment_id,
                    step_id,
                    urgency_priority,
                    umbrella_id,
                });

                match self.enqueue(&self.queues.voice_call, &job, Some(umbrella_id)).await {
                    Ok(receipt) => Ok(receipt),
                    Err(e) => {
                        self.admission.release(umbrella_id, tenant_id).await;
                        Err(e)
                    }
                }
            }
        }
    }

    async fn enqueue(
        &self,
        queue_name: &str,
        job: &OutboundJob,
        umbrella_id: Option<Uuid>,
    ) -> DispatchResult<DispatchReceipt> {
        let payload = job.to_payload().map_err(MessagingError::serialization)?;
        let msg_id = self.queue.enqueue(queue_name, &payload).await?;

        info!(
            enrollment_id = %job.enrollment_id(),
            channel = %job.channel(),
            queue = queue_name,
            msg_id = msg_id,
            "Send job enqueued"
        );

        Ok(DispatchReceipt {
            channel: job.channel(),
            queue_name: queue_name.to_string(),
            msg_id,
            umbrella_id,
        })
    }
}

fn urgency_of(step: &Step) -> i32 {
    step.flags
        .urgency_priority
        .unwrap_or(DEFAULT_VOICE_URGENCY_PRIORITY)
}

/// The contact's address for `channel`, if the contact is valid for it
fn reachable_address(contact: &Contact, channel: Channel) -> DispatchResult<String> {
    if let ChannelValidity::Invalid { failure_type } = check_contact_validity(contact, channel) {
        return Err(DispatchError::InvalidContact {
            channel,
            failure_type,
        });
    }

    let address = if channel.uses_phone() {
        contact.phone_number()
    } else {
        contact.email_address()
    };

    address
        .map(str::to_string)
        .ok_or(DispatchError::InvalidContact {
            channel,
            failure_type: FailureType::NoContactMethod,
        })
}
