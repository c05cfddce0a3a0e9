//! # Queue Message Structures
//!
//! Payloads exchanged over the job queues. Outbound send jobs are consumed by
//! the provider workers; webhook event jobs are produced by the provider
//! callback endpoints and consumed by the orchestration core. Field names are
//! camelCase on the wire.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Channel;

/// Outbound SMS send job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsSendJob {
    pub tenant_id: Uuid,
    pub contact_phone: String,
    pub body: String,
    pub enrollment_id: Uuid,
    pub step_id: Option<Uuid>,
}

/// Outbound email send job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailSendJob {
    pub tenant_id: Uuid,
    pub contact_email: String,
    pub subject: String,
    pub body_html: String,
    pub body_text: String,
    pub enrollment_id: Uuid,
    pub step_id: Option<Uuid>,
}

/// Voice assistant settings; keys stay snake_case as the voice provider expects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantConfig {
    pub first_message: String,
    pub system_prompt: String,
}

/// Outbound voice call job. The umbrella id identifies the call slot that
/// must be released when the call outcome arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceCallJob {
    pub tenant_id: Uuid,
    pub contact_phone: String,
    pub assistant_config: AssistantConfig,
    pub enrollment_id: Uuid,
    pub step_id: Option<Uuid>,
    pub urgency_priority: i32,
    pub umbrella_id: Uuid,
}

/// Any outbound send job, as produced by the channel dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundJob {
    Sms(SmsSendJob),
    Email(EmailSendJob),
    Voice(VoiceCallJob),
}

impl OutboundJob {
    pub fn channel(&self) -> Channel {
        match self {
            Self::Sms(_) => Channel::Sms,
            Self::Email(_) => Channel::Email,
            Self::Voice(_) => Channel::Voice,
        }
    }

    pub fn enrollment_id(&self) -> Uuid {
        match self {
            Self::Sms(job) => job.enrollment_id,
            Self::Email(job) => job.enrollment_id,
            Self::Voice(job) => job.enrollment_id,
        }
    }

    pub fn to_payload(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            Self::Sms(job) => serde_json::to_value(job),
            Self::Email(job) => serde_json::to_value(job),
            Self::Voice(job) => serde_json::to_value(job),
        }
    }
}

/// Provider call disposition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallDisposition {
    Answered,
    NoAnswer,
    Busy,
    Failed,
    Error,
    Voicemail,
    #[serde(other)]
    Unknown,
}

impl CallDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Answered => "answered",
            Self::NoAnswer => "no-answer",
            Self::Busy => "busy",
            Self::Failed => "failed",
            Self::Error => "error",
            Self::Voicemail => "voicemail",
            Self::Unknown => "unknown",
        }
    }
}

/// SMS delivery receipt status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Queued,
    Sent,
    Delivered,
    Undelivered,
    Failed,
    #[serde(other)]
    Other,
}

/// Reply intent, either supplied by the upstream classifier or derived locally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyIntent {
    Stop,
    NotInterested,
    Interested,
    Question,
    #[serde(other)]
    Other,
}

/// Event-specific part of a webhook event job, discriminated by `type`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum WebhookEvent {
    CallOutcome {
        disposition: CallDisposition,
        #[serde(default)]
        appointment_booked: bool,
        #[serde(default)]
        umbrella_id: Option<Uuid>,
        #[serde(default)]
        call_id: Option<String>,
    },
    SmsReply {
        body: String,
        #[serde(default)]
        intent: Option<ReplyIntent>,
    },
    SmsDelivery {
        status: DeliveryStatus,
        #[serde(default)]
        error_code: Option<String>,
    },
    EmailOpened {},
    EmailClicked {
        #[serde(default)]
        url: Option<String>,
    },
    EmailBounced {
        #[serde(default)]
        hard_bounce: bool,
        #[serde(default)]
        reason: Option<String>,
    },
}

impl WebhookEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::CallOutcome { .. } => "call-outcome",
            Self::SmsReply { .. } => "sms-reply",
            Self::SmsDelivery { .. } => "sms-delivery",
            Self::EmailOpened {} => "email-opened",
            Self::EmailClicked { .. } => "email-clicked",
            Self::EmailBounced { .. } => "email-bounced",
        }
    }
}

/// Normalized provider callback as carried on the webhook event queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEventJob {
    pub tenant_id: Uuid,
    #[serde(default)]
    pub enrollment_id: Option<Uuid>,
    #[serde(default)]
    pub step_id: Option<Uuid>,
    #[serde(flatten)]
    pub event: WebhookEvent,
}

impl WebhookEventJob {
    pub fn new(tenant_id: Uuid, enrollment_id: Option<Uuid>, event: WebhookEvent) -> Self {
        Self {
            tenant_id,
            enrollment_id,
            step_id: None,
            event,
        }
    }

    pub fn with_step(mut self, step_id: Uuid) -> Self {
        self.step_id = Some(step_id);
        self
    }
}
