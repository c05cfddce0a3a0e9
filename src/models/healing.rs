//! # Failure and Healing Types
//!
//! Closed vocabularies for what went wrong ([`FailureType`]) and what the core
//! does about it ([`HealingAction`]). Each healing action variant carries only
//! the fields that action needs; nothing is passed around as free-form JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::channel::Channel;
use super::contact::ContactField;

/// Failure signal routed into diagnosis.
///
/// Delivery failures (`sms_*`, `email_*`, `call_*`, `capacity_exhausted`) are
/// expected outcomes; validity failures (`invalid_*`, `landline_detected`,
/// `no_contact_method`) describe the contact itself. Unknown strings decode to
/// [`FailureType::Unrecognized`] instead of failing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FailureType {
    SmsUndelivered,
    SmsFailed,
    EmailBounced,
    EmailSpam,
    CallNoAnswer,
    CallBusy,
    CallFailed,
    CapacityExhausted,
    InvalidNumber,
    LandlineDetected,
    InvalidEmail,
    NoContactMethod,
    Unrecognized(String),
}

impl FailureType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::SmsUndelivered => "sms_undelivered",
            Self::SmsFailed => "sms_failed",
            Self::EmailBounced => "email_bounced",
            Self::EmailSpam => "email_spam",
            Self::CallNoAnswer => "call_no_answer",
            Self::CallBusy => "call_busy",
            Self::CallFailed => "call_failed",
            Self::CapacityExhausted => "capacity_exhausted",
            Self::InvalidNumber => "invalid_number",
            Self::LandlineDetected => "landline_detected",
            Self::InvalidEmail => "invalid_email",
            Self::NoContactMethod => "no_contact_method",
            Self::Unrecognized(other) => other,
        }
    }

    /// Failures that say something lasting about a channel for this contact.
    /// Only these are added to an enrollment's failed-channel set.
    pub fn is_persistent(&self) -> bool {
        matches!(
            self,
            Self::InvalidNumber
                | Self::LandlineDetected
                | Self::InvalidEmail
                | Self::EmailSpam
                | Self::NoContactMethod
        )
    }

    pub fn is_sms_delivery(&self) -> bool {
        matches!(self, Self::SmsUndelivered | Self::SmsFailed)
    }

    /// Channel the failure is attributed to when no step channel is known
    pub fn inferred_channel(&self) -> Option<Channel> {
        match self {
            Self::SmsUndelivered | Self::SmsFailed | Self::LandlineDetected => Some(Channel::Sms),
            Self::EmailBounced | Self::EmailSpam | Self::InvalidEmail => Some(Channel::Email),
            Self::CallNoAnswer | Self::CallBusy | Self::CallFailed | Self::CapacityExhausted => {
                Some(Channel::Voice)
            }
            Self::InvalidNumber => Some(Channel::Sms),
            Self::NoContactMethod | Self::Unrecognized(_) => None,
        }
    }
}

impl From<String> for FailureType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "sms_undelivered" => Self::SmsUndelivered,
            "sms_failed" => Self::SmsFailed,
            "email_bounced" => Self::EmailBounced,
            "email_spam" => Self::EmailSpam,
            "call_no_answer" => Self::CallNoAnswer,
            "call_busy" => Self::CallBusy,
            "call_failed" => Self::CallFailed,
            "capacity_exhausted" => Self::CapacityExhausted,
            "invalid_number" => Self::InvalidNumber,
            "landline_detected" => Self::LandlineDetected,
            "invalid_email" => Self::InvalidEmail,
            "no_contact_method" => Self::NoContactMethod,
            _ => Self::Unrecognized(value),
        }
    }
}

impl From<&str> for FailureType {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<FailureType> for String {
    fn from(value: FailureType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alternate reach-out address supplied out-of-band
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlternateContact {
    pub phone: Option<String>,
    pub email: Option<String>,
}

/// The core's autonomous response to a diagnosed failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HealingAction {
    /// Send only the current step on another channel
    SwitchChannel { new_channel: Channel, reason: String },
    /// Persist `original -> new_channel` and send the current step on it
    OverrideChannel { new_channel: Channel, reason: String },
    /// Immediate SMS from a canned template, optionally re-queueing the step
    InjectFallbackSms {
        template: String,
        requeue_delay_seconds: Option<u64>,
        reason: String,
    },
    /// Rewind one step and retry it after a delay
    ExtendDelay { delay_seconds: u64, reason: String },
    /// Flag a contact field invalid, optionally switching channel
    MarkInvalid {
        field: ContactField,
        switch_to: Option<Channel>,
        reason: String,
    },
    SkipAndAdvance { reason: String },
    EndSequence { reason: String },
    UseAlternativeContact {
        alternate: AlternateContact,
        reason: String,
    },
    /// Re-send the current step on its original channel
    RetryAlternative { reason: String },
}

impl HealingAction {
    pub fn kind(&self) -> HealingActionKind {
        match self {
            Self::SwitchChannel { .. } => HealingActionKind::SwitchChannel,
            Self::OverrideChannel { .. } => HealingActionKind::OverrideChannel,
            Self::InjectFallbackSms { .. } => HealingActionKind::InjectFallbackSms,
            Self::ExtendDelay { .. } => HealingActionKind::ExtendDelay,
            Self::MarkInvalid { .. } => HealingActionKind::MarkInvalid,
            Self::SkipAndAdvance { .. } => HealingActionKind::SkipAndAdvance,
            Self::EndSequence { .. } => HealingActionKind::EndSequence,
            Self::UseAlternativeContact { .. } => HealingActionKind::UseAlternativeContact,
            Self::RetryAlternative { .. } => HealingActionKind::RetryAlternative,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::SwitchChannel { reason, .. }
            | Self::OverrideChannel { reason, .. }
            | Self::InjectFallbackSms { reason, .. }
            | Self::ExtendDelay { reason, .. }
            | Self::MarkInvalid { reason, .. }
            | Self::SkipAndAdvance { reason }
            | Self::EndSequence { reason }
            | Self::UseAlternativeContact { reason, .. }
            | Self::RetryAlternative { reason } => reason,
        }
    }

    /// Target channel for channel-changing actions
    pub fn new_channel(&self) -> Option<Channel> {
        match self {
            Self::SwitchChannel { new_channel, .. } | Self::OverrideChannel { new_channel, .. } => {
                Some(*new_channel)
            }
            Self::MarkInvalid { switch_to, .. } => *switch_to,
            _ => None,
        }
    }

    /// Delay before the step is attempted again, if the action implies one
    pub fn delay_seconds(&self) -> Option<u64> {
        match self {
            Self::ExtendDelay { delay_seconds, .. } => Some(*delay_seconds),
            Self::InjectFallbackSms {
                requeue_delay_seconds,
                ..
            } => *requeue_delay_seconds,
            _ => None,
        }
    }
}

/// Discriminant of [`HealingAction`] used in audit rows and history entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealingActionKind {
    SwitchChannel,
    OverrideChannel,
    InjectFallbackSms,
    ExtendDelay,
    MarkInvalid,
    SkipAndAdvance,
    EndSequence,
    UseAlternativeContact,
    RetryAlternative,
}

impl HealingActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SwitchChannel => "switch_channel",
            Self::OverrideChannel => "override_channel",
            Self::InjectFallbackSms => "inject_fallback_sms",
            Self::ExtendDelay => "extend_delay",
            Self::MarkInvalid => "mark_invalid",
            Self::SkipAndAdvance => "skip_and_advance",
            Self::EndSequence => "end_sequence",
            Self::UseAlternativeContact => "use_alternative_contact",
            Self::RetryAlternative => "retry_alternative",
        }
    }
}

impl fmt::Display for HealingActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HealingActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "switch_channel" => Ok(Self::SwitchChannel),
            "override_channel" => Ok(Self::OverrideChannel),
            "inject_fallback_sms" => Ok(Self::InjectFallbackSms),
            "extend_delay" => Ok(Self::ExtendDelay),
            "mark_invalid" => Ok(Self::MarkInvalid),
            "skip_and_advance" => Ok(Self::SkipAndAdvance),
            "end_sequence" => Ok(Self::EndSequence),
            "use_alternative_contact" => Ok(Self::UseAlternativeContact),
            "retry_alternative" => Ok(Self::RetryAlternative),
            _ => Err(format!("Invalid healing action type: {s}")),
        }
    }
}

/// Compact record kept inside the enrollment row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealingHistoryEntry {
    #[serde(rename = "type")]
    pub action_type: HealingActionKind,
    pub failure_type: FailureType,
    pub reason: String,
    pub step_order: i32,
    pub timestamp: DateTime<Utc>,
}

/// One row of the persistent healing audit log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingAuditEntry {
    pub audit_id: Uuid,
    pub enrollment_id: Uuid,
    pub tenant_id: Uuid,
    pub step_id: Option<Uuid>,
    pub step_order: i32,
    pub channel: Option<Channel>,
    pub failure_type: FailureType,
    pub failure_details: serde_json::Value,
    pub action_type: HealingActionKind,
    pub action_details: serde_json::Value,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Immutable fact that a failure of some type happened, derived from the
/// audit log and used only for threshold counting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub enrollment_id: Uuid,
    pub failure_type: FailureType,
    pub channel: Option<Channel>,
    pub occurred_at: DateTime<Utc>,
}

impl From<&HealingAuditEntry> for FailureRecord {
    fn from(entry: &HealingAuditEntry) -> Self {
        Self {
            enrollment_id: entry.enrollment_id,
            failure_type: entry.failure_type.clone(),
            channel: entry
                .channel
                .or_else(|| entry.failure_type.inferred_channel()),
            occurred_at: entry.created_at,
        }
    }
}

/// Prior failures of one enrollment, oldest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureHistory(Vec<FailureRecord>);

impl FailureHistory {
    pub fn new(records: Vec<FailureRecord>) -> Self {
        Self(records)
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of prior failures whose type is `failure_type`
    pub fn count_of(&self, failure_type: &FailureType) -> usize {
        self.0
            .iter()
            .filter(|r| &r.failure_type == failure_type)
            .count()
    }

    pub fn count_where(&self, predicate: impl Fn(&FailureType) -> bool) -> usize {
        self.0.iter().filter(|r| predicate(&r.failure_type)).count()
    }

    pub fn records(&self) -> &[FailureRecord] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
