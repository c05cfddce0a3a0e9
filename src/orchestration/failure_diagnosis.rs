//! # Failure Diagnosis
//!
//! Pure decision tree that turns a delivery or validity failure into exactly
//! one [`HealingAction`].
//!
//! ## Overview
//!
//! Diagnosis never touches storage or the network. It looks at the failure
//! type, how often the same kind of failure already happened for this
//! enrollment, and what the contact has on file:
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐     ┌─────────────────┐
//! │ FailureType     │────▶│ FailureDiagnosis │────▶│ HealingAction   │
//! │ + history       │     │ decision tree    │     │ + reason        │
//! │ + contact       │     └──────────────────┘     └─────────────────┘
//! └─────────────────┘
//! ```
//!
//! Thresholds and delays are constants in [`crate::constants::diagnosis`].
//! Every action carries a human-readable reason for the audit trail.

use crate::constants::{
    diagnosis::*, CALL_FAILED_FALLBACK_TEMPLATE, CALL_NO_ANSWER_FALLBACK_TEMPLATE,
};
use crate::models::{
    Channel, Contact, ContactField, Enrollment, FailureHistory, FailureType, HealingAction,
};

/// Trait for failure diagnosis strategies
pub trait FailureDiagnosis: Send + Sync {
    /// Produce the healing action for one failure
    fn diagnose(
        &self,
        failure_type: &FailureType,
        history: &FailureHistory,
        contact: &Contact,
        enrollment: &Enrollment,
    ) -> HealingAction;

    /// Get the strategy name for identification
    fn strategy_name(&self) -> &'static str;
}

/// The fixed decision tree used in production
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardFailureDiagnosis;

impl StandardFailureDiagnosis {
    pub fn new() -> Self {
        Self
    }

    /// Email on file, not marked invalid, and not already given up on
    fn email_available(contact: &Contact, enrollment: &Enrollment) -> bool {
        contact.has_usable_email() && !enrollment.failed_channels.contains(&Channel::Email)
    }

    fn diagnose_sms_delivery(
        &self,
        failure_type: &FailureType,
        history: &FailureHistory,
        contact: &Contact,
        enrollment: &Enrollment,
    ) -> HealingAction {
        let prior = history.count_where(FailureType::is_sms_delivery);
        let has_email = Self::email_available(contact, enrollment);

        if prior == 0 {
            return HealingAction::ExtendDelay {
                delay_seconds: SMS_FIRST_FAILURE_DELAY_SECONDS,
                reason: format!("First SMS failure ({failure_type}); retrying after a short delay"),
            };
        }

        if contact.is_landline() {
            return if has_email {
                HealingAction::OverrideChannel {
                    new_channel: Channel::Email,
                    reason: "Phone is a landline and cannot receive SMS; moving SMS steps to email"
                        .to_string(),
                }
            } else {
                HealingAction::SwitchChannel {
                    new_channel: Channel::Voice,
                    reason: "Phone is a landline with no email on file; calling instead".to_string(),
                }
            };
        }

        if prior >= SMS_EMAIL_SWITCH_MIN_PRIOR && has_email {
            return HealingAction::SwitchChannel {
                new_channel: Channel::Email,
                reason: format!("SMS failed {} times; sending this step by email", prior + 1),
            };
        }

        if prior >= SMS_VOICE_SWITCH_MIN_PRIOR && !has_email {
            return HealingAction::SwitchChannel {
                new_channel: Channel::Voice,
                reason: format!(
                    "SMS failed {} times and no email on file; calling instead",
                    prior + 1
                ),
            };
        }

        HealingAction::ExtendDelay {
            delay_seconds: SMS_REPEAT_FAILURE_DELAY_SECONDS,
            reason: format!("SMS failed {} times; retrying after a longer delay", prior + 1),
        }
    }

    fn diagnose_email_bounce(&self, history: &FailureHistory) -> HealingAction {
        let prior = history.count_of(&FailureType::EmailBounced);
        if prior >= EMAIL_BOUNCE_INVALID_MIN_PRIOR {
            HealingAction::MarkInvalid {
                field: ContactField::Email,
                switch_to: Some(Channel::Sms),
                reason: format!("Email bounced {} times; marking invalid and switching to SMS", prior + 1),
            }
        } else {
            HealingAction::ExtendDelay {
                delay_seconds: EMAIL_BOUNCE_RETRY_DELAY_SECONDS,
                reason: "First email bounce; retrying in an hour".to_string(),
            }
        }
    }

    fn diagnose_no_answer(
        &self,
        history: &FailureHistory,
        contact: &Contact,
        enrollment: &Enrollment,
    ) -> HealingAction {
        let prior = history.count_of(&FailureType::CallNoAnswer);
        if prior == 0 {
            return HealingAction::InjectFallbackSms {
                template: CALL_NO_ANSWER_FALLBACK_TEMPLATE.to_string(),
                requeue_delay_seconds: None,
                reason: "Call not answered; following up by SMS".to_string(),
            };
        }

        if prior < CALL_NO_ANSWER_OVERRIDE_MIN_PRIOR {
            return HealingAction::ExtendDelay {
                delay_seconds: CALL_NO_ANSWER_RETRY_DELAY_SECONDS,
                reason: "Second unanswered call; retrying in two hours".to_string(),
            };
        }

        let new_channel = if Self::email_available(contact, enrollment) {
            Channel::Email
        } else {
            Channel::Sms
        };
        HealingAction::OverrideChannel {
            new_channel,
            reason: format!(
                "{} unanswered calls; moving voice steps to {new_channel}",
                prior + 1
            ),
        }
    }
}

impl FailureDiagnosis for StandardFailureDiagnosis {
    fn diagnose(
        &self,
        failure_type: &FailureType,
        history: &FailureHistory,
        contact: &Contact,
        enrollment: &Enrollment,
    ) -> HealingAction {
        let has_email = Self::email_available(contact, enrollment);

        match failure_type {
            FailureType::SmsUndelivered | FailureType::SmsFailed => {
                self.diagnose_sms_delivery(failure_type, history, contact, enrollment)
            }
            FailureType::EmailBounced => self.diagnose_email_bounce(history),
            FailureType::EmailSpam => HealingAction::OverrideChannel {
                new_channel: Channel::Sms,
                reason: "Email reported as spam; moving email steps to SMS".to_string(),
            },
            FailureType::CallNoAnswer => self.diagnose_no_answer(history, contact, enrollment),
            FailureType::CallBusy => HealingAction::ExtendDelay {
                delay_seconds: CALL_BUSY_DELAY_SECONDS,
                reason: "Line busy; retrying in 15 minutes".to_string(),
            },
            FailureType::CallFailed | FailureType::CapacityExhausted => {
                HealingAction::InjectFallbackSms {
                    template: CALL_FAILED_FALLBACK_TEMPLATE.to_string(),
                    requeue_delay_seconds: Some(CALL_FAILED_REQUEUE_DELAY_SECONDS),
                    reason: format!(
                        "Call could not be placed ({failure_type}); texting and re-queueing the call"
                    ),
                }
            }
            FailureType::InvalidNumber => {
                if has_email {
                    HealingAction::OverrideChannel {
                        new_channel: Channel::Email,
                        reason: "Phone number invalid; moving to email".to_string(),
                    }
                } else {
                    HealingAction::EndSequence {
                        reason: "Phone number invalid and no email on file".to_string(),
                    }
                }
            }
            FailureType::LandlineDetected => {
                let new_channel = if has_email { Channel::Email } else { Channel::Voice };
                HealingAction::OverrideChannel {
                    new_channel,
                    reason: format!("Landline cannot receive SMS; moving SMS steps to {new_channel}"),
                }
            }
            FailureType::InvalidEmail => HealingAction::MarkInvalid {
                field: ContactField::Email,
                switch_to: Some(Channel::Sms),
                reason: "Email address invalid; switching to SMS".to_string(),
            },
            FailureType::NoContactMethod => HealingAction::EndSequence {
                reason: "Contact has no reachable phone or email".to_string(),
            },
            FailureType::Unrecognized(other) => HealingAction::SkipAndAdvance {
                reason: format!("Unrecognized failure type '{other}'; skipping step"),
            },
        }
    }

    fn strategy_name(&self) -> &'static str {
        "StandardFailureDiagnosis"
    }
}

/// Diagnose with the standard decision tree
pub fn diagnose(
    failure_type: &FailureType,
    history: &FailureHistory,
    contact: &Contact,
    enrollment: &Enrollment,
) -> HealingAction {
    StandardFailureDiagnosis.diagnose(failure_type, history, contact, enrollment)
}
