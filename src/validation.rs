//! Contact validity checks
//!
//! Decides whether a contact can currently be reached on a channel. Used before
//! every dispatch and when choosing a healing target. Each invalid outcome
//! carries the specific failure type so diagnosis can react to it.

use serde::{Deserialize, Serialize};

use crate::models::{Channel, Contact, FailureType};

/// Outcome of a validity check for one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChannelValidity {
    Valid,
    Invalid { failure_type: FailureType },
}

impl ChannelValidity {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    pub fn failure_type(&self) -> Option<&FailureType> {
        match self {
            Self::Valid => None,
            Self::Invalid { failure_type } => Some(failure_type),
        }
    }

    fn invalid(failure_type: FailureType) -> Self {
        Self::Invalid { failure_type }
    }
}

/// Check whether `contact` can be reached on `channel`. Pure; repeated calls
/// with unchanged contact data return identical results.
pub fn check_contact_validity(contact: &Contact, channel: Channel) -> ChannelValidity {
    match channel {
        Channel::Sms => {
            if contact.phone_valid == Some(false) {
                ChannelValidity::invalid(FailureType::InvalidNumber)
            } else if contact.is_landline() {
                ChannelValidity::invalid(FailureType::LandlineDetected)
            } else if contact.phone_number().is_none() {
                ChannelValidity::invalid(FailureType::NoContactMethod)
            } else {
                ChannelValidity::Valid
            }
        }
        Channel::Voice => {
            if contact.phone_valid == Some(false) {
                ChannelValidity::invalid(FailureType::InvalidNumber)
            } else if contact.phone_number().is_none() {
                ChannelValidity::invalid(FailureType::NoContactMethod)
            } else {
                ChannelValidity::Valid
            }
        }
        Channel::Email => {
            if contact.email_valid == Some(false) {
                ChannelValidity::invalid(FailureType::InvalidEmail)
            } else if contact.email_address().is_none() {
                ChannelValidity::invalid(FailureType::NoContactMethod)
            } else {
                ChannelValidity::Valid
            }
        }
    }
}

/// Channels the contact is currently valid for, in preference order
pub fn valid_channels(contact: &Contact) -> Vec<Channel> {
    [Channel::Email, Channel::Sms, Channel::Voice]
        .into_iter()
        .filter(|channel| check_contact_validity(contact, *channel).is_valid())
        .collect()
}

/// Pick a channel to move to: `preferred` if valid, otherwise the first other
/// valid channel that is not `avoid`. `None` means nothing can reach the
/// contact and the sequence should end.
pub fn select_valid_target(
    contact: &Contact,
    preferred: Channel,
    avoid: Channel,
) -> Option<Channel> {
    if check_contact_validity(contact, preferred).is_valid() {
        return Some(preferred);
    }
    valid_channels(contact)
        .into_iter()
        .find(|channel| *channel != avoid)
}
