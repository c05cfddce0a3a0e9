use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Delivery channel of a sequence step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Sms,
    Email,
    Voice,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Sms, Channel::Email, Channel::Voice];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sms => "sms",
            Self::Email => "email",
            Self::Voice => "voice",
        }
    }

    /// Whether the channel reaches the contact through their phone number
    pub fn uses_phone(&self) -> bool {
        matches!(self, Self::Sms | Self::Voice)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sms" => Ok(Self::Sms),
            "email" => Ok(Self::Email),
            "voice" | "call" => Ok(Self::Voice),
            _ => Err(format!("Invalid channel: {s}")),
        }
    }
}

/// Per-enrollment substitution of an original step channel.
///
/// Once a channel is overridden every later step of that channel is dispatched
/// on the substitute until the entry is overwritten. Writes merge into the
/// existing map; they never replace it wholesale.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelOverrideMap(BTreeMap<Channel, Channel>);

impl ChannelOverrideMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel a step of `original` channel should actually be sent on
    pub fn resolve(&self, original: Channel) -> Channel {
        self.0.get(&original).copied().unwrap_or(original)
    }

    pub fn get(&self, original: Channel) -> Option<Channel> {
        self.0.get(&original).copied()
    }

    /// Merge a single override, returning the previous target if one existed
    pub fn merge(&mut self, original: Channel, substitute: Channel) -> Option<Channel> {
        self.0.insert(original, substitute)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Channel, Channel)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }
}

impl FromIterator<(Channel, Channel)> for ChannelOverrideMap {
    fn from_iter<I: IntoIterator<Item = (Channel, Channel)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
