use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::FALLBACK_FIRST_NAME;

/// Line type reported by phone number lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhoneType {
    Mobile,
    Landline,
    Voip,
    #[serde(other)]
    Unknown,
}

impl PhoneType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mobile => "mobile",
            Self::Landline => "landline",
            Self::Voip => "voip",
            Self::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for PhoneType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "mobile" => Self::Mobile,
            "landline" => Self::Landline,
            "voip" => Self::Voip,
            _ => Self::Unknown,
        })
    }
}

/// Contact attribute whose validity flag can be flipped by healing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactField {
    Email,
    Phone,
}

/// A tenant's lead as seen by the orchestration core.
///
/// `phone_valid`/`email_valid` are tri-state: `None` means never verified,
/// `Some(false)` means explicitly marked invalid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub contact_id: Uuid,
    pub tenant_id: Uuid,
    pub first_name: Option<String>,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub phone_type: Option<PhoneType>,
    pub phone_valid: Option<bool>,
    pub email: Option<String>,
    pub email_valid: Option<bool>,
}

impl Contact {
    pub fn new(tenant_id: Uuid) -> Self {
        Self {
            contact_id: Uuid::new_v4(),
            tenant_id,
            first_name: None,
            full_name: None,
            phone: None,
            phone_type: None,
            phone_valid: None,
            email: None,
            email_valid: None,
        }
    }

    pub fn with_phone(mut self, phone: impl Into<String>, phone_type: PhoneType) -> Self {
        self.phone = Some(phone.into());
        self.phone_type = Some(phone_type);
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_full_name(mut self, name: impl Into<String>) -> Self {
        self.full_name = Some(name.into());
        self
    }

    pub fn phone_number(&self) -> Option<&str> {
        self.phone.as_deref().map(str::trim).filter(|p| !p.is_empty())
    }

    pub fn email_address(&self) -> Option<&str> {
        self.email.as_deref().map(str::trim).filter(|e| !e.is_empty())
    }

    /// Email on file that has not been marked invalid
    pub fn has_usable_email(&self) -> bool {
        self.email_address().is_some() && self.email_valid != Some(false)
    }

    pub fn is_landline(&self) -> bool {
        self.phone_type == Some(PhoneType::Landline)
    }

    /// Name used for `{{first_name}}`: explicit first name, else the first
    /// token of the full name, else a neutral greeting.
    pub fn greeting_name(&self) -> String {
        self.first_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .or_else(|| {
                self.full_name
                    .as_deref()
                    .and_then(|full| full.split_whitespace().next())
            })
            .unwrap_or(FALLBACK_FIRST_NAME)
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting_name_prefers_explicit_first_name() {
        let mut contact = Contact::new(Uuid::new_v4()).with_full_name("Maria Lopez");
        assert_eq!(contact.greeting_name(), "Maria");

        contact.first_name = Some("Mia".to_string());
        assert_eq!(contact.greeting_name(), "Mia");

        contact.first_name = Some("  ".to_string());
        contact.full_name = None;
        assert_eq!(contact.greeting_name(), FALLBACK_FIRST_NAME);
    }

    #[test]
    fn test_usable_email_respects_invalid_flag() {
        let mut contact = Contact::new(Uuid::new_v4()).with_email("a@example.com");
        assert!(contact.has_usable_email());

        contact.email_valid = Some(false);
        assert!(!contact.has_usable_email());

        contact.email = Some("   ".to_string());
        contact.email_valid = None;
        assert!(!contact.has_usable_email());
    }

    #[test]
    fn test_unknown_phone_type_deserializes() {
        let parsed: PhoneType = serde_json::from_str("\"satellite\"").unwrap();
        assert_eq!(parsed, PhoneType::Unknown);
    }
}
