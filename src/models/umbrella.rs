use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Tenant-to-shared-account assignment as stored, credential still encrypted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UmbrellaAssignment {
    pub umbrella_id: Uuid,
    pub tenant_id: Uuid,
    pub account_type: String,
    pub encrypted_credential: String,
    /// Concurrency limit of the shared account across all tenants
    pub concurrency_limit: i32,
    /// Tenant-specific cap inside the shared limit
    pub tenant_concurrency_cap: Option<i32>,
    pub priority_weight: i32,
    pub active: bool,
}

/// Resolved umbrella binding handed to dispatch and admission control
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UmbrellaMapping {
    pub umbrella_id: Uuid,
    pub tenant_id: Uuid,
    pub account_type: String,
    pub credential: Credential,
    pub concurrency_limit: u32,
    pub tenant_cap: u32,
    pub priority_weight: i32,
}

/// Decrypted provider credential. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_debug_is_redacted() {
        let credential = Credential::new("sk_live_123");
        let printed = format!("{credential:?}");
        assert!(!printed.contains("sk_live_123"));
        assert_eq!(credential.expose(), "sk_live_123");
    }
}
