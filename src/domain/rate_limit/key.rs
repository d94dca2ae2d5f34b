//! Rate limit keys.
//!
//! A key is the composite of a logical service and a caller identity. Every
//! process must render the same logical caller to the same key string, or
//! concurrent processes would keep separate windows for one shared budget.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::domain::foundation::{CredentialId, TenantId};

/// Who is consuming a service's budget.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum CallerId {
    /// Limits scoped to one tenant.
    Tenant(TenantId),
    /// Limits scoped to an upstream credential shared by several tenants.
    Credential(CredentialId),
    /// Unauthenticated traffic, identified by a hashed client address.
    Anonymous(String),
}

impl CallerId {
    /// Caller identified by tenant.
    pub fn tenant(id: TenantId) -> Self {
        CallerId::Tenant(id)
    }

    /// Caller identified by shared credential.
    pub fn credential(id: CredentialId) -> Self {
        CallerId::Credential(id)
    }

    /// Anonymous caller keyed by the first 16 hex chars of SHA-256(address).
    ///
    /// Raw addresses never reach the coordination store.
    pub fn anonymous(address: &str) -> Self {
        let digest = Sha256::digest(address.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        CallerId::Anonymous(hex[..16].to_string())
    }

    /// Short label for the identity kind.
    pub fn kind(&self) -> &'static str {
        match self {
            CallerId::Tenant(_) => "tenant",
            CallerId::Credential(_) => "cred",
            CallerId::Anonymous(_) => "ip",
        }
    }

    /// The identity value.
    pub fn id(&self) -> &str {
        match self {
            CallerId::Tenant(id) => id.as_str(),
            CallerId::Credential(id) => id.as_str(),
            CallerId::Anonymous(hash) => hash,
        }
    }

    /// Trailing characters of the id, for log lines.
    pub fn redacted(&self) -> String {
        let id = self.id();
        let tail: String = id
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("{}:..{}", self.kind(), tail)
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

/// Key identifying one sliding window.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct RateLimitKey {
    /// Logical service name.
    pub service: String,
    /// Caller consuming the service.
    pub caller: CallerId,
}

impl RateLimitKey {
    /// Creates a key for a service and caller.
    pub fn new(service: impl Into<String>, caller: CallerId) -> Self {
        Self {
            service: service.into(),
            caller,
        }
    }

    /// Returns the store key for the window entries.
    pub fn to_redis_key(&self) -> String {
        format!(
            "ratelimit:{}:{}:{}",
            self.service,
            self.caller.kind(),
            self.caller.id()
        )
    }

    /// Returns the store key for the upstream ceiling of this window.
    pub fn ceiling_key(&self) -> String {
        format!("{}:upstream", self.to_redis_key())
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.caller.redacted())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(id: &str) -> CallerId {
        CallerId::tenant(TenantId::new(id).unwrap())
    }

    #[test]
    fn redis_key_format_for_tenant() {
        let key = RateLimitKey::new("model-inference", tenant("t-1"));
        assert_eq!(key.to_redis_key(), "ratelimit:model-inference:tenant:t-1");
        assert_eq!(
            key.ceiling_key(),
            "ratelimit:model-inference:tenant:t-1:upstream"
        );
    }

    #[test]
    fn redis_key_format_for_credential() {
        let cred = CallerId::credential(CredentialId::new("app-key-1").unwrap());
        let key = RateLimitKey::new("social-user-timeline", cred);
        assert_eq!(
            key.to_redis_key(),
            "ratelimit:social-user-timeline:cred:app-key-1"
        );
    }

    #[test]
    fn same_caller_always_renders_same_key() {
        let a = RateLimitKey::new("api-minute", CallerId::anonymous("10.0.0.1"));
        let b = RateLimitKey::new("api-minute", CallerId::anonymous("10.0.0.1"));
        assert_eq!(a.to_redis_key(), b.to_redis_key());
    }

    #[test]
    fn anonymous_caller_hashes_address() {
        let caller = CallerId::anonymous("192.168.1.1");
        assert_eq!(caller.kind(), "ip");
        assert_eq!(caller.id().len(), 16);
        assert!(!caller.id().contains("192"));
        assert_ne!(caller, CallerId::anonymous("192.168.1.2"));
    }

    #[test]
    fn tenant_and_credential_with_same_id_differ() {
        let t = RateLimitKey::new("svc", tenant("shared"));
        let c = RateLimitKey::new(
            "svc",
            CallerId::credential(CredentialId::new("shared").unwrap()),
        );
        assert_ne!(t.to_redis_key(), c.to_redis_key());
    }

    #[test]
    fn redacted_keeps_only_tail() {
        assert_eq!(tenant("tenant-12345").redacted(), "tenant:..2345");
        assert_eq!(tenant("ab").redacted(), "tenant:..ab");
    }
}
