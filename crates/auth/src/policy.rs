//! Tuple policy contract: `(subject, domain, object, action)`.
//!
//! The enforcement engine lives in `orgguard-infra`; the guard only sees the
//! [`PolicyCheck`] seam.

use core::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use orgguard_core::TenantId;

/// Literal reserved for cross-tenant superuser policies.
pub const UNIVERSAL_DOMAIN: &str = "*";

/// Action of a module-wide tuple: `(subject, domain, module, "*")` grants every
/// object in `module`. Permission keys never contain `*`, so no real action
/// collides with it.
pub const MODULE_WIDE_ACTION: &str = "*";

/// Tenant scope of a policy tuple or role link.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PolicyDomain {
    Tenant(TenantId),
    /// Matches every tenant. Only present when explicitly seeded.
    Universal,
}

impl From<TenantId> for PolicyDomain {
    fn from(value: TenantId) -> Self {
        PolicyDomain::Tenant(value)
    }
}

impl core::fmt::Display for PolicyDomain {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PolicyDomain::Tenant(t) => core::fmt::Display::fmt(t, f),
            PolicyDomain::Universal => f.write_str(UNIVERSAL_DOMAIN),
        }
    }
}

impl FromStr for PolicyDomain {
    type Err = PolicyStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == UNIVERSAL_DOMAIN {
            return Ok(PolicyDomain::Universal);
        }
        TenantId::from_str(s)
            .map(PolicyDomain::Tenant)
            .map_err(|e| PolicyStoreError::InvalidRecord(e.to_string()))
    }
}

impl Serialize for PolicyDomain {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PolicyDomain {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A grant: `subject` may `action` on `object` within `domain`.
///
/// `subject` is a user id or a role name; role names only reach users through
/// a [`RoleLink`] recorded in the same domain.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PolicyTuple {
    pub subject: String,
    pub domain: PolicyDomain,
    pub object: String,
    pub action: String,
}

impl PolicyTuple {
    pub fn new(
        subject: impl Into<String>,
        domain: impl Into<PolicyDomain>,
        object: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            domain: domain.into(),
            object: object.into(),
            action: action.into(),
        }
    }

    /// Grant on every object of `module`.
    pub fn module_wide(
        subject: impl Into<String>,
        domain: impl Into<PolicyDomain>,
        module: impl Into<String>,
    ) -> Self {
        Self::new(subject, domain, module, MODULE_WIDE_ACTION)
    }

    pub fn validate(&self) -> Result<(), PolicyStoreError> {
        for (field, value) in [
            ("subject", &self.subject),
            ("object", &self.object),
            ("action", &self.action),
        ] {
            if value.trim().is_empty() {
                return Err(PolicyStoreError::InvalidRecord(format!("{field} cannot be empty")));
            }
        }
        Ok(())
    }
}

/// Grouping relation: `user` inherits everything granted to `role` in `domain`.
///
/// `user` may itself be a role name, which gives role -> sub-role chains.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoleLink {
    pub user: String,
    pub role: String,
    pub domain: PolicyDomain,
}

impl RoleLink {
    pub fn new(user: impl Into<String>, role: impl Into<String>, domain: impl Into<PolicyDomain>) -> Self {
        Self {
            user: user.into(),
            role: role.into(),
            domain: domain.into(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyStoreError {
    #[error("policy store unavailable: {0}")]
    Unavailable(String),

    #[error("policy store {operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("policy persistence failed: {0}")]
    Persistence(String),

    #[error("invalid policy record: {0}")]
    InvalidRecord(String),
}

impl PolicyStoreError {
    /// True when the store itself is degraded (as opposed to bad input).
    pub fn is_degraded(&self) -> bool {
        !matches!(self, PolicyStoreError::InvalidRecord(_))
    }
}

/// Read side of the tuple policy store, as consumed by the guard.
#[async_trait::async_trait]
pub trait PolicyCheck: Send + Sync {
    async fn check(
        &self,
        subject: &str,
        tenant_id: TenantId,
        object: &str,
        action: &str,
    ) -> Result<bool, PolicyStoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_string_form() {
        let t = TenantId::new();
        assert_eq!(PolicyDomain::Tenant(t).to_string(), t.to_string());
        assert_eq!(PolicyDomain::Universal.to_string(), "*");
        assert_eq!("*".parse::<PolicyDomain>().unwrap(), PolicyDomain::Universal);
        assert_eq!(t.to_string().parse::<PolicyDomain>().unwrap(), PolicyDomain::Tenant(t));
        assert!("org1".parse::<PolicyDomain>().is_err());
    }

    #[test]
    fn tuple_serializes_as_four_strings() {
        let t = TenantId::new();
        let tuple = PolicyTuple::new("user-x", t, "sales:leads", "view");
        let json = serde_json::to_value(&tuple).unwrap();
        assert_eq!(json["domain"], serde_json::json!(t.to_string()));
        assert!(PolicyTuple::new("", t, "sales", "view").validate().is_err());
    }
}
