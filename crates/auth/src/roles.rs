use serde::{Deserialize, Serialize};

use orgguard_core::{DomainError, RoleId, TenantId};

use crate::CapabilityMap;

/// Role name reserved for the seeded administrator role.
pub const ADMINISTRATOR_ROLE: &str = "Administrator";

/// A tenant-scoped role and the capabilities it grants.
///
/// Roles never leave their tenant: the synthesizer drops roles whose
/// `tenant_id` differs from the active tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub tenant_id: TenantId,
    pub name: String,
    pub capabilities: CapabilityMap,
    /// Seeded roles cannot be deleted.
    #[serde(default)]
    pub system: bool,
}

impl Role {
    pub fn new(tenant_id: TenantId, name: impl Into<String>, capabilities: CapabilityMap) -> Self {
        Self {
            id: RoleId::new(),
            tenant_id,
            name: name.into(),
            capabilities,
            system: false,
        }
    }

    pub fn system(mut self) -> Self {
        self.system = true;
        self
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("role name cannot be empty"));
        }
        if name != self.name {
            return Err(DomainError::validation(
                "role name cannot have leading or trailing whitespace",
            ));
        }
        Ok(())
    }
}
