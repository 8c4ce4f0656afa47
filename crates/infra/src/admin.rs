//! Role and assignment administration.
//!
//! The role store's capability maps are authoritative. Every change made here
//! is mirrored into the tenant's policy domain as tuples, so the policy store
//! stays a projection of the roles and answers what the resolver answers:
//!
//! - each `true` leaf becomes `(role name, tenant, key object, key action)`,
//!   for the key it matches exactly and the key it matches nested
//! - a module granted as a whole (`true`, a `view` or `manage` leaf, or in
//!   compatible mode any detail object) becomes the module-wide tuple
//!   `(role name, tenant, module, "*")`
//! - each assignment becomes the link `(principal id, role name, tenant)`
//!
//! Every operation saves the policy store before returning.

use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;

use orgguard_auth::{
    ModuleGrant, PermissionKey, PolicyDomain, PolicyStoreError, PolicyTuple, ResolutionMode, Role,
    RoleLink,
};
use orgguard_core::{PrincipalId, RoleId, TenantId};

use crate::policy_store::PolicyEnforcer;
use crate::role_store::{RoleStore, RoleStoreError};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdminError {
    #[error(transparent)]
    Roles(#[from] RoleStoreError),
    #[error(transparent)]
    Policy(#[from] PolicyStoreError),
}

/// Policy tuples a role projects into its tenant's domain under `mode`.
pub fn policy_tuples(role: &Role, mode: ResolutionMode) -> Vec<PolicyTuple> {
    let mut tuples = BTreeSet::new();
    for (module, grant) in role.capabilities.modules() {
        let module_wide = match grant {
            ModuleGrant::Wildcard(granted) => *granted,
            ModuleGrant::Detail(_) => {
                mode == ResolutionMode::Compatible
                    || grant.leaf("view") == Some(true)
                    || grant.leaf("manage") == Some(true)
            }
        };
        if module_wide {
            tuples.insert(PolicyTuple::module_wide(&role.name, role.tenant_id, module));
        }
    }

    for (module, fragment) in role.capabilities.leaves() {
        // Matched exactly: the fragment is itself a key of this module.
        let exact = PermissionKey::parse(fragment)
            .ok()
            .filter(|key| key.module() == module);
        // Matched nested: the fragment is the key without its module.
        let nested = PermissionKey::parse(&format!("{module}:{fragment}")).ok();
        for key in exact.into_iter().chain(nested) {
            if let Some(action) = key.action() {
                tuples.insert(PolicyTuple::new(&role.name, role.tenant_id, key.object(), action));
            }
        }
    }
    tuples.into_iter().collect()
}

pub struct AccessAdministration {
    roles: Arc<dyn RoleStore>,
    policies: Arc<PolicyEnforcer>,
    mode: ResolutionMode,
}

impl AccessAdministration {
    pub fn new(roles: Arc<dyn RoleStore>, policies: Arc<PolicyEnforcer>) -> Self {
        Self {
            roles,
            policies,
            mode: ResolutionMode::default(),
        }
    }

    /// Project roles the way the guard resolves them in `mode`.
    pub fn with_mode(mut self, mode: ResolutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn roles(&self) -> &Arc<dyn RoleStore> {
        &self.roles
    }

    /// Create or replace a role and re-project its tuples (handles renames).
    pub async fn upsert_role(&self, role: Role) -> Result<Option<Role>, AdminError> {
        let previous = self.roles.upsert(role.clone())?;
        let tuples = policy_tuples(&role, self.mode);
        let projected = tuples.len();

        self.policies
            .transact(PolicyDomain::Tenant(role.tenant_id), |set| {
                if let Some(prev) = &previous {
                    set.rename_role(&prev.name, &role.name);
                }
                set.remove_subject_policies(&role.name);
                for tuple in tuples {
                    set.add_policy(tuple);
                }
            })
            .await?;
        self.policies.save().await?;

        tracing::info!(
            tenant_id = %role.tenant_id,
            role_id = %role.id,
            role = %role.name,
            projected,
            created = previous.is_none(),
            "role upserted"
        );
        Ok(previous)
    }

    /// Delete a role, its tuples, and every assignment to it.
    pub async fn delete_role(&self, tenant_id: TenantId, role_id: RoleId) -> Result<Role, AdminError> {
        let role = self.roles.delete(tenant_id, role_id)?;
        self.policies
            .transact(PolicyDomain::Tenant(tenant_id), |set| {
                set.remove_subject_policies(&role.name);
                set.remove_links_to(&role.name);
            })
            .await?;
        self.policies.save().await?;

        tracing::info!(tenant_id = %tenant_id, role_id = %role_id, role = %role.name, "role deleted");
        Ok(role)
    }

    /// Link a principal to a role in its tenant. Returns false if already linked.
    pub async fn assign_role(
        &self,
        tenant_id: TenantId,
        principal_id: PrincipalId,
        role_id: RoleId,
    ) -> Result<bool, AdminError> {
        let link = self.link_for(tenant_id, principal_id, role_id)?;
        let added = self.policies.add_role_for_user(link).await?;
        self.policies.save().await?;

        tracing::info!(tenant_id = %tenant_id, principal_id = %principal_id, role_id = %role_id, added, "role assigned");
        Ok(added)
    }

    /// Remove a principal's link to a role. Returns false if there was none.
    pub async fn revoke_role(
        &self,
        tenant_id: TenantId,
        principal_id: PrincipalId,
        role_id: RoleId,
    ) -> Result<bool, AdminError> {
        let link = self.link_for(tenant_id, principal_id, role_id)?;
        let removed = self.policies.delete_role_for_user(&link).await?;
        self.policies.save().await?;

        tracing::info!(tenant_id = %tenant_id, principal_id = %principal_id, role_id = %role_id, removed, "role revoked");
        Ok(removed)
    }

    /// Rebuild a tenant's policy tuples from the role store. Links are kept.
    ///
    /// Returns the number of tuples projected.
    pub async fn resync_tenant(&self, tenant_id: TenantId) -> Result<usize, AdminError> {
        let tuples: Vec<PolicyTuple> = self
            .roles
            .list(tenant_id)?
            .iter()
            .flat_map(|role| policy_tuples(role, self.mode))
            .collect();
        let projected = tuples.len();

        self.policies
            .transact(PolicyDomain::Tenant(tenant_id), |set| {
                set.clear_policies();
                for tuple in tuples {
                    set.add_policy(tuple);
                }
            })
            .await?;
        self.policies.save().await?;

        tracing::info!(tenant_id = %tenant_id, projected, "tenant policies resynced");
        Ok(projected)
    }

    fn link_for(
        &self,
        tenant_id: TenantId,
        principal_id: PrincipalId,
        role_id: RoleId,
    ) -> Result<RoleLink, AdminError> {
        let role = self
            .roles
            .get(tenant_id, role_id)?
            .ok_or(RoleStoreError::NotFound(role_id))?;
        Ok(RoleLink::new(principal_id.to_string(), role.name, tenant_id))
    }
}
