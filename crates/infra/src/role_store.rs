use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use orgguard_auth::{Role, RoleSource, RoleSourceError};
use orgguard_core::{DomainError, RoleId, TenantId};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RoleStoreError {
    #[error("role not found: {0}")]
    NotFound(RoleId),
    #[error("system role {0} cannot be deleted")]
    SystemRole(String),
    #[error("role name already used in tenant: {0}")]
    DuplicateName(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("role store unavailable: {0}")]
    Unavailable(String),
}

impl From<RoleStoreError> for RoleSourceError {
    fn from(err: RoleStoreError) -> Self {
        RoleSourceError::Unavailable(err.to_string())
    }
}

/// Tenant-isolated role storage.
///
/// Every lookup is keyed by `(tenant_id, role_id)`; a role id from another
/// tenant is simply not found.
pub trait RoleStore: RoleSource {
    fn get(&self, tenant_id: TenantId, role_id: RoleId) -> Result<Option<Role>, RoleStoreError>;

    /// Insert or replace a role. Returns the previous version, if any.
    ///
    /// A system role stays a system role: replacing it keeps `system` set.
    fn upsert(&self, role: Role) -> Result<Option<Role>, RoleStoreError>;

    fn list(&self, tenant_id: TenantId) -> Result<Vec<Role>, RoleStoreError>;

    fn delete(&self, tenant_id: TenantId, role_id: RoleId) -> Result<Role, RoleStoreError>;
}

impl<S> RoleStore for Arc<S>
where
    S: RoleStore + ?Sized,
{
    fn get(&self, tenant_id: TenantId, role_id: RoleId) -> Result<Option<Role>, RoleStoreError> {
        (**self).get(tenant_id, role_id)
    }

    fn upsert(&self, role: Role) -> Result<Option<Role>, RoleStoreError> {
        (**self).upsert(role)
    }

    fn list(&self, tenant_id: TenantId) -> Result<Vec<Role>, RoleStoreError> {
        (**self).list(tenant_id)
    }

    fn delete(&self, tenant_id: TenantId, role_id: RoleId) -> Result<Role, RoleStoreError> {
        (**self).delete(tenant_id, role_id)
    }
}

/// In-memory role store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryRoleStore {
    inner: RwLock<HashMap<(TenantId, RoleId), Role>>,
}

fn poisoned<T>(_: T) -> RoleStoreError {
    RoleStoreError::Unavailable("lock poisoned".to_string())
}

impl InMemoryRoleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RoleStore for InMemoryRoleStore {
    fn get(&self, tenant_id: TenantId, role_id: RoleId) -> Result<Option<Role>, RoleStoreError> {
        let map = self.inner.read().map_err(poisoned)?;
        Ok(map.get(&(tenant_id, role_id)).cloned())
    }

    fn upsert(&self, mut role: Role) -> Result<Option<Role>, RoleStoreError> {
        role.validate()?;
        let mut map = self.inner.write().map_err(poisoned)?;
        if map.get(&(role.tenant_id, role.id)).is_some_and(|r| r.system) {
            role.system = true;
        }
        let taken = map
            .values()
            .any(|r| r.tenant_id == role.tenant_id && r.id != role.id && r.name == role.name);
        if taken {
            return Err(RoleStoreError::DuplicateName(role.name));
        }
        Ok(map.insert((role.tenant_id, role.id), role))
    }

    fn list(&self, tenant_id: TenantId) -> Result<Vec<Role>, RoleStoreError> {
        let map = self.inner.read().map_err(poisoned)?;
        let mut roles: Vec<Role> = map
            .iter()
            .filter_map(|((t, _), r)| (*t == tenant_id).then(|| r.clone()))
            .collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    fn delete(&self, tenant_id: TenantId, role_id: RoleId) -> Result<Role, RoleStoreError> {
        let mut map = self.inner.write().map_err(poisoned)?;
        match map.get(&(tenant_id, role_id)) {
            None => Err(RoleStoreError::NotFound(role_id)),
            Some(role) if role.system => Err(RoleStoreError::SystemRole(role.name.clone())),
            Some(_) => map
                .remove(&(tenant_id, role_id))
                .ok_or(RoleStoreError::NotFound(role_id)),
        }
    }
}

impl RoleSource for InMemoryRoleStore {
    fn roles_for(&self, tenant_id: TenantId, role_ids: &[RoleId]) -> Result<Vec<Role>, RoleSourceError> {
        let map = self.inner.read().map_err(poisoned)?;
        Ok(role_ids
            .iter()
            .filter_map(|id| map.get(&(tenant_id, *id)).cloned())
            .collect())
    }
}
