use serde::{Deserialize, Serialize};

use orgguard_auth::CapabilityMap;
use orgguard_core::{PrincipalId, RoleId, TenantId};

/// Body of `POST /authz/check`: a full key or the guard's call shape.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CheckRequest {
    Key {
        key: String,
    },
    Parts {
        module: String,
        submodule_or_action: String,
        #[serde(default)]
        action: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
pub struct ExplainRequest {
    pub key: String,
}

/// Body of `POST /authz/policy/check`. `subject` defaults to the caller.
#[derive(Debug, Deserialize)]
pub struct PolicyCheckRequest {
    #[serde(default)]
    pub subject: Option<String>,
    pub object: String,
    pub action: String,
}

#[derive(Debug, Serialize)]
pub struct PolicyCheckResponse {
    pub subject: String,
    pub tenant_id: TenantId,
    pub object: String,
    pub action: String,
    pub allowed: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpsertRoleRequest {
    pub name: String,
    #[serde(default)]
    pub capabilities: CapabilityMap,
}

#[derive(Debug, Deserialize)]
pub struct AssignmentRequest {
    pub principal_id: PrincipalId,
    pub role_id: RoleId,
}

#[derive(Debug, Serialize)]
pub struct AssignmentResponse {
    pub principal_id: PrincipalId,
    pub role_id: RoleId,
    /// False when the request was a no-op.
    pub changed: bool,
}

#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub user_id: PrincipalId,
    pub org_id: TenantId,
    pub role_ids: Vec<RoleId>,
    pub is_super_admin: bool,
    pub capabilities: CapabilityMap,
}
