//! Role and assignment administration endpoints.
//!
//! Every handler asserts `authz:roles:manage` (or `authz:roles:view` for reads)
//! and acts on the caller's tenant only.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
};

use orgguard_auth::{Decision, Role};
use orgguard_core::RoleId;
use orgguard_infra::RoleStore;

use crate::app::dto::{AssignmentRequest, AssignmentResponse, UpsertRoleRequest};
use crate::app::{errors, services::AppServices};
use crate::context::SessionContext;

async fn require(
    services: &AppServices,
    session: &SessionContext,
    action: &str,
) -> Result<Decision, axum::response::Response> {
    services
        .guard
        .assert_permission(session.claims(), "authz", "roles", Some(action))
        .await
        .map_err(errors::guard_error_to_response)
}

fn parse_role_id(raw: &str) -> Result<RoleId, axum::response::Response> {
    RoleId::from_str(raw).map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_role_id", e.to_string()))
}

/// GET /authz/roles
pub async fn list_roles(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<SessionContext>,
) -> axum::response::Response {
    let decision = match require(&services, &session, "view").await {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    match services.roles.list(decision.tenant_id) {
        Ok(roles) => (StatusCode::OK, Json(serde_json::json!({ "roles": roles }))).into_response(),
        Err(e) => errors::role_store_error_to_response(e),
    }
}

/// PUT /authz/roles/:id - create or replace a role in the caller's tenant
pub async fn upsert_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<SessionContext>,
    Path(id): Path<String>,
    Json(req): Json<UpsertRoleRequest>,
) -> axum::response::Response {
    let decision = match require(&services, &session, "manage").await {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    let id = match parse_role_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    // System roles are seeded, never created over HTTP; the store keeps the
    // flag on replacement.
    let role = Role {
        id,
        tenant_id: decision.tenant_id,
        name: req.name,
        capabilities: req.capabilities,
        system: false,
    };
    match services.admin.upsert_role(role.clone()).await {
        Ok(previous) => {
            let (status, system) = match previous {
                None => (StatusCode::CREATED, false),
                Some(prev) => (StatusCode::OK, prev.system),
            };
            (status, Json(Role { system, ..role })).into_response()
        }
        Err(e) => errors::admin_error_to_response(e),
    }
}

/// DELETE /authz/roles/:id
pub async fn delete_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<SessionContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let decision = match require(&services, &session, "manage").await {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    let id = match parse_role_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.admin.delete_role(decision.tenant_id, id).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::admin_error_to_response(e),
    }
}

/// POST /authz/assignments - give a principal a role
pub async fn assign_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<SessionContext>,
    Json(req): Json<AssignmentRequest>,
) -> axum::response::Response {
    let decision = match require(&services, &session, "manage").await {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    match services
        .admin
        .assign_role(decision.tenant_id, req.principal_id, req.role_id)
        .await
    {
        Ok(changed) => Json(AssignmentResponse {
            principal_id: req.principal_id,
            role_id: req.role_id,
            changed,
        })
        .into_response(),
        Err(e) => errors::admin_error_to_response(e),
    }
}

/// DELETE /authz/assignments - take a role away from a principal
pub async fn revoke_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<SessionContext>,
    Json(req): Json<AssignmentRequest>,
) -> axum::response::Response {
    let decision = match require(&services, &session, "manage").await {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    match services
        .admin
        .revoke_role(decision.tenant_id, req.principal_id, req.role_id)
        .await
    {
        Ok(changed) => Json(AssignmentResponse {
            principal_id: req.principal_id,
            role_id: req.role_id,
            changed,
        })
        .into_response(),
        Err(e) => errors::admin_error_to_response(e),
    }
}
