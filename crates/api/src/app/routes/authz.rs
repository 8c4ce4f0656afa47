//! Authorization decision endpoints.

use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};

use orgguard_auth::{GuardError, PermissionKey, explain as explain_resolution};

use crate::app::dto::{CheckRequest, ExplainRequest, PolicyCheckRequest, PolicyCheckResponse};
use crate::app::{errors, services::AppServices};
use crate::context::SessionContext;

/// POST /authz/check - assert a permission for the caller
pub async fn check(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<SessionContext>,
    Json(req): Json<CheckRequest>,
) -> axum::response::Response {
    let result = match &req {
        CheckRequest::Key { key } => services.guard.assert_key(session.claims(), key).await,
        CheckRequest::Parts {
            module,
            submodule_or_action,
            action,
        } => {
            services
                .guard
                .assert_permission(session.claims(), module, submodule_or_action, action.as_deref())
                .await
        }
    };

    match result {
        Ok(decision) => (StatusCode::OK, Json(decision)).into_response(),
        Err(e) => errors::guard_error_to_response(e),
    }
}

/// POST /authz/explain - why the caller's own capability map grants or denies a key
pub async fn explain(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<SessionContext>,
    Json(req): Json<ExplainRequest>,
) -> axum::response::Response {
    let Some(claims) = session.claims() else {
        return errors::guard_error_to_response(GuardError::Unauthenticated);
    };
    let key = match PermissionKey::parse(&req.key) {
        Ok(key) => key,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_permission_key", e.to_string()),
    };
    let effective = match services.guard.effective_capabilities(claims) {
        Ok(map) => map,
        Err(e) => return errors::role_source_error_to_response(e),
    };

    let explanation = explain_resolution(&effective, &key, services.guard.config().mode);
    (StatusCode::OK, Json(explanation)).into_response()
}

/// POST /authz/policy/check - query the tuple policy store in the caller's tenant
pub async fn policy_check(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<SessionContext>,
    Json(req): Json<PolicyCheckRequest>,
) -> axum::response::Response {
    let claims = session.claims();
    let asking_for_self = match (claims, &req.subject) {
        (Some(c), Some(subject)) => *subject == c.user_id.to_string(),
        (_, None) => true,
        (None, Some(_)) => false,
    };
    // Other subjects' tuples are administrative data.
    if !asking_for_self {
        if let Err(e) = services
            .guard
            .assert_permission(claims, "authz", "policies", Some("view"))
            .await
        {
            return errors::guard_error_to_response(e);
        }
    }
    let Some(claims) = claims else {
        return errors::guard_error_to_response(GuardError::Unauthenticated);
    };

    let subject = req.subject.unwrap_or_else(|| claims.user_id.to_string());
    match services
        .policies
        .check(&subject, claims.org_id, &req.object, &req.action)
        .await
    {
        Ok(allowed) => Json(PolicyCheckResponse {
            subject,
            tenant_id: claims.org_id,
            object: req.object,
            action: req.action,
            allowed,
        })
        .into_response(),
        Err(e) => errors::policy_store_error_to_response(e),
    }
}

/// GET /authz/audit - audit entries of the caller's tenant
pub async fn audit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<SessionContext>,
) -> axum::response::Response {
    let decision = match services
        .guard
        .assert_permission(session.claims(), "authz", "audit", Some("view"))
        .await
    {
        Ok(decision) => decision,
        Err(e) => return errors::guard_error_to_response(e),
    };

    let entries = services.audit_log.list(decision.tenant_id);
    (StatusCode::OK, Json(serde_json::json!({ "entries": entries }))).into_response()
}
