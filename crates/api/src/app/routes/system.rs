use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};

use orgguard_auth::GuardError;

use crate::app::{dto::SessionSummary, errors, services::AppServices};
use crate::context::SessionContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// GET /authz/me - the caller's session and effective capability map
pub async fn me(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<SessionContext>,
) -> axum::response::Response {
    let Some(claims) = session.claims() else {
        return errors::guard_error_to_response(GuardError::Unauthenticated);
    };
    match services.guard.effective_capabilities(claims) {
        Ok(capabilities) => Json(SessionSummary {
            user_id: claims.user_id,
            org_id: claims.org_id,
            role_ids: claims.role_ids.clone(),
            is_super_admin: claims.is_super_admin,
            capabilities,
        })
        .into_response(),
        Err(e) => errors::role_source_error_to_response(e),
    }
}
