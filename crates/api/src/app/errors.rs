use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use orgguard_auth::{GuardError, PolicyStoreError, RoleSourceError};
use orgguard_core::DomainError;
use orgguard_infra::{AdminError, RoleStoreError};

pub fn guard_error_to_response(err: GuardError) -> axum::response::Response {
    match &err {
        GuardError::Unauthenticated => {
            json_error(StatusCode::UNAUTHORIZED, "unauthenticated", err.to_string())
        }
        GuardError::Forbidden { key, cause } => (
            StatusCode::FORBIDDEN,
            axum::Json(json!({
                "error": "forbidden",
                "message": err.to_string(),
                "key": key,
                "cause": cause,
            })),
        )
            .into_response(),
        // A malformed key is a bug in the calling code, not a user error.
        GuardError::InvalidKey(_) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "invalid_permission_key",
            err.to_string(),
        ),
    }
}

pub fn admin_error_to_response(err: AdminError) -> axum::response::Response {
    match err {
        AdminError::Roles(e) => role_store_error_to_response(e),
        AdminError::Policy(e) => policy_store_error_to_response(e),
    }
}

pub fn role_store_error_to_response(err: RoleStoreError) -> axum::response::Response {
    match &err {
        RoleStoreError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", err.to_string()),
        RoleStoreError::SystemRole(_) => json_error(StatusCode::CONFLICT, "system_role", err.to_string()),
        RoleStoreError::DuplicateName(_) => {
            json_error(StatusCode::CONFLICT, "duplicate_role_name", err.to_string())
        }
        RoleStoreError::Domain(DomainError::Validation(msg)) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", msg.clone())
        }
        RoleStoreError::Domain(DomainError::InvalidId(msg)) => {
            json_error(StatusCode::BAD_REQUEST, "invalid_id", msg.clone())
        }
        RoleStoreError::Unavailable(_) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "role_store_unavailable", err.to_string())
        }
    }
}

pub fn role_source_error_to_response(err: RoleSourceError) -> axum::response::Response {
    json_error(StatusCode::SERVICE_UNAVAILABLE, "role_store_unavailable", err.to_string())
}

pub fn policy_store_error_to_response(err: PolicyStoreError) -> axum::response::Response {
    if err.is_degraded() {
        tracing::error!(error = %err, "policy store degraded");
        json_error(StatusCode::SERVICE_UNAVAILABLE, "policy_store_unavailable", err.to_string())
    } else {
        json_error(StatusCode::BAD_REQUEST, "invalid_policy", err.to_string())
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
