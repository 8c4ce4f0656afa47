use axum::{
    Router,
    routing::{get, post, put},
};

pub mod authz;
pub mod roles;
pub mod system;

/// Router for every session-scoped endpoint.
pub fn router() -> Router {
    Router::new()
        .route("/authz/me", get(system::me))
        .route("/authz/check", post(authz::check))
        .route("/authz/explain", post(authz::explain))
        .route("/authz/policy/check", post(authz::policy_check))
        .route("/authz/audit", get(authz::audit))
        .route("/authz/roles", get(roles::list_roles))
        .route("/authz/roles/:id", put(roles::upsert_role).delete(roles::delete_role))
        .route(
            "/authz/assignments",
            post(roles::assign_role).delete(roles::revoke_role),
        )
}
