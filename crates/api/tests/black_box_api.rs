use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::json;

use std::sync::Arc;

use orgguard_api::app::{AppServices, router, services::build_services};
use orgguard_auth::{CapabilityMap, Environment, Role, SessionClaims};
use orgguard_core::{PrincipalId, RoleId, TenantId};
use orgguard_infra::AuthzConfig;

const JWT_SECRET: &str = "test-secret";

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        Self::spawn_with(AuthzConfig {
            jwt_secret: Some(JWT_SECRET.to_string()),
            ..AuthzConfig::default()
        })
        .await
    }

    async fn spawn_with(config: AuthzConfig) -> Self {
        // Same router as prod, bound to an ephemeral port.
        let app = orgguard_api::app::build_app(config)
            .await
            .expect("failed to build app");
        Self::serve(app).await
    }

    /// Serve already-wired services, for tests that seed state first.
    async fn spawn_services(services: Arc<AppServices>) -> Self {
        Self::serve(router(services)).await
    }

    async fn serve(app: axum::Router) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            client: reqwest::Client::new(),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(&self, token: Option<&str>, key: &str) -> reqwest::Response {
        let mut req = self.client.post(self.url("/authz/check")).json(&json!({ "key": key }));
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        req.send().await.unwrap()
    }

    async fn put_role(&self, token: &str, id: RoleId, body: serde_json::Value) -> reqwest::Response {
        self.client
            .put(self.url(&format!("/authz/roles/{id}")))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn session(tenant_id: TenantId, role_ids: Vec<RoleId>) -> SessionClaims {
    let now = Utc::now();
    SessionClaims {
        user_id: PrincipalId::new(),
        email: "user@example.com".to_string(),
        org_id: tenant_id,
        role_ids,
        role_name: None,
        is_super_admin: false,
        issued_at: now - ChronoDuration::seconds(5),
        expires_at: now + ChronoDuration::minutes(10),
    }
}

fn mint_jwt(secret: &str, claims: &SessionClaims) -> String {
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("failed to encode jwt")
}

fn super_admin(tenant_id: TenantId) -> String {
    let mut claims = session(tenant_id, vec![]);
    claims.is_super_admin = true;
    mint_jwt(JWT_SECRET, &claims)
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn().await;
    let res = srv.client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_or_forged_tokens_are_unauthenticated() {
    let srv = TestServer::spawn().await;

    let res = srv.check(None, "sales:leads:view").await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let forged = mint_jwt("someone-else", &session(TenantId::new(), vec![]));
    let res = srv.check(Some(&forged), "sales:leads:view").await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let mut expired = session(TenantId::new(), vec![]);
    expired.issued_at = Utc::now() - ChronoDuration::hours(2);
    expired.expires_at = Utc::now() - ChronoDuration::hours(1);
    let res = srv.check(Some(&mint_jwt(JWT_SECRET, &expired)), "sales:leads:view").await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn role_capabilities_drive_decisions() {
    let srv = TestServer::spawn().await;
    let tenant_id = TenantId::new();
    let admin = super_admin(tenant_id);

    let role_id = RoleId::new();
    let res = srv
        .put_role(
            &admin,
            role_id,
            json!({ "name": "Sales Rep", "capabilities": { "sales": { "leads:view": true } } }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::CREATED);

    let user = mint_jwt(JWT_SECRET, &session(tenant_id, vec![role_id]));

    let res = srv.check(Some(&user), "sales:leads:view").await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["key"], "sales:leads:view");
    assert_eq!(body["via"]["kind"], "capability");
    assert_eq!(body["via"]["strategy"], "nested_key");

    let res = srv.check(Some(&user), "hrms:payroll:view").await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "forbidden");
    assert_eq!(body["cause"], "missing_capability");

    // Both the allow and the deny were audited.
    let res = srv
        .client
        .get(srv.url("/authz/audit"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    let outcomes: Vec<&str> = body["entries"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|e| e["key"] != "authz:audit:view" && e["key"] != "authz:roles:manage")
        .map(|e| e["outcome"].as_str().unwrap())
        .collect();
    assert_eq!(outcomes, vec!["allowed", "denied"]);
}

#[tokio::test]
async fn roles_never_cross_tenants() {
    let srv = TestServer::spawn().await;
    let home = TenantId::new();
    let role_id = RoleId::new();
    srv.put_role(
        &super_admin(home),
        role_id,
        json!({ "name": "Store Manager", "capabilities": { "store": true } }),
    )
    .await;

    let insider = mint_jwt(JWT_SECRET, &session(home, vec![role_id]));
    assert_eq!(srv.check(Some(&insider), "store:manage").await.status(), StatusCode::OK);

    // Same role id presented under another organization grants nothing.
    let outsider = mint_jwt(JWT_SECRET, &session(TenantId::new(), vec![role_id]));
    assert_eq!(srv.check(Some(&outsider), "store:manage").await.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn malformed_keys_are_server_errors_in_development() {
    let srv = TestServer::spawn().await;
    let user = mint_jwt(JWT_SECRET, &session(TenantId::new(), vec![]));

    let res = srv.check(Some(&user), "sales::view").await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_permission_key");
}

#[tokio::test]
async fn malformed_keys_are_plain_denials_in_production() {
    let srv = TestServer::spawn_with(AuthzConfig {
        environment: Environment::Production,
        jwt_secret: Some(JWT_SECRET.to_string()),
        ..AuthzConfig::default()
    })
    .await;
    let user = mint_jwt(JWT_SECRET, &session(TenantId::new(), vec![]));

    let res = srv.check(Some(&user), "sales::view").await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["cause"], "invalid_key");
}

#[tokio::test]
async fn administration_requires_permission() {
    let srv = TestServer::spawn().await;
    let user = mint_jwt(JWT_SECRET, &session(TenantId::new(), vec![]));

    let res = srv
        .put_role(&user, RoleId::new(), json!({ "name": "Sneaky", "capabilities": { "authz": true } }))
        .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn assignments_project_into_policy_store() {
    let srv = TestServer::spawn().await;
    let tenant_id = TenantId::new();
    let admin = super_admin(tenant_id);

    let role_id = RoleId::new();
    srv.put_role(
        &admin,
        role_id,
        json!({ "name": "Payroll Clerk", "capabilities": { "hrms": { "hrms:payroll:view": true } } }),
    )
    .await;

    let principal_id = PrincipalId::new();
    let res = srv
        .client
        .post(srv.url("/authz/assignments"))
        .bearer_auth(&admin)
        .json(&json!({ "principal_id": principal_id, "role_id": role_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["changed"], true);

    let policy_check = |subject: String| {
        srv.client
            .post(srv.url("/authz/policy/check"))
            .bearer_auth(&admin)
            .json(&json!({ "subject": subject, "object": "hrms:payroll", "action": "view" }))
            .send()
    };

    let body: serde_json::Value = policy_check(principal_id.to_string()).await.unwrap().json().await.unwrap();
    assert_eq!(body["allowed"], true);

    let body: serde_json::Value = policy_check(PrincipalId::new().to_string())
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["allowed"], false);
}

#[tokio::test]
async fn system_roles_cannot_be_deleted() {
    let services = build_services(AuthzConfig {
        jwt_secret: Some(JWT_SECRET.to_string()),
        ..AuthzConfig::default()
    })
    .await
    .unwrap();
    let tenant_id = TenantId::new();
    let seeded = Role::new(tenant_id, "Administrator", CapabilityMap::new().with_module("authz", true)).system();
    let role_id = seeded.id;
    services.admin.upsert_role(seeded).await.unwrap();

    let srv = TestServer::spawn_services(Arc::new(services)).await;
    let admin = super_admin(tenant_id);

    // Replacing the role over HTTP cannot clear its system flag.
    let res = srv
        .put_role(
            &admin,
            role_id,
            json!({ "name": "Administrator", "capabilities": { "authz": true }, "system": false }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["system"], true);

    let res = srv
        .client
        .delete(srv.url(&format!("/authz/roles/{role_id}")))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = srv
        .client
        .delete(srv.url("/authz/roles/not-a-uuid"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn me_reports_effective_capabilities() {
    let srv = TestServer::spawn().await;
    let tenant_id = TenantId::new();
    let admin = super_admin(tenant_id);
    let (a, b) = (RoleId::new(), RoleId::new());
    srv.put_role(&admin, a, json!({ "name": "A", "capabilities": { "sales": { "leads:view": true } } }))
        .await;
    srv.put_role(&admin, b, json!({ "name": "B", "capabilities": { "sales": true } })).await;

    let user = mint_jwt(JWT_SECRET, &session(tenant_id, vec![a, b]));
    let res = srv.client.get(srv.url("/authz/me")).bearer_auth(&user).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["capabilities"]["sales"], true);
}
