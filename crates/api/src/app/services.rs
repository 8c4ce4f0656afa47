use std::sync::Arc;

use anyhow::Context;

use orgguard_auth::{Guard, Hs256SessionResolver, SessionClaimsResolver};
use orgguard_infra::{
    AccessAdministration, AuthzConfig, FanoutAuditSink, InMemoryAuditLog, InMemoryPolicyPersistence,
    InMemoryRoleStore, PolicyEnforcer, PolicyPersistence, PostgresPolicyPersistence, RoleStore,
    TracingAuditSink,
};

pub struct AppServices {
    pub config: AuthzConfig,
    pub guard: Arc<Guard>,
    pub admin: Arc<AccessAdministration>,
    pub roles: Arc<dyn RoleStore>,
    pub policies: Arc<PolicyEnforcer>,
    pub audit_log: Arc<InMemoryAuditLog>,
    pub sessions: Arc<dyn SessionClaimsResolver>,
}

pub async fn build_services(config: AuthzConfig) -> anyhow::Result<AppServices> {
    let secret = config
        .jwt_secret
        .clone()
        .context("ORGGUARD_JWT_SECRET must be set")?;
    let sessions: Arc<dyn SessionClaimsResolver> = Arc::new(Hs256SessionResolver::new(secret.as_bytes()));

    let persistence: Arc<dyn PolicyPersistence> = match &config.policy_store_url {
        Some(url) => Arc::new(
            PostgresPolicyPersistence::connect(url)
                .await
                .context("failed to connect to the policy store")?,
        ),
        None => {
            tracing::warn!("ORGGUARD_POLICY_STORE_URL not set; policies are kept in memory only");
            Arc::new(InMemoryPolicyPersistence::new())
        }
    };
    let policies = Arc::new(PolicyEnforcer::with_timeout(persistence, config.policy_timeout));

    let role_store = Arc::new(InMemoryRoleStore::new());
    let roles: Arc<dyn RoleStore> = role_store.clone();
    let admin = Arc::new(AccessAdministration::new(roles.clone(), policies.clone()).with_mode(config.mode));

    let audit_log = Arc::new(InMemoryAuditLog::with_capacity(config.audit_capacity));
    let audit = Arc::new(FanoutAuditSink::new(vec![
        Box::new(TracingAuditSink),
        Box::new(audit_log.clone()),
    ]));

    let guard = Guard::new(config.guard_config(), role_store, audit).with_policy(policies.clone());

    tracing::info!(
        environment = ?config.environment,
        mode = ?config.mode,
        cross_check = ?config.cross_check,
        legacy_bypass = config.legacy_bypass,
        audit_capacity = audit_log.capacity(),
        "authorization services ready"
    );

    Ok(AppServices {
        config,
        guard: Arc::new(guard),
        admin,
        roles,
        policies,
        audit_log,
        sessions,
    })
}
