//! Guard / assertion layer: the single entry point for authorization decisions.
//!
//! Session claims -> role synthesis -> resolution -> (optional) tuple policy
//! cross-check -> audit -> decision. Every failure path denies.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use orgguard_core::{PrincipalId, RoleId, TenantId};

use crate::audit::{AllowPath, AuditEntry, AuditOutcome, AuditSink};
use crate::policy::{MODULE_WIDE_ACTION, PolicyCheck};
use crate::roles::ADMINISTRATOR_ROLE;
use crate::{
    EffectiveCapabilityMap, KeyError, PermissionKey, ResolutionMode, Role, SessionClaims,
    resolve_with, synthesize_for_tenant,
};

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

/// Whether the tuple policy store must agree with the capability map.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossCheck {
    #[default]
    Off,
    Require,
}

/// Literal-comparison bypass kept for parity with legacy deployments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyBypass {
    /// Sessions with exactly this email skip all checks.
    pub admin_email: Option<String>,
    /// Sessions whose `role_name` equals this string skip all checks.
    pub role_name: String,
}

impl Default for LegacyBypass {
    fn default() -> Self {
        Self {
            admin_email: None,
            role_name: ADMINISTRATOR_ROLE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BypassPolicy {
    /// Allow everything for claims carrying `is_super_admin`.
    pub honor_super_admin_flag: bool,
    /// Off unless explicitly configured.
    pub legacy_literal_bypass: Option<LegacyBypass>,
}

impl Default for BypassPolicy {
    fn default() -> Self {
        Self {
            honor_super_admin_flag: true,
            legacy_literal_bypass: None,
        }
    }
}

impl BypassPolicy {
    fn matches(&self, claims: &SessionClaims) -> Option<AllowPath> {
        if self.honor_super_admin_flag && claims.is_super_admin {
            return Some(AllowPath::SuperAdmin);
        }
        let legacy = self.legacy_literal_bypass.as_ref()?;
        let email_match = legacy
            .admin_email
            .as_deref()
            .is_some_and(|email| !email.is_empty() && email == claims.email);
        let role_match = claims.role_name.as_deref() == Some(legacy.role_name.as_str());
        (email_match || role_match).then_some(AllowPath::LegacyBypass)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardConfig {
    pub mode: ResolutionMode,
    pub bypass: BypassPolicy,
    pub cross_check: CrossCheck,
    pub environment: Environment,
}

/// Why a request was denied.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialCause {
    MissingCapability,
    PolicyDenied,
    PolicyStoreUnavailable,
    RoleStoreUnavailable,
    InvalidKey,
    AuditUnavailable,
}

impl DenialCause {
    /// Denials caused by a degraded subsystem rather than missing access.
    pub fn is_degraded(self) -> bool {
        matches!(
            self,
            DenialCause::PolicyStoreUnavailable
                | DenialCause::RoleStoreUnavailable
                | DenialCause::AuditUnavailable
        )
    }
}

impl core::fmt::Display for DenialCause {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            DenialCause::MissingCapability => "missing capability",
            DenialCause::PolicyDenied => "denied by policy store",
            DenialCause::PolicyStoreUnavailable => "policy store unavailable",
            DenialCause::RoleStoreUnavailable => "role store unavailable",
            DenialCause::InvalidKey => "invalid permission key",
            DenialCause::AuditUnavailable => "audit sink unavailable",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GuardError {
    /// No valid session; callers redirect to login.
    #[error("unauthenticated")]
    Unauthenticated,

    /// Valid session, request denied; callers show an access-denied state.
    #[error("forbidden: '{key}' ({cause})")]
    Forbidden { key: String, cause: DenialCause },

    /// Malformed key from the calling code. Only surfaced outside production.
    #[error("invalid permission key: {0}")]
    InvalidKey(#[from] KeyError),
}

impl GuardError {
    pub fn cause(&self) -> Option<DenialCause> {
        match self {
            GuardError::Forbidden { cause, .. } => Some(*cause),
            GuardError::InvalidKey(_) => Some(DenialCause::InvalidKey),
            GuardError::Unauthenticated => None,
        }
    }
}

/// A successful authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub principal_id: PrincipalId,
    pub tenant_id: TenantId,
    pub key: PermissionKey,
    pub via: AllowPath,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoleSourceError {
    #[error("role store unavailable: {0}")]
    Unavailable(String),
}

/// Read access to tenant-scoped roles.
pub trait RoleSource: Send + Sync {
    /// Roles of `tenant_id` among `role_ids`. Unknown ids are skipped.
    fn roles_for(&self, tenant_id: TenantId, role_ids: &[RoleId]) -> Result<Vec<Role>, RoleSourceError>;
}

impl<S> RoleSource for Arc<S>
where
    S: RoleSource + ?Sized,
{
    fn roles_for(&self, tenant_id: TenantId, role_ids: &[RoleId]) -> Result<Vec<Role>, RoleSourceError> {
        (**self).roles_for(tenant_id, role_ids)
    }
}

/// Authorization guard. Construct once and share (`Arc<Guard>`).
pub struct Guard {
    config: GuardConfig,
    roles: Arc<dyn RoleSource>,
    audit: Arc<dyn AuditSink>,
    policy: Option<Arc<dyn PolicyCheck>>,
}

impl Guard {
    pub fn new(config: GuardConfig, roles: Arc<dyn RoleSource>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            config,
            roles,
            audit,
            policy: None,
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn PolicyCheck>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Assert that the session may perform `module:submodule_or_action[:action]`.
    pub async fn assert_permission(
        &self,
        claims: Option<&SessionClaims>,
        module: &str,
        submodule_or_action: &str,
        action: Option<&str>,
    ) -> Result<Decision, GuardError> {
        let Some(claims) = claims else {
            tracing::debug!("authorization without session");
            return Err(GuardError::Unauthenticated);
        };
        let raw = match action {
            Some(action) => format!("{module}:{submodule_or_action}:{action}"),
            None => format!("{module}:{submodule_or_action}"),
        };
        self.assert_for(claims, &raw).await
    }

    /// Assert a fully-qualified key string (`"sales:leads:view"`).
    pub async fn assert_key(
        &self,
        claims: Option<&SessionClaims>,
        key: &str,
    ) -> Result<Decision, GuardError> {
        let Some(claims) = claims else {
            tracing::debug!("authorization without session");
            return Err(GuardError::Unauthenticated);
        };
        self.assert_for(claims, key).await
    }

    /// The effective capability map for the session's tenant and roles.
    pub fn effective_capabilities(
        &self,
        claims: &SessionClaims,
    ) -> Result<EffectiveCapabilityMap, RoleSourceError> {
        let roles = self.roles.roles_for(claims.org_id, &claims.role_ids)?;
        Ok(synthesize_for_tenant(claims.org_id, &roles))
    }

    async fn assert_for(&self, claims: &SessionClaims, raw: &str) -> Result<Decision, GuardError> {
        let key = match PermissionKey::parse(raw) {
            Ok(key) => key,
            Err(e) => {
                tracing::error!(
                    principal_id = %claims.user_id,
                    tenant_id = %claims.org_id,
                    key = raw,
                    error = %e,
                    "malformed permission key"
                );
                let denied = self.deny(claims, raw, DenialCause::InvalidKey);
                return match self.config.environment {
                    Environment::Development => Err(GuardError::InvalidKey(e)),
                    Environment::Production => Err(denied),
                };
            }
        };

        if let Some(via) = self.config.bypass.matches(claims) {
            tracing::info!(
                principal_id = %claims.user_id,
                tenant_id = %claims.org_id,
                key = key.as_str(),
                ?via,
                "authorization bypass"
            );
            return self.allow(claims, key, via);
        }

        let effective = match self.effective_capabilities(claims) {
            Ok(map) => map,
            Err(e) => {
                tracing::error!(
                    principal_id = %claims.user_id,
                    tenant_id = %claims.org_id,
                    error = %e,
                    "role store degraded; denying"
                );
                return Err(self.deny(claims, key.as_str(), DenialCause::RoleStoreUnavailable));
            }
        };

        let resolution = resolve_with(&effective, &key, self.config.mode);
        let Some(strategy) = resolution.strategy else {
            tracing::info!(
                principal_id = %claims.user_id,
                tenant_id = %claims.org_id,
                key = key.as_str(),
                "permission denied"
            );
            return Err(self.deny(claims, key.as_str(), DenialCause::MissingCapability));
        };

        if self.config.cross_check == CrossCheck::Require {
            if let Err(cause) = self.cross_check(claims, &key).await {
                return Err(self.deny(claims, key.as_str(), cause));
            }
        }

        tracing::debug!(
            principal_id = %claims.user_id,
            tenant_id = %claims.org_id,
            key = key.as_str(),
            %strategy,
            "permission granted"
        );
        self.allow(claims, key, AllowPath::Capability(strategy))
    }

    async fn cross_check(&self, claims: &SessionClaims, key: &PermissionKey) -> Result<(), DenialCause> {
        let Some(policy) = &self.policy else {
            tracing::error!("policy cross-check required but no policy store is configured");
            return Err(DenialCause::PolicyStoreUnavailable);
        };
        // A bare module key can only be granted module-wide.
        let action = key.action().unwrap_or(MODULE_WIDE_ACTION);

        let subject = claims.user_id.to_string();
        match policy.check(&subject, claims.org_id, key.object(), action).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                tracing::info!(
                    principal_id = %claims.user_id,
                    tenant_id = %claims.org_id,
                    key = key.as_str(),
                    "policy store denied"
                );
                Err(DenialCause::PolicyDenied)
            }
            Err(e) => {
                tracing::error!(
                    principal_id = %claims.user_id,
                    tenant_id = %claims.org_id,
                    key = key.as_str(),
                    error = %e,
                    "policy store degraded; denying"
                );
                Err(DenialCause::PolicyStoreUnavailable)
            }
        }
    }

    fn allow(
        &self,
        claims: &SessionClaims,
        key: PermissionKey,
        via: AllowPath,
    ) -> Result<Decision, GuardError> {
        let entry = AuditEntry {
            principal_id: claims.user_id,
            tenant_id: claims.org_id,
            key: key.as_str().to_string(),
            outcome: AuditOutcome::Allowed { via },
            at: Utc::now(),
        };
        if let Err(e) = self.audit.record(entry) {
            tracing::error!(
                principal_id = %claims.user_id,
                tenant_id = %claims.org_id,
                key = key.as_str(),
                error = %e,
                "audit write failed; denying"
            );
            return Err(GuardError::Forbidden {
                key: key.as_str().to_string(),
                cause: DenialCause::AuditUnavailable,
            });
        }

        Ok(Decision {
            principal_id: claims.user_id,
            tenant_id: claims.org_id,
            key,
            via,
        })
    }

    fn deny(&self, claims: &SessionClaims, key: &str, cause: DenialCause) -> GuardError {
        let entry = AuditEntry {
            principal_id: claims.user_id,
            tenant_id: claims.org_id,
            key: key.to_string(),
            outcome: AuditOutcome::Denied { cause },
            at: Utc::now(),
        };
        if let Err(e) = self.audit.record(entry) {
            tracing::error!(key, error = %e, "audit write failed for denial");
        }
        GuardError::Forbidden {
            key: key.to_string(),
            cause,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    use super::*;
    use crate::audit::AuditError;
    use crate::policy::PolicyStoreError;
    use crate::CapabilityMap;

    #[derive(Default)]
    struct FakeRoles {
        roles: Vec<Role>,
        fail: bool,
    }

    impl RoleSource for FakeRoles {
        fn roles_for(&self, tenant_id: TenantId, role_ids: &[RoleId]) -> Result<Vec<Role>, RoleSourceError> {
            if self.fail {
                return Err(RoleSourceError::Unavailable("db down".to_string()));
            }
            Ok(self
                .roles
                .iter()
                .filter(|r| r.tenant_id == tenant_id && role_ids.contains(&r.id))
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    struct FakeAudit {
        entries: Mutex<Vec<AuditEntry>>,
        fail: bool,
    }

    impl AuditSink for FakeAudit {
        fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
            if self.fail {
                return Err(AuditError::Unavailable("disk full".to_string()));
            }
            self.entries.lock().unwrap().push(entry);
            Ok(())
        }
    }

    enum FakePolicy {
        Answer(bool),
        Broken,
        Hangs,
    }

    #[async_trait::async_trait]
    impl PolicyCheck for FakePolicy {
        async fn check(&self, _: &str, _: TenantId, _: &str, _: &str) -> Result<bool, PolicyStoreError> {
            match self {
                FakePolicy::Answer(b) => Ok(*b),
                FakePolicy::Broken => Err(PolicyStoreError::Unavailable("refused".to_string())),
                FakePolicy::Hangs => {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Err(PolicyStoreError::Timeout {
                        operation: "check",
                        timeout_ms: 10,
                    })
                }
            }
        }
    }

    fn claims(tenant_id: TenantId, role_ids: Vec<RoleId>) -> SessionClaims {
        let now = Utc::now();
        SessionClaims {
            user_id: PrincipalId::new(),
            email: "clerk@example.com".to_string(),
            org_id: tenant_id,
            role_ids,
            role_name: None,
            is_super_admin: false,
            issued_at: now,
            expires_at: now + ChronoDuration::minutes(5),
        }
    }

    fn guard(config: GuardConfig, roles: FakeRoles) -> (Guard, Arc<FakeAudit>) {
        let audit = Arc::new(FakeAudit::default());
        let guard = Guard::new(config, Arc::new(roles), audit.clone());
        (guard, audit)
    }

    fn sales_viewer(tenant_id: TenantId) -> Role {
        Role::new(
            tenant_id,
            "Sales Viewer",
            CapabilityMap::from_json(json!({ "sales": { "sales:leads:view": true } })).unwrap(),
        )
    }

    #[tokio::test]
    async fn missing_claims_is_unauthenticated() {
        let (guard, audit) = guard(GuardConfig::default(), FakeRoles::default());
        let err = guard.assert_permission(None, "sales", "leads", Some("view")).await.unwrap_err();
        assert_eq!(err, GuardError::Unauthenticated);
        assert!(audit.entries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn allows_and_audits_granted_key() {
        let t = TenantId::new();
        let role = sales_viewer(t);
        let c = claims(t, vec![role.id]);
        let (guard, audit) = guard(GuardConfig::default(), FakeRoles { roles: vec![role], fail: false });

        let decision = guard
            .assert_permission(Some(&c), "sales", "leads", Some("view"))
            .await
            .unwrap();
        assert_eq!(decision.key.as_str(), "sales:leads:view");
        assert_eq!(decision.via, AllowPath::Capability(crate::Strategy::Exact));

        let entries = audit.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].principal_id, c.user_id);
        assert_eq!(entries[0].tenant_id, t);
        assert_eq!(entries[0].key, "sales:leads:view");
        assert!(entries[0].outcome.is_allowed());
    }

    #[tokio::test]
    async fn scenario_c_no_roles_denies_except_bypass() {
        let t = TenantId::new();
        let config = GuardConfig {
            bypass: BypassPolicy {
                honor_super_admin_flag: true,
                legacy_literal_bypass: Some(LegacyBypass {
                    admin_email: Some("owner@example.com".to_string()),
                    ..LegacyBypass::default()
                }),
            },
            ..GuardConfig::default()
        };
        let (guard, audit) = guard(config, FakeRoles::default());

        let plain = claims(t, vec![]);
        for key in ["sales:leads:view", "store:manage", "hrms:payroll:approve"] {
            let err = guard.assert_key(Some(&plain), key).await.unwrap_err();
            assert_eq!(err.cause(), Some(DenialCause::MissingCapability));
        }

        let mut by_role_name = claims(t, vec![]);
        by_role_name.role_name = Some("Administrator".to_string());
        let d = guard.assert_key(Some(&by_role_name), "hrms:payroll:approve").await.unwrap();
        assert_eq!(d.via, AllowPath::LegacyBypass);

        let mut by_email = claims(t, vec![]);
        by_email.email = "owner@example.com".to_string();
        assert!(guard.assert_key(Some(&by_email), "store:manage").await.is_ok());

        let mut wrong_case = claims(t, vec![]);
        wrong_case.role_name = Some("administrator".to_string());
        assert!(guard.assert_key(Some(&wrong_case), "store:manage").await.is_err());

        let entries = audit.entries.lock().unwrap();
        assert_eq!(entries.len(), 6);
        assert_eq!(entries.iter().filter(|e| e.outcome.is_allowed()).count(), 2);
    }

    #[tokio::test]
    async fn legacy_bypass_is_off_by_default() {
        let t = TenantId::new();
        let (guard, _) = guard(GuardConfig::default(), FakeRoles::default());
        let mut c = claims(t, vec![]);
        c.role_name = Some(ADMINISTRATOR_ROLE.to_string());
        assert!(guard.assert_key(Some(&c), "store:manage").await.is_err());

        c.is_super_admin = true;
        let d = guard.assert_key(Some(&c), "store:manage").await.unwrap();
        assert_eq!(d.via, AllowPath::SuperAdmin);
    }

    #[tokio::test]
    async fn roles_from_another_tenant_grant_nothing() {
        let home = TenantId::new();
        let other = TenantId::new();
        let foreign = Role::new(other, "Owner", CapabilityMap::new().with_module("sales", true));
        let c = claims(home, vec![foreign.id]);
        let (guard, _) = guard(GuardConfig::default(), FakeRoles { roles: vec![foreign], fail: false });
        let err = guard.assert_key(Some(&c), "sales:leads:view").await.unwrap_err();
        assert_eq!(err.cause(), Some(DenialCause::MissingCapability));
    }

    #[tokio::test]
    async fn strict_mode_disables_fallbacks() {
        let t = TenantId::new();
        let role = sales_viewer(t);
        let c = claims(t, vec![role.id]);
        let roles = FakeRoles { roles: vec![role], fail: false };
        let config = GuardConfig {
            mode: ResolutionMode::Strict,
            ..GuardConfig::default()
        };
        let (guard, _) = guard(config, roles);
        assert!(guard.assert_key(Some(&c), "sales:leads:edit").await.is_err());
        assert!(guard.assert_key(Some(&c), "sales:leads:view").await.is_ok());
    }

    #[tokio::test]
    async fn invalid_key_is_loud_in_development_and_closed_in_production() {
        let t = TenantId::new();
        let c = claims(t, vec![]);

        let (dev, audit) = guard(GuardConfig::default(), FakeRoles::default());
        let err = dev.assert_key(Some(&c), "a:b:c:d").await.unwrap_err();
        assert!(matches!(err, GuardError::InvalidKey(KeyError::TooManySegments(_))));
        assert!(!audit.entries.lock().unwrap()[0].outcome.is_allowed());

        let config = GuardConfig {
            environment: Environment::Production,
            bypass: BypassPolicy::default(),
            ..GuardConfig::default()
        };
        let (prod, _) = guard(config, FakeRoles::default());
        let mut admin = c.clone();
        admin.is_super_admin = true;
        let err = prod.assert_permission(Some(&admin), "sales", "", None).await.unwrap_err();
        assert_eq!(err.cause(), Some(DenialCause::InvalidKey));
        assert!(matches!(err, GuardError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn role_store_failure_denies() {
        let t = TenantId::new();
        let c = claims(t, vec![RoleId::new()]);
        let (guard, _) = guard(GuardConfig::default(), FakeRoles { roles: vec![], fail: true });
        let err = guard.assert_key(Some(&c), "sales:leads:view").await.unwrap_err();
        assert_eq!(err.cause(), Some(DenialCause::RoleStoreUnavailable));
    }

    #[tokio::test]
    async fn audit_failure_turns_allow_into_deny() {
        let t = TenantId::new();
        let mut c = claims(t, vec![]);
        c.is_super_admin = true;
        let audit = Arc::new(FakeAudit {
            entries: Mutex::new(Vec::new()),
            fail: true,
        });
        let guard = Guard::new(GuardConfig::default(), Arc::new(FakeRoles::default()), audit);
        let err = guard.assert_key(Some(&c), "store:manage").await.unwrap_err();
        assert_eq!(err.cause(), Some(DenialCause::AuditUnavailable));
    }

    #[tokio::test]
    async fn cross_check_requires_policy_agreement() {
        let t = TenantId::new();
        let role = sales_viewer(t);
        let c = claims(t, vec![role.id]);
        let config = GuardConfig {
            cross_check: CrossCheck::Require,
            ..GuardConfig::default()
        };

        let cases = [
            (Some(FakePolicy::Answer(true)), None),
            (Some(FakePolicy::Answer(false)), Some(DenialCause::PolicyDenied)),
            (Some(FakePolicy::Broken), Some(DenialCause::PolicyStoreUnavailable)),
            (Some(FakePolicy::Hangs), Some(DenialCause::PolicyStoreUnavailable)),
            (None, Some(DenialCause::PolicyStoreUnavailable)),
        ];

        for (policy, expected) in cases {
            let roles = FakeRoles { roles: vec![role.clone()], fail: false };
            let (mut guard, _) = guard(config.clone(), roles);
            if let Some(policy) = policy {
                guard = guard.with_policy(Arc::new(policy));
            }
            let result = guard.assert_key(Some(&c), "sales:leads:view").await;
            assert_eq!(result.err().and_then(|e| e.cause()), expected);
        }
    }
}
