//! Infrastructure layer: policy store, role store, audit sinks, administration
//! and configuration.

pub mod admin;
pub mod audit_log;
pub mod config;
pub mod policy_store;
pub mod role_store;

pub use admin::{AccessAdministration, AdminError, policy_tuples};
pub use audit_log::{
    AUDIT_TARGET, DEFAULT_AUDIT_CAPACITY, FanoutAuditSink, InMemoryAuditLog, TracingAuditSink,
};
pub use config::{AuthzConfig, ConfigError};
pub use policy_store::{
    CacheState, InMemoryPolicyPersistence, PolicyEnforcer, PolicyPersistence, PolicyRecord,
    PostgresPolicyPersistence,
};
pub use role_store::{InMemoryRoleStore, RoleStore, RoleStoreError};
