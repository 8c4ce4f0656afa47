//! Tuple policy store: `(subject, domain, object, action)` policies plus
//! `(user, role, domain)` role links, cached in memory and persisted per domain.

mod enforcer;
mod persistence;
mod postgres;

pub use enforcer::{
    CacheState, DEFAULT_COMPILED_CAPACITY, DEFAULT_TIMEOUT, DomainPolicies, POLICY_MODEL, PolicyEnforcer,
};
pub use persistence::{InMemoryPolicyPersistence, PolicyPersistence, PolicyRecord};
pub use postgres::{PolicyRow, PostgresPolicyPersistence};
