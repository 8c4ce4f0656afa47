//! `orgguard-auth` — the authorization decision core.
//!
//! Pure where it can be: key grammar, capability maps, role synthesis and
//! resolution do no IO. The guard ties them to session claims, a role source,
//! an audit sink and (optionally) the tuple policy store.

pub mod audit;
pub mod capability;
pub mod claims;
pub mod explain;
pub mod guard;
pub mod key;
pub mod policy;
pub mod resolve;
pub mod roles;
pub mod synthesize;

pub use audit::{AllowPath, AuditEntry, AuditError, AuditOutcome, AuditSink};
pub use capability::{CapabilityMap, EffectiveCapabilityMap, ModuleGrant};
pub use claims::{
    ClaimsError, Hs256SessionResolver, SessionClaims, SessionClaimsResolver, validate_claims,
};
pub use explain::{ResolutionExplanation, explain};
pub use guard::{
    BypassPolicy, CrossCheck, Decision, DenialCause, Environment, Guard, GuardConfig, GuardError,
    LegacyBypass, RoleSource, RoleSourceError,
};
pub use key::{KeyError, PermissionKey};
pub use policy::{
    MODULE_WIDE_ACTION, PolicyCheck, PolicyDomain, PolicyStoreError, PolicyTuple, RoleLink,
};
pub use resolve::{Resolution, ResolutionMode, Strategy, resolve, resolve_with};
pub use roles::{ADMINISTRATOR_ROLE, Role};
pub use synthesize::{synthesize, synthesize_for_tenant};
