//! Audit trail of authorization outcomes.
//!
//! Recording is part of the decision: an allow that cannot be audited is
//! turned into a denial by the guard.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use orgguard_core::{PrincipalId, TenantId};

use crate::guard::DenialCause;
use crate::Strategy;

/// How an allow was reached.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "strategy")]
pub enum AllowPath {
    SuperAdmin,
    LegacyBypass,
    Capability(Strategy),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum AuditOutcome {
    Allowed { via: AllowPath },
    Denied { cause: DenialCause },
}

impl AuditOutcome {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AuditOutcome::Allowed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub principal_id: PrincipalId,
    pub tenant_id: TenantId,
    /// The requested key exactly as the caller built it.
    pub key: String,
    #[serde(flatten)]
    pub outcome: AuditOutcome,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuditError {
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

/// Append-only destination for audit entries.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry) -> Result<(), AuditError>;
}

impl<S> AuditSink for std::sync::Arc<S>
where
    S: AuditSink + ?Sized,
{
    fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        (**self).record(entry)
    }
}
