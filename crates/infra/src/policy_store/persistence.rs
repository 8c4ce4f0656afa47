use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use orgguard_auth::{PolicyDomain, PolicyStoreError, PolicyTuple, RoleLink};

/// One persisted row of the tuple policy set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "ptype")]
pub enum PolicyRecord {
    Policy(PolicyTuple),
    Link(RoleLink),
}

impl PolicyRecord {
    pub fn domain(&self) -> PolicyDomain {
        match self {
            PolicyRecord::Policy(p) => p.domain,
            PolicyRecord::Link(l) => l.domain,
        }
    }
}

/// Durable backing of the policy enforcer.
///
/// The enforcer loads everything once and writes back one domain at a time;
/// `save_domain` replaces every record of `domain` with `records`.
#[async_trait::async_trait]
pub trait PolicyPersistence: Send + Sync {
    async fn load_all(&self) -> Result<Vec<PolicyRecord>, PolicyStoreError>;

    async fn save_domain(
        &self,
        domain: PolicyDomain,
        records: &[PolicyRecord],
    ) -> Result<(), PolicyStoreError>;
}

/// In-memory persistence for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryPolicyPersistence {
    domains: RwLock<HashMap<PolicyDomain, Vec<PolicyRecord>>>,
    loads: AtomicUsize,
}

impl InMemoryPolicyPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with pre-existing records (as if loaded from a database).
    pub fn with_records(records: impl IntoIterator<Item = PolicyRecord>) -> Self {
        let mut domains: HashMap<PolicyDomain, Vec<PolicyRecord>> = HashMap::new();
        for record in records {
            domains.entry(record.domain()).or_default().push(record);
        }
        Self {
            domains: RwLock::new(domains),
            loads: AtomicUsize::new(0),
        }
    }

    /// Number of `load_all` calls served so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Records currently persisted for `domain`.
    pub fn stored(&self, domain: PolicyDomain) -> Vec<PolicyRecord> {
        self.domains
            .read()
            .map(|d| d.get(&domain).cloned().unwrap_or_default())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl PolicyPersistence for InMemoryPolicyPersistence {
    async fn load_all(&self) -> Result<Vec<PolicyRecord>, PolicyStoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let domains = self
            .domains
            .read()
            .map_err(|_| PolicyStoreError::Unavailable("lock poisoned".to_string()))?;
        Ok(domains.values().flatten().cloned().collect())
    }

    async fn save_domain(
        &self,
        domain: PolicyDomain,
        records: &[PolicyRecord],
    ) -> Result<(), PolicyStoreError> {
        if let Some(foreign) = records.iter().find(|r| r.domain() != domain) {
            return Err(PolicyStoreError::InvalidRecord(format!(
                "record for domain {} saved under {}",
                foreign.domain(),
                domain
            )));
        }
        let mut domains = self
            .domains
            .write()
            .map_err(|_| PolicyStoreError::Unavailable("lock poisoned".to_string()))?;
        if records.is_empty() {
            domains.remove(&domain);
        } else {
            domains.insert(domain, records.to_vec());
        }
        Ok(())
    }
}
