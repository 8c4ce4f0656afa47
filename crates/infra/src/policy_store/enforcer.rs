//! Tuple policy enforcer with a lazily loaded, per-domain snapshot cache.
//!
//! ## Cache model
//!
//! - The full policy set is loaded once per enforcer, on first use, behind a
//!   `OnceCell`. Concurrent first calls share one load; a failed load is
//!   retried by the next caller.
//! - Each domain is an immutable `Arc<DomainPolicies>` snapshot. Readers clone
//!   the `Arc` and never hold a lock while evaluating.
//! - Writers serialize per domain, build the next snapshot off to the side and
//!   swap it in, so no reader ever sees a partially applied write.
//! - Writes mark their domain dirty; `save()` persists dirty domains and the
//!   cache goes back to `Clean`.
//!
//! ## Evaluation
//!
//! Checks run on a casbin enforcer compiled per tenant from the tenant's
//! snapshot plus the universal one, every rule rewritten into the tenant's
//! domain. A compiled enforcer is reused until either snapshot's revision
//! moves. At most `DEFAULT_COMPILED_CAPACITY` tenants stay compiled; idle or
//! surplus ones are evicted and rebuilt on their next check. Role chains are followed by casbin's default role manager
//! (at most 10 levels).
//!
//! Objects and actions match exactly. A module-wide tuple
//! `(subject, domain, module, "*")` additionally grants every object whose
//! first segment is `module`.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use casbin::{CoreApi, DefaultModel, Enforcer, MemoryAdapter, MgmtApi};
use moka::future::Cache;
use tokio::sync::OnceCell;

use orgguard_auth::{
    MODULE_WIDE_ACTION, PolicyCheck, PolicyDomain, PolicyStoreError, PolicyTuple, RoleLink,
};
use orgguard_core::TenantId;

use super::persistence::{PolicyPersistence, PolicyRecord};

/// Tuple model: a subject (directly or through its roles in the domain) may
/// perform exactly `act` on exactly `obj`.
pub const POLICY_MODEL: &str = r#"
[request_definition]
r = sub, dom, obj, act

[policy_definition]
p = sub, dom, obj, act

[role_definition]
g = _, _, _

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = g(r.sub, p.sub, r.dom) && r.dom == p.dom && r.obj == p.obj && r.act == p.act
"#;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_COMPILED_CAPACITY: u64 = 1_024;
const COMPILED_IDLE: Duration = Duration::from_secs(600);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CacheState {
    Clean,
    Dirty,
}

/// Policies and role links of a single domain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainPolicies {
    policies: BTreeSet<PolicyTuple>,
    links: BTreeSet<RoleLink>,
    revision: u64,
}

impl DomainPolicies {
    pub fn policies(&self) -> impl Iterator<Item = &PolicyTuple> {
        self.policies.iter()
    }

    pub fn links(&self) -> impl Iterator<Item = &RoleLink> {
        self.links.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty() && self.links.is_empty()
    }

    pub fn add_policy(&mut self, tuple: PolicyTuple) -> bool {
        self.policies.insert(tuple)
    }

    pub fn remove_policy(&mut self, tuple: &PolicyTuple) -> bool {
        self.policies.remove(tuple)
    }

    /// Remove every policy whose subject is `subject`. Returns how many were removed.
    pub fn remove_subject_policies(&mut self, subject: &str) -> usize {
        let before = self.policies.len();
        self.policies.retain(|p| p.subject != subject);
        before - self.policies.len()
    }

    pub fn add_link(&mut self, link: RoleLink) -> bool {
        self.links.insert(link)
    }

    pub fn remove_link(&mut self, link: &RoleLink) -> bool {
        self.links.remove(link)
    }

    /// Drop every link pointing at `role`.
    pub fn remove_links_to(&mut self, role: &str) -> usize {
        let before = self.links.len();
        self.links.retain(|l| l.role != role);
        before - self.links.len()
    }

    /// Rename a role everywhere it appears (policy subjects and both link ends).
    pub fn rename_role(&mut self, from: &str, to: &str) {
        if from == to {
            return;
        }
        self.policies = std::mem::take(&mut self.policies)
            .into_iter()
            .map(|mut p| {
                if p.subject == from {
                    p.subject = to.to_string();
                }
                p
            })
            .collect();
        self.links = std::mem::take(&mut self.links)
            .into_iter()
            .map(|mut l| {
                if l.role == from {
                    l.role = to.to_string();
                }
                if l.user == from {
                    l.user = to.to_string();
                }
                l
            })
            .collect();
    }

    /// Drop every policy, keeping role links.
    pub fn clear_policies(&mut self) {
        self.policies.clear();
    }

    pub fn clear(&mut self) {
        self.policies.clear();
        self.links.clear();
    }

    fn records(&self) -> Vec<PolicyRecord> {
        self.policies
            .iter()
            .cloned()
            .map(PolicyRecord::Policy)
            .chain(self.links.iter().cloned().map(PolicyRecord::Link))
            .collect()
    }

    /// Every record must belong to `domain` and every tuple must be well formed.
    fn check_scope(&self, domain: PolicyDomain) -> Result<(), PolicyStoreError> {
        for policy in &self.policies {
            if policy.domain != domain {
                return Err(PolicyStoreError::InvalidRecord(format!(
                    "policy for domain {} written to domain {domain}",
                    policy.domain
                )));
            }
            policy.validate()?;
        }
        if let Some(link) = self.links.iter().find(|l| l.domain != domain) {
            return Err(PolicyStoreError::InvalidRecord(format!(
                "role link for domain {} written to domain {domain}",
                link.domain
            )));
        }
        Ok(())
    }

    fn same_content(&self, other: &DomainPolicies) -> bool {
        self.policies == other.policies && self.links == other.links
    }
}

#[derive(Debug, Default)]
struct PolicyCache {
    domains: RwLock<HashMap<PolicyDomain, Arc<DomainPolicies>>>,
    writers: Mutex<HashMap<PolicyDomain, Arc<Mutex<()>>>>,
    /// Dirty domain -> revision that still has to be persisted.
    dirty: Mutex<HashMap<PolicyDomain, u64>>,
}

fn poisoned<T>(_: T) -> PolicyStoreError {
    PolicyStoreError::Unavailable("policy cache lock poisoned".to_string())
}

impl PolicyCache {
    fn from_records(records: Vec<PolicyRecord>) -> Result<Self, PolicyStoreError> {
        let mut domains: HashMap<PolicyDomain, DomainPolicies> = HashMap::new();
        for record in records {
            let set = domains.entry(record.domain()).or_default();
            match record {
                PolicyRecord::Policy(p) => {
                    p.validate()?;
                    set.policies.insert(p);
                }
                PolicyRecord::Link(l) => {
                    set.links.insert(l);
                }
            }
        }
        Ok(Self {
            domains: RwLock::new(domains.into_iter().map(|(d, s)| (d, Arc::new(s))).collect()),
            ..Self::default()
        })
    }

    fn snapshot(&self, domain: PolicyDomain) -> Result<Arc<DomainPolicies>, PolicyStoreError> {
        let domains = self.domains.read().map_err(poisoned)?;
        Ok(domains.get(&domain).cloned().unwrap_or_default())
    }

    fn known_domains(&self) -> Result<Vec<PolicyDomain>, PolicyStoreError> {
        let domains = self.domains.read().map_err(poisoned)?;
        Ok(domains.keys().copied().collect())
    }

    fn writer(&self, domain: PolicyDomain) -> Result<Arc<Mutex<()>>, PolicyStoreError> {
        let mut writers = self.writers.lock().map_err(poisoned)?;
        Ok(writers.entry(domain).or_default().clone())
    }

    /// Apply `f` to a private copy of `domain` and publish it atomically.
    fn update<R>(
        &self,
        domain: PolicyDomain,
        f: impl FnOnce(&mut DomainPolicies) -> R,
    ) -> Result<R, PolicyStoreError> {
        let writer = self.writer(domain)?;
        let _serialized = writer.lock().map_err(poisoned)?;

        let current = self.snapshot(domain)?;
        let mut next = (*current).clone();
        let out = f(&mut next);
        if next.same_content(&current) {
            return Ok(out);
        }
        next.check_scope(domain)?;
        next.revision = current.revision + 1;
        let revision = next.revision;

        self.domains
            .write()
            .map_err(poisoned)?
            .insert(domain, Arc::new(next));
        self.dirty.lock().map_err(poisoned)?.insert(domain, revision);
        Ok(out)
    }

    fn dirty_domains(&self) -> Result<Vec<PolicyDomain>, PolicyStoreError> {
        Ok(self.dirty.lock().map_err(poisoned)?.keys().copied().collect())
    }

    fn mark_saved(&self, domain: PolicyDomain, revision: u64) -> Result<(), PolicyStoreError> {
        let mut dirty = self.dirty.lock().map_err(poisoned)?;
        // A write that landed during the save keeps the domain dirty.
        if dirty.get(&domain).is_some_and(|pending| *pending <= revision) {
            dirty.remove(&domain);
        }
        Ok(())
    }

    fn state(&self) -> Result<CacheState, PolicyStoreError> {
        let dirty = self.dirty.lock().map_err(poisoned)?;
        Ok(if dirty.is_empty() {
            CacheState::Clean
        } else {
            CacheState::Dirty
        })
    }
}

/// Tuple policy enforcer.
///
/// Construct one per process and inject it (`Arc<PolicyEnforcer>`) wherever
/// tuple checks or policy writes are needed.
pub struct PolicyEnforcer {
    persistence: Arc<dyn PolicyPersistence>,
    timeout: Duration,
    cache: OnceCell<PolicyCache>,
    compiled: Cache<TenantId, Arc<CompiledTenant>>,
}

struct CompiledTenant {
    tenant_revision: u64,
    universal_revision: u64,
    enforcer: Enforcer,
}

fn compiled_cache(capacity: u64) -> Cache<TenantId, Arc<CompiledTenant>> {
    Cache::builder()
        .max_capacity(capacity)
        .time_to_idle(COMPILED_IDLE)
        .build()
}

fn engine_error(e: casbin::Error) -> PolicyStoreError {
    PolicyStoreError::Unavailable(format!("policy engine: {e}"))
}

/// Build an in-memory casbin enforcer holding `sets`, all rewritten into `domain`.
async fn build_enforcer(domain: &str, sets: [&DomainPolicies; 2]) -> casbin::Result<Enforcer> {
    let model = DefaultModel::from_str(POLICY_MODEL).await?;
    let mut enforcer = Enforcer::new(model, MemoryAdapter::default()).await?;

    for policy in sets.iter().copied().flat_map(DomainPolicies::policies) {
        enforcer
            .add_policy(vec![
                policy.subject.clone(),
                domain.to_string(),
                policy.object.clone(),
                policy.action.clone(),
            ])
            .await?;
    }
    for link in sets.iter().copied().flat_map(DomainPolicies::links) {
        enforcer
            .add_grouping_policy(vec![link.user.clone(), link.role.clone(), domain.to_string()])
            .await?;
    }

    enforcer.build_role_links()?;
    Ok(enforcer)
}

impl PolicyEnforcer {
    pub fn new(persistence: Arc<dyn PolicyPersistence>) -> Self {
        Self::with_timeout(persistence, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(persistence: Arc<dyn PolicyPersistence>, timeout: Duration) -> Self {
        Self {
            persistence,
            timeout,
            cache: OnceCell::new(),
            compiled: compiled_cache(DEFAULT_COMPILED_CAPACITY),
        }
    }

    /// Keep at most `capacity` tenants' compiled enforcers.
    pub fn with_compiled_capacity(mut self, capacity: u64) -> Self {
        self.compiled = compiled_cache(capacity);
        self
    }

    pub fn is_loaded(&self) -> bool {
        self.cache.initialized()
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, PolicyStoreError>>,
    ) -> Result<T, PolicyStoreError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(PolicyStoreError::Timeout {
                operation,
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    async fn cache(&self) -> Result<&PolicyCache, PolicyStoreError> {
        self.cache
            .get_or_try_init(|| async {
                let records = self.bounded("load", self.persistence.load_all()).await?;
                tracing::info!(records = records.len(), "policy cache loaded");
                PolicyCache::from_records(records)
            })
            .await
    }

    /// Load the policy set now instead of on first use.
    pub async fn load(&self) -> Result<(), PolicyStoreError> {
        self.cache().await.map(|_| ())
    }

    pub async fn check(
        &self,
        subject: &str,
        tenant_id: TenantId,
        object: &str,
        action: &str,
    ) -> Result<bool, PolicyStoreError> {
        let compiled = self.compiled_for(tenant_id).await?;
        let domain = tenant_id.to_string();
        let enforce = |object: &str, action: &str| {
            compiled
                .enforcer
                .enforce((subject, domain.as_str(), object, action))
                .map_err(engine_error)
        };

        let mut allowed = enforce(object, action)?;
        if !allowed && action != MODULE_WIDE_ACTION {
            let module = object.split(':').next().unwrap_or(object);
            allowed = enforce(module, MODULE_WIDE_ACTION)?;
        }

        tracing::debug!(subject, tenant_id = %tenant_id, object, action, allowed, "policy check");
        Ok(allowed)
    }

    /// The compiled enforcer for `tenant_id`, rebuilt if either snapshot changed.
    async fn compiled_for(&self, tenant_id: TenantId) -> Result<Arc<CompiledTenant>, PolicyStoreError> {
        let cache = self.cache().await?;
        let tenant = cache.snapshot(PolicyDomain::Tenant(tenant_id))?;
        let universal = cache.snapshot(PolicyDomain::Universal)?;

        if let Some(compiled) = self.compiled.get(&tenant_id).await {
            if compiled.tenant_revision == tenant.revision
                && compiled.universal_revision == universal.revision
            {
                return Ok(compiled);
            }
        }

        let enforcer = build_enforcer(&tenant_id.to_string(), [tenant.as_ref(), universal.as_ref()])
            .await
            .map_err(engine_error)?;
        let compiled = Arc::new(CompiledTenant {
            tenant_revision: tenant.revision,
            universal_revision: universal.revision,
            enforcer,
        });
        self.compiled.insert(tenant_id, compiled.clone()).await;
        Ok(compiled)
    }

    /// Current snapshot of `domain`.
    pub async fn domain(&self, domain: PolicyDomain) -> Result<Arc<DomainPolicies>, PolicyStoreError> {
        self.cache().await?.snapshot(domain)
    }

    /// Apply several changes to one domain as a single atomic write.
    ///
    /// The write is rejected, and nothing is published, if any record ends up
    /// scoped to another domain or a tuple is malformed.
    pub async fn transact<R>(
        &self,
        domain: PolicyDomain,
        f: impl FnOnce(&mut DomainPolicies) -> R,
    ) -> Result<R, PolicyStoreError> {
        self.cache().await?.update(domain, f)
    }

    pub async fn add_policy(&self, tuple: PolicyTuple) -> Result<bool, PolicyStoreError> {
        tuple.validate()?;
        let domain = tuple.domain;
        self.transact(domain, |set| set.add_policy(tuple)).await
    }

    pub async fn remove_policy(&self, tuple: &PolicyTuple) -> Result<bool, PolicyStoreError> {
        self.transact(tuple.domain, |set| set.remove_policy(tuple)).await
    }

    pub async fn add_role_for_user(&self, link: RoleLink) -> Result<bool, PolicyStoreError> {
        if link.user.trim().is_empty() || link.role.trim().is_empty() {
            return Err(PolicyStoreError::InvalidRecord(
                "role link needs a user and a role".to_string(),
            ));
        }
        let domain = link.domain;
        self.transact(domain, |set| set.add_link(link)).await
    }

    pub async fn delete_role_for_user(&self, link: &RoleLink) -> Result<bool, PolicyStoreError> {
        self.transact(link.domain, |set| set.remove_link(link)).await
    }

    /// Remove everything in one domain.
    pub async fn clear_domain(&self, domain: PolicyDomain) -> Result<(), PolicyStoreError> {
        self.transact(domain, DomainPolicies::clear).await
    }

    /// Remove every policy and link in every domain.
    pub async fn clear_policy(&self) -> Result<(), PolicyStoreError> {
        let cache = self.cache().await?;
        for domain in cache.known_domains()? {
            cache.update(domain, DomainPolicies::clear)?;
        }
        Ok(())
    }

    /// Persist every dirty domain.
    ///
    /// On error the cache keeps its (complete) in-memory state and the failed
    /// domains stay dirty for the next `save`.
    pub async fn save(&self) -> Result<(), PolicyStoreError> {
        let cache = self.cache().await?;
        for domain in cache.dirty_domains()? {
            let snapshot = cache.snapshot(domain)?;
            let records = snapshot.records();
            self.bounded("save", self.persistence.save_domain(domain, &records))
                .await
                .inspect_err(|e| tracing::error!(%domain, error = %e, "policy save failed"))?;
            cache.mark_saved(domain, snapshot.revision)?;
            tracing::debug!(%domain, records = records.len(), "policy domain saved");
        }
        Ok(())
    }

    pub fn state(&self) -> CacheState {
        match self.cache.get() {
            Some(cache) => cache.state().unwrap_or(CacheState::Dirty),
            None => CacheState::Clean,
        }
    }
}

#[async_trait::async_trait]
impl PolicyCheck for PolicyEnforcer {
    async fn check(
        &self,
        subject: &str,
        tenant_id: TenantId,
        object: &str,
        action: &str,
    ) -> Result<bool, PolicyStoreError> {
        PolicyEnforcer::check(self, subject, tenant_id, object, action).await
    }
}
