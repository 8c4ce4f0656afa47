//! Audit sinks for authorization outcomes.

use std::collections::VecDeque;
use std::sync::RwLock;

use orgguard_auth::{AuditEntry, AuditError, AuditOutcome, AuditSink};
use orgguard_core::TenantId;

/// Tracing target every audit record is emitted under.
pub const AUDIT_TARGET: &str = "orgguard::audit";

/// Entries an [`InMemoryAuditLog`] keeps unless configured otherwise.
pub const DEFAULT_AUDIT_CAPACITY: usize = 10_000;

/// Bounded in-memory audit log: the most recent `capacity` entries, oldest
/// dropped first. The durable trail is the [`TracingAuditSink`] output.
#[derive(Debug)]
pub struct InMemoryAuditLog {
    entries: RwLock<VecDeque<AuditEntry>>,
    capacity: usize,
}

impl Default for InMemoryAuditLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_AUDIT_CAPACITY)
    }
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity.min(1_024))),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries of one tenant, oldest first.
    pub fn list(&self, tenant_id: TenantId) -> Vec<AuditEntry> {
        match self.entries.read() {
            Ok(entries) => entries
                .iter()
                .filter(|e| e.tenant_id == tenant_id)
                .cloned()
                .collect(),
            Err(_) => vec![],
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for InMemoryAuditLog {
    fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| AuditError::Unavailable("audit log lock poisoned".to_string()))?;
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
        Ok(())
    }
}

/// Emits each outcome as a structured tracing event on [`AUDIT_TARGET`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        match &entry.outcome {
            AuditOutcome::Allowed { via } => tracing::info!(
                target: AUDIT_TARGET,
                principal_id = %entry.principal_id,
                tenant_id = %entry.tenant_id,
                key = %entry.key,
                via = ?via,
                at = %entry.at,
                "authorization allowed"
            ),
            AuditOutcome::Denied { cause } => tracing::warn!(
                target: AUDIT_TARGET,
                principal_id = %entry.principal_id,
                tenant_id = %entry.tenant_id,
                key = %entry.key,
                cause = %cause,
                at = %entry.at,
                "authorization denied"
            ),
        }
        Ok(())
    }
}

/// Writes every entry to each inner sink; fails if any of them fails.
pub struct FanoutAuditSink {
    sinks: Vec<Box<dyn AuditSink>>,
}

impl FanoutAuditSink {
    pub fn new(sinks: Vec<Box<dyn AuditSink>>) -> Self {
        Self { sinks }
    }
}

impl AuditSink for FanoutAuditSink {
    fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        for sink in &self.sinks {
            sink.record(entry.clone())?;
        }
        Ok(())
    }
}
