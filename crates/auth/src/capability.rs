//! Capability maps: what a role (or the union of a principal's roles) grants.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// What a capability map holds for one module.
///
/// Serialized untagged, so the JSON form is either a bare boolean (module-wide
/// grant) or an object of key fragments to booleans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModuleGrant {
    Wildcard(bool),
    Detail(BTreeMap<String, bool>),
}

impl ModuleGrant {
    /// Truthiness of the module entry itself.
    ///
    /// An empty `Detail` is still truthy: the entry exists.
    pub fn is_truthy(&self) -> bool {
        match self {
            ModuleGrant::Wildcard(granted) => *granted,
            ModuleGrant::Detail(_) => true,
        }
    }

    /// Value of a leaf; `None` for wildcard entries and missing leaves.
    pub fn leaf(&self, fragment: &str) -> Option<bool> {
        match self {
            ModuleGrant::Wildcard(_) => None,
            ModuleGrant::Detail(leaves) => leaves.get(fragment).copied(),
        }
    }

    pub fn any_leaf_granted(&self) -> bool {
        match self {
            ModuleGrant::Wildcard(_) => false,
            ModuleGrant::Detail(leaves) => leaves.values().any(|v| *v),
        }
    }
}

/// Nested boolean tree: module name -> [`ModuleGrant`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityMap(BTreeMap<String, ModuleGrant>);

/// The union of every role a principal holds in the active tenant.
pub type EffectiveCapabilityMap = CapabilityMap;

impl CapabilityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a module-wide grant, replacing any detail map for the module.
    pub fn grant_module(&mut self, module: impl Into<String>, granted: bool) -> &mut Self {
        self.0.insert(module.into(), ModuleGrant::Wildcard(granted));
        self
    }

    /// Set a leaf under `module`. A module-wide entry is replaced by a detail map.
    pub fn grant(
        &mut self,
        module: impl Into<String>,
        fragment: impl Into<String>,
        granted: bool,
    ) -> &mut Self {
        let entry = self
            .0
            .entry(module.into())
            .or_insert_with(|| ModuleGrant::Detail(BTreeMap::new()));
        match entry {
            ModuleGrant::Detail(leaves) => {
                leaves.insert(fragment.into(), granted);
            }
            ModuleGrant::Wildcard(_) => {
                let mut leaves = BTreeMap::new();
                leaves.insert(fragment.into(), granted);
                *entry = ModuleGrant::Detail(leaves);
            }
        }
        self
    }

    pub fn with_module(mut self, module: impl Into<String>, granted: bool) -> Self {
        self.grant_module(module, granted);
        self
    }

    pub fn with_leaf(
        mut self,
        module: impl Into<String>,
        fragment: impl Into<String>,
        granted: bool,
    ) -> Self {
        self.grant(module, fragment, granted);
        self
    }

    pub fn module(&self, module: &str) -> Option<&ModuleGrant> {
        self.0.get(module)
    }

    pub fn modules(&self) -> impl Iterator<Item = (&str, &ModuleGrant)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub(crate) fn insert(&mut self, module: String, grant: ModuleGrant) {
        self.0.insert(module, grant);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Explicit `true` leaves as `(module, fragment)` pairs, in key order.
    ///
    /// Module-wide grants are not leaves and are not listed.
    pub fn leaves(&self) -> Vec<(&str, &str)> {
        let mut out = Vec::new();
        for (module, grant) in &self.0 {
            if let ModuleGrant::Detail(leaves) = grant {
                for (fragment, granted) in leaves {
                    if *granted {
                        out.push((module.as_str(), fragment.as_str()));
                    }
                }
            }
        }
        out
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}
