//! Resolution engine: effective capability map + requested key -> allow/deny.
//!
//! Strategies run in a fixed order and the first match wins:
//!
//! 1. exact: `map[module][key]`
//! 2. nested key: `map[module][key without "module:"]`
//! 3. `map[module].view`
//! 4. `map[module].manage`
//! 5. module entry is truthy (`true`, or any detail object)
//! 6. any `true` leaf under the module
//! 7. deny
//!
//! Steps 3-6 grant every key in the module. That is the established
//! behaviour and is kept as-is in [`ResolutionMode::Compatible`].
//! [`ResolutionMode::Strict`] keeps an explicit module-wide `true` but turns
//! off "detail object present" (5) and the leaf scan (6).

use serde::{Deserialize, Serialize};

use crate::{CapabilityMap, ModuleGrant, PermissionKey};

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMode {
    #[default]
    Compatible,
    Strict,
}

/// The strategy that produced an allow.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Exact,
    NestedKey,
    ViewWildcard,
    ManageWildcard,
    ModuleWildcard,
    ModulePresence,
    AnyTruthyLeaf,
}

impl Strategy {
    /// Whether this strategy only exists for compatibility with legacy role maps.
    pub fn is_compatibility_fallback(self) -> bool {
        matches!(self, Strategy::ModulePresence | Strategy::AnyTruthyLeaf)
    }
}

impl core::fmt::Display for Strategy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Strategy::Exact => "exact",
            Strategy::NestedKey => "nested_key",
            Strategy::ViewWildcard => "view_wildcard",
            Strategy::ManageWildcard => "manage_wildcard",
            Strategy::ModuleWildcard => "module_wildcard",
            Strategy::ModulePresence => "module_presence",
            Strategy::AnyTruthyLeaf => "any_truthy_leaf",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub allowed: bool,
    pub strategy: Option<Strategy>,
}

impl Resolution {
    const DENY: Resolution = Resolution {
        allowed: false,
        strategy: None,
    };

    fn allow(strategy: Strategy) -> Self {
        Self {
            allowed: true,
            strategy: Some(strategy),
        }
    }
}

/// Resolve `key` against `map` in [`ResolutionMode::Compatible`].
pub fn resolve(map: &CapabilityMap, key: &PermissionKey) -> bool {
    resolve_with(map, key, ResolutionMode::Compatible).allowed
}

/// Resolve `key` against `map`, reporting which strategy matched.
///
/// Pure: no IO, no side effects, same input same output.
pub fn resolve_with(map: &CapabilityMap, key: &PermissionKey, mode: ResolutionMode) -> Resolution {
    let Some(grant) = map.module(key.module()) else {
        return Resolution::DENY;
    };

    if grant.leaf(key.as_str()) == Some(true) {
        return Resolution::allow(Strategy::Exact);
    }

    if let Some(fragment) = key.module_relative() {
        if grant.leaf(fragment) == Some(true) {
            return Resolution::allow(Strategy::NestedKey);
        }
    }

    if grant.leaf("view") == Some(true) {
        return Resolution::allow(Strategy::ViewWildcard);
    }

    if grant.leaf("manage") == Some(true) {
        return Resolution::allow(Strategy::ManageWildcard);
    }

    match grant {
        ModuleGrant::Wildcard(true) => return Resolution::allow(Strategy::ModuleWildcard),
        ModuleGrant::Wildcard(false) => return Resolution::DENY,
        ModuleGrant::Detail(_) => {}
    }

    if mode == ResolutionMode::Strict {
        return Resolution::DENY;
    }

    if grant.is_truthy() {
        return Resolution::allow(Strategy::ModulePresence);
    }

    // Shadowed by module presence for every detail grant.
    if grant.any_leaf_granted() {
        return Resolution::allow(Strategy::AnyTruthyLeaf);
    }

    Resolution::DENY
}
