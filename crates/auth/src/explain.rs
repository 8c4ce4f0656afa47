//! Explanations of resolution decisions ("why was this allowed/denied?").

use serde::Serialize;

use crate::{CapabilityMap, ModuleGrant, PermissionKey, ResolutionMode, Strategy, resolve_with};

/// Detailed, serializable account of a resolution decision.
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionExplanation {
    pub required_permission: String,
    pub granted: bool,
    pub mode: ResolutionMode,
    pub strategy: Option<Strategy>,
    /// Human-readable reason for the decision.
    pub reason: String,
    /// Modules present in the effective map (sorted).
    pub modules: Vec<String>,
    pub denial: Option<DenialDetail>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DenialDetail {
    pub message: String,
    pub suggestions: Vec<String>,
}

pub fn explain(map: &CapabilityMap, key: &PermissionKey, mode: ResolutionMode) -> ResolutionExplanation {
    let resolution = resolve_with(map, key, mode);
    let modules: Vec<String> = map.modules().map(|(m, _)| m.to_string()).collect();
    let required = key.as_str().to_string();

    if let Some(strategy) = resolution.strategy {
        return ResolutionExplanation {
            required_permission: required,
            granted: true,
            mode,
            strategy: Some(strategy),
            reason: allow_reason(key, strategy),
            modules,
            denial: None,
        };
    }

    let module = key.module();
    let message = match map.module(module) {
        None => format!("No role grants anything in module '{module}'"),
        Some(ModuleGrant::Wildcard(false)) => {
            format!("Module '{module}' is explicitly disabled for every held role")
        }
        Some(_) => format!("No leaf under '{module}' grants '{}'", key.as_str()),
    };

    let mut suggestions = vec![format!(
        "Grant '{}' under module '{module}' in one of the principal's roles",
        key.as_str()
    )];
    if mode == ResolutionMode::Strict
        && resolve_with(map, key, ResolutionMode::Compatible).allowed
    {
        suggestions.push(
            "Compatible resolution would allow this key through a module-level fallback; \
             the role map relies on it implicitly"
                .to_string(),
        );
    }

    ResolutionExplanation {
        required_permission: required,
        granted: false,
        mode,
        strategy: None,
        reason: format!("Permission '{}' is not granted: {message}", key.as_str()),
        modules,
        denial: Some(DenialDetail {
            message,
            suggestions,
        }),
    }
}

fn allow_reason(key: &PermissionKey, strategy: Strategy) -> String {
    let module = key.module();
    match strategy {
        Strategy::Exact => format!("Role grants '{}' explicitly", key.as_str()),
        Strategy::NestedKey => format!(
            "Role grants '{}' under module '{module}'",
            key.module_relative().unwrap_or_default()
        ),
        Strategy::ViewWildcard => format!("Role grants '{module}.view', which covers the whole module"),
        Strategy::ManageWildcard => {
            format!("Role grants '{module}.manage', which covers the whole module")
        }
        Strategy::ModuleWildcard => format!("Role grants the whole '{module}' module"),
        Strategy::ModulePresence => format!(
            "Role has an entry for module '{module}' (compatibility fallback: module presence)"
        ),
        Strategy::AnyTruthyLeaf => format!(
            "Role grants some key under '{module}' (compatibility fallback: any granted leaf)"
        ),
    }
}
