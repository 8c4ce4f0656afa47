//! Role synthesizer: merges role capability maps into one effective map.
//!
//! Pure logical OR. There are no negative permissions, so adding a role can
//! only add capabilities.

use std::collections::BTreeMap;

use orgguard_core::TenantId;

use crate::{CapabilityMap, EffectiveCapabilityMap, ModuleGrant, Role};

/// Merge the capability maps of `roles`.
///
/// Per module: any `Wildcard(true)` wins; otherwise detail maps are merged
/// leaf-by-leaf with OR; a module only ever seen as `Wildcard(false)` stays
/// `Wildcard(false)`. No roles yields an empty (deny-all) map.
pub fn synthesize(roles: &[Role]) -> EffectiveCapabilityMap {
    merge_maps(roles.iter().map(|r| &r.capabilities))
}

/// Like [`synthesize`], but only roles owned by `tenant_id` contribute.
pub fn synthesize_for_tenant(tenant_id: TenantId, roles: &[Role]) -> EffectiveCapabilityMap {
    let in_tenant = roles.iter().filter(|role| {
        if role.tenant_id == tenant_id {
            true
        } else {
            tracing::warn!(
                role_id = %role.id,
                role_tenant_id = %role.tenant_id,
                active_tenant_id = %tenant_id,
                "ignoring role from another tenant"
            );
            false
        }
    });
    merge_maps(in_tenant.map(|r| &r.capabilities))
}

fn merge_maps<'a>(maps: impl Iterator<Item = &'a CapabilityMap>) -> EffectiveCapabilityMap {
    let mut merged: BTreeMap<String, ModuleGrant> = BTreeMap::new();

    for map in maps {
        for (module, grant) in map.modules() {
            match merged.get_mut(module) {
                None => {
                    merged.insert(module.to_string(), grant.clone());
                }
                Some(existing) => merge_grant(existing, grant),
            }
        }
    }

    let mut out = CapabilityMap::new();
    for (module, grant) in merged {
        out.insert(module, grant);
    }
    out
}

fn merge_grant(existing: &mut ModuleGrant, incoming: &ModuleGrant) {
    match (&mut *existing, incoming) {
        (ModuleGrant::Wildcard(true), _) => {}
        (_, ModuleGrant::Wildcard(true)) => *existing = ModuleGrant::Wildcard(true),
        (ModuleGrant::Wildcard(false), ModuleGrant::Wildcard(false)) => {}
        (ModuleGrant::Wildcard(false), ModuleGrant::Detail(leaves)) => {
            *existing = ModuleGrant::Detail(leaves.clone());
        }
        (ModuleGrant::Detail(_), ModuleGrant::Wildcard(false)) => {}
        (ModuleGrant::Detail(current), ModuleGrant::Detail(leaves)) => {
            for (fragment, granted) in leaves {
                let slot = current.entry(fragment.clone()).or_insert(false);
                *slot = *slot || *granted;
            }
        }
    }
}
