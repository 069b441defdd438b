//! Mapping fragment material slots back to material asset paths.
//!
//! The importer names each material slot after the material file's stem, so
//! a slot called `concrete_wall` should resolve to a candidate such as
//! `materials/de_map/concrete_wall.vmat`. Some importers truncate names,
//! hence the prefix tier.

use tracing::debug;

/// How a slot name is compared against a candidate path's basename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    Exact,
    Prefix,
}

impl MatchTier {
    fn matches(self, slot: &str, basename: &str) -> bool {
        match self {
            MatchTier::Exact => basename == slot,
            MatchTier::Prefix => basename.starts_with(slot),
        }
    }
}

/// Tiers in the order they're attempted.
pub const TIERS: [MatchTier; 2] = [MatchTier::Exact, MatchTier::Prefix];

/// Final component of a `/`-separated asset path.
pub fn basename(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, name)| name)
}

/// Resolve every slot using a single tier. Slots that match nothing stay `None`.
pub fn resolve_with_tier(
    tier: MatchTier,
    slots: &[&str],
    candidates: &[String],
) -> Vec<Option<String>> {
    slots
        .iter()
        .map(|slot| {
            candidates
                .iter()
                .find(|candidate| tier.matches(slot, basename(candidate)))
                .cloned()
        })
        .collect()
}

/// Resolve a fragment's material slots against the model's candidate list.
///
/// Empty slots are skipped. The first tier that resolves at least one slot
/// wins and its result is returned as-is, unresolved slots included. Tiers
/// are never mixed: if nothing resolves under any tier the result is empty.
pub fn resolve_materials(slots: &[Option<String>], candidates: &[String]) -> Vec<Option<String>> {
    let slots: Vec<&str> = slots.iter().filter_map(|slot| slot.as_deref()).collect();

    for tier in TIERS {
        let resolved = resolve_with_tier(tier, &slots, candidates);
        if resolved.iter().any(Option::is_some) {
            debug!("resolved materials with {tier:?} tier: {resolved:?}");
            return resolved;
        }
    }

    Vec::new()
}
