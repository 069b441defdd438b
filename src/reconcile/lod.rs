//! Dropping lower levels of detail.
//!
//! Both policies only ever delete fragments. Deletion goes through the host
//! so the mesh data is released along with the object.

use std::borrow::Cow;
use std::sync::LazyLock;

use itertools::Itertools;
use regex::Regex;
use tracing::{info, warn};

use crate::host::{FragmentId, HostError, SceneHost};
use crate::manifest::DrawcallMeta;

use super::named;

/// Marker the importer gives the most detailed variant of a prop.
pub const PROP_LOD_MARKER: &str = "_LOD0";

static LOD_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_LOD\d+$").expect("valid LOD suffix pattern"));

/// Draw call indices to keep and remove for an aggregate model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LodPlan {
    pub keep: Vec<i64>,
    pub remove: Vec<i64>,
}

/// Group draw calls by LOD setup and keep the most detailed entry of each.
///
/// Entries outside any LOD group (`lod_setup_index == -1`) appear in neither
/// list. Ties on `lod_group_mask` keep the first entry.
pub fn plan_aggregate_lods(drawcalls: &[DrawcallMeta]) -> LodPlan {
    let groups = drawcalls
        .iter()
        .filter(|meta| meta.lod_setup_index != -1)
        .into_group_map_by(|meta| meta.lod_setup_index);

    let mut plan = LodPlan::default();
    for (_, metas) in groups.into_iter().sorted_by_key(|(setup, _)| *setup) {
        let Some(best) = metas.iter().min_by_key(|meta| meta.lod_group_mask) else {
            continue;
        };
        let best_index = best.drawcall_index;
        plan.keep.push(best_index);
        plan.remove.extend(
            metas
                .iter()
                .map(|meta| meta.drawcall_index)
                .filter(|index| *index != best_index),
        );
    }
    plan
}

/// Delete the fragments of every draw call `plan` removes. Returns what's left
/// of `fragments`, in the same order.
pub fn reduce_aggregate_lods<H: SceneHost>(
    host: &mut H,
    drawcalls: &[DrawcallMeta],
    fragments: &[FragmentId],
) -> Result<Vec<FragmentId>, HostError> {
    let plan = plan_aggregate_lods(drawcalls);
    let fragments = named(host, fragments)?;

    let doomed: Vec<(FragmentId, &str)> = plan
        .remove
        .iter()
        .flat_map(|index| {
            let wanted = index.to_string();
            fragments
                .iter()
                .filter(move |(_, name)| *name == wanted)
                .map(|(id, name)| (*id, name.as_str()))
        })
        .collect();

    info!("Found {} LODs to remove", doomed.len());
    for (i, (id, name)) in doomed.iter().enumerate() {
        warn!(
            "[{}/{}] Removing LOD for drawcall index \"{name}\"",
            i + 1,
            doomed.len()
        );
        host.delete_fragment(*id)?;
    }

    Ok(fragments
        .iter()
        .map(|(id, _)| *id)
        .filter(|id| !doomed.iter().any(|(gone, _)| gone == id))
        .collect())
}

/// Fragments to discard under the prop policy: when any name carries
/// [`PROP_LOD_MARKER`], everything without it. Otherwise nothing.
pub fn prop_lods_to_discard(fragments: &[(FragmentId, String)]) -> Vec<FragmentId> {
    let tagged = fragments
        .iter()
        .any(|(_, name)| name.contains(PROP_LOD_MARKER));
    if !tagged {
        return Vec::new();
    }
    fragments
        .iter()
        .filter(|(_, name)| !name.contains(PROP_LOD_MARKER))
        .map(|(id, _)| *id)
        .collect()
}

/// Apply the prop policy. Returns the surviving fragments in input order.
pub fn reduce_prop_lods<H: SceneHost>(
    host: &mut H,
    fragments: &[FragmentId],
) -> Result<Vec<FragmentId>, HostError> {
    let named_fragments = named(host, fragments)?;
    let doomed = prop_lods_to_discard(&named_fragments);

    for (id, name) in &named_fragments {
        if doomed.contains(id) {
            warn!("Removing LOD mesh {name}");
            host.delete_fragment(*id)?;
        }
    }

    Ok(fragments
        .iter()
        .copied()
        .filter(|id| !doomed.contains(id))
        .collect())
}

/// `name` without a trailing `_LOD<n>` tag.
pub fn strip_lod_suffix(name: &str) -> Cow<'_, str> {
    LOD_SUFFIX.replace(name, "")
}

/// Drop the importer's `_LOD<n>` tag from every fragment name so names are
/// bare draw call indices again.
pub fn strip_lod_suffixes<H: SceneHost>(
    host: &mut H,
    fragments: &[FragmentId],
) -> Result<(), HostError> {
    for (id, name) in named(host, fragments)? {
        if let Cow::Owned(stripped) = strip_lod_suffix(&name) {
            host.rename_fragment(id, &stripped)?;
        }
    }
    Ok(())
}
