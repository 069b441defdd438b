//! Matching imported fragments to their draw call metadata.
//!
//! After import every fragment is named after the draw call it came from.
//! Instanced models keep one fragment per draw call and look up the
//! matching metadata row directly ([`reconcile_instanced`]); everything else
//! is merged by tint in [`tint`]. Either way the result is one
//! [`MeshRecord`] per fragment left in the scene.

use itertools::Itertools;
use thiserror::Error;
use tracing::{debug, warn};

use crate::host::{FragmentId, HostError, SceneHost};
use crate::manifest::{MeshRecord, ModelRecord, Tint, WHITE};
use crate::materials::resolve_materials;
use crate::natural::natural_cmp;

/// Level of detail reduction
pub mod lod;
/// Tint grouping and merging for non-instanced models
pub mod tint;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(
        "fragment `{name}` maps to draw call {index}, but the model only has {available} metadata rows"
    )]
    MetadataIndexMismatch {
        name: String,
        index: i64,
        available: usize,
    },
    #[error("fragment `{0}` is not named after a draw call index")]
    UnindexedFragment(String),
    #[error("no fragments left to reconcile")]
    EmptyFragmentSet,
    #[error(transparent)]
    Host(#[from] HostError),
}

/// Pair each fragment with its current name.
pub fn named<H: SceneHost>(
    host: &H,
    fragments: &[FragmentId],
) -> Result<Vec<(FragmentId, String)>, HostError> {
    fragments
        .iter()
        .map(|id| Ok((*id, host.fragment_name(*id)?)))
        .collect()
}

/// Pair each fragment with its current name, in natural name order.
pub fn named_naturally<H: SceneHost>(
    host: &H,
    fragments: &[FragmentId],
) -> Result<Vec<(FragmentId, String)>, HostError> {
    Ok(named(host, fragments)?
        .into_iter()
        .sorted_by(|(_, a), (_, b)| natural_cmp(a, b))
        .collect())
}

/// Merge `fragments` into the first one in natural name order and return it.
pub fn merge_naturally<H: SceneHost>(
    host: &mut H,
    fragments: &[FragmentId],
) -> Result<Option<FragmentId>, HostError> {
    let ordered = named_naturally(host, fragments)?;
    let Some(((target, target_name), rest)) = ordered.split_first() else {
        return Ok(None);
    };

    if !rest.is_empty() {
        let others: Vec<FragmentId> = rest.iter().map(|(id, _)| *id).collect();
        warn!("Joined {} meshes into `{target_name}`", ordered.len());
        host.merge_fragments(*target, &others)?;
    }
    Ok(Some(*target))
}

/// Draw call index encoded in a fragment name: the part before the first
/// `.`, which hosts use for duplicate suffixes (`"12.001"` is draw call 12).
pub fn index_prefix(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}

pub fn parse_drawcall_index(name: &str) -> Result<i64, ReconcileError> {
    index_prefix(name)
        .parse()
        .map_err(|_| ReconcileError::UnindexedFragment(name.to_string()))
}

/// Assemble the record for one final fragment.
///
/// `row_index` picks the metadata row whose pass-through blobs are copied;
/// `None` or an index past the end copies nothing.
pub fn mesh_record<H: SceneHost>(
    host: &H,
    model: &ModelRecord,
    fragment: FragmentId,
    drawcall_index: i64,
    row_index: Option<i64>,
    entity_tint: Option<Tint>,
    vwnod_tint: Option<Tint>,
) -> Result<MeshRecord, HostError> {
    let name = host.fragment_name(fragment)?;
    let material = resolve_materials(&host.material_slots(fragment)?, model.materials());
    let passthrough = row_index
        .and_then(|i| model.drawcall(i))
        .map(|row| row.passthrough.present())
        .unwrap_or_default();

    Ok(MeshRecord::builder()
        .drawcall_index(drawcall_index)
        .name(name)
        .material(material)
        .maybe_entity_tint_color(entity_tint.filter(|t| !t.is_empty()))
        .maybe_vwnod_tint_color(vwnod_tint.filter(|t| !t.is_empty()))
        .passthrough(passthrough)
        .build())
}

/// Where an instanced fragment's metadata row index comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowLookup {
    /// The fragment's position in import order (props, which are merged to
    /// a single fragment before reconciliation).
    Position,
    /// The fragment's name; fragments are processed in natural name order.
    Name,
}

/// Reconcile fragments that each map to exactly one metadata row.
///
/// Every fragment is renamed `{base_name}_{index}`. A fragment whose row is
/// missing aborts the whole model unless `raw_mesh` is set, in which case a
/// bare white-tinted record is emitted instead.
pub fn reconcile_instanced<H: SceneHost>(
    host: &mut H,
    model: &ModelRecord,
    fragments: &[FragmentId],
    base_name: &str,
    lookup: RowLookup,
    raw_mesh: bool,
) -> Result<Vec<MeshRecord>, ReconcileError> {
    let ordered = match lookup {
        RowLookup::Position => named(host, fragments)?,
        RowLookup::Name => named_naturally(host, fragments)?,
    };

    let mut records = Vec::with_capacity(ordered.len());
    for (position, (fragment, current_name)) in ordered.into_iter().enumerate() {
        let key = match lookup {
            RowLookup::Position => position.to_string(),
            RowLookup::Name => current_name,
        };
        let prefix = index_prefix(&key);
        let index = parse_drawcall_index(&key)?;
        debug!("Current drawcall: {prefix}");

        let new_name = format!("{base_name}_{prefix}");
        host.rename_fragment(fragment, &new_name)?;

        let record = match model.drawcall(index) {
            Some(row) => mesh_record(
                host,
                model,
                fragment,
                index,
                Some(index),
                row.entity_tint_color.clone(),
                row.vwnod_tint_color.clone(),
            )?,
            None if raw_mesh => mesh_record(
                host,
                model,
                fragment,
                index,
                None,
                None,
                Some(Tint::PerInstance(vec![WHITE])),
            )?,
            None => {
                return Err(ReconcileError::MetadataIndexMismatch {
                    name: new_name,
                    index,
                    available: model.drawcalls().len(),
                });
            }
        };
        records.push(record);
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::json;

    use super::*;
    use crate::host::memory::{FragmentSpec, MemoryScene, SourceSpec};
    use crate::host::{ImportOptions, ImportSource};
    use crate::manifest::Passthrough;

    pub(crate) fn scene_with(fragments: Vec<FragmentSpec>) -> MemoryScene {
        let mut scene = MemoryScene::new();
        scene.register("m.vmdl_c", SourceSpec::new(fragments));
        scene
            .import_model(
                &ImportSource::Vmdl {
                    path: PathBuf::from("m.vmdl_c"),
                    resource_dir: PathBuf::from("."),
                },
                &ImportOptions::default(),
            )
            .unwrap();
        scene
    }

    fn model(value: serde_json::Value) -> ModelRecord {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn index_from_duplicate_suffixed_name() {
        assert_eq!(parse_drawcall_index("12.001").unwrap(), 12);
        assert!(matches!(
            parse_drawcall_index("hull"),
            Err(ReconcileError::UnindexedFragment(_))
        ));
    }

    #[test]
    fn instanced_by_name_renames_and_copies_rows() {
        let mut scene = scene_with(vec![
            FragmentSpec::named("10").with_materials(&["glass"]),
            FragmentSpec::named("2"),
        ]);
        let mut rows: Vec<_> = (0..11).map(|i| json!({"drawcall_index": i})).collect();
        rows[2] = json!({
            "drawcall_index": 2,
            "entity_tint_color": [[0.5, 0.5, 0.5, 1.0]],
            "entity_transform": [[1, 0, 0, 0]],
            "entity_data": []
        });
        let model = model(json!({
            "model_materials": ["materials/glass"],
            "parsed_data": rows
        }));

        let fragments = scene.fragments();
        let records =
            reconcile_instanced(&mut scene, &model, &fragments, "crate_aa", RowLookup::Name, false)
                .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "crate_aa_2");
        assert_eq!(records[0].drawcall_index, 2);
        assert_eq!(
            records[0].entity_tint_color,
            Some(Tint::PerInstance(vec![[0.5, 0.5, 0.5, 1.0]]))
        );
        assert_eq!(
            records[0].passthrough.entity_transform,
            Some(json!([[1, 0, 0, 0]]))
        );
        assert_eq!(records[0].passthrough.entity_data, None);
        assert!(records[0].material.is_empty());

        assert_eq!(records[1].name, "crate_aa_10");
        assert_eq!(
            records[1].material,
            vec![Some("materials/glass".to_string())]
        );
        assert_eq!(scene.fragment_names(), vec!["crate_aa_10", "crate_aa_2"]);
    }

    #[test]
    fn missing_row_aborts_non_raw_models() {
        let mut scene = scene_with(vec![FragmentSpec::named("0"), FragmentSpec::named("3")]);
        let model = model(json!({"parsed_data": [{"drawcall_index": 0}]}));
        let fragments = scene.fragments();
        let err =
            reconcile_instanced(&mut scene, &model, &fragments, "m", RowLookup::Name, false)
                .unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::MetadataIndexMismatch {
                index: 3,
                available: 1,
                ..
            }
        ));
    }

    #[test]
    fn missing_row_tolerated_for_raw_meshes() {
        let mut scene = scene_with(vec![FragmentSpec::named("0"), FragmentSpec::named("1")]);
        let model = model(json!({"parsed_data": [{"drawcall_index": 0, "vwnod_skin": [1]}]}));
        let fragments = scene.fragments();
        let records =
            reconcile_instanced(&mut scene, &model, &fragments, "m", RowLookup::Name, true)
                .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].passthrough.vwnod_skin, Some(json!([1])));
        assert_eq!(records[1].drawcall_index, 1);
        assert_eq!(records[1].entity_tint_color, None);
        assert_eq!(
            records[1].vwnod_tint_color,
            Some(Tint::PerInstance(vec![WHITE]))
        );
        assert_eq!(records[1].passthrough, Passthrough::default());
    }

    #[test]
    fn props_use_position() {
        let mut scene = scene_with(vec![FragmentSpec::named("barrel")]);
        let model = model(json!({"parsed_data": [{"drawcall_index": 0}]}));
        let fragments = scene.fragments();
        let records =
            reconcile_instanced(&mut scene, &model, &fragments, "barrel", RowLookup::Position, false)
                .unwrap();
        assert_eq!(records[0].name, "barrel_0");
    }

    #[test]
    fn merge_targets_natural_first() {
        let mut scene = scene_with(vec![
            FragmentSpec::named("10"),
            FragmentSpec::named("9"),
            FragmentSpec::named("11"),
        ]);
        let fragments = scene.fragments();
        let target = merge_naturally(&mut scene, &fragments).unwrap().unwrap();
        assert_eq!(scene.fragment_name(target).unwrap(), "9");
        assert_eq!(scene.fragments(), vec![target]);
    }
}
