//! Merging non-instanced fragments by tint.
//!
//! Fragments that share a tint can become a single mesh; differently tinted
//! fragments can't, since the tint is applied per mesh downstream. So the
//! whole set is merged when every tint agrees, and otherwise one mesh is
//! produced per distinct tint with a synthesized, zero-based draw call index.

use tracing::{info, warn};

use crate::host::{FragmentId, SceneHost};
use crate::manifest::{DrawcallMeta, MeshRecord, ModelRecord, Tint, TintColor, WHITE};

use super::{
    ReconcileError, index_prefix, merge_naturally, mesh_record, named_naturally,
    parse_drawcall_index,
};

/// Fragments sharing one tint, in natural name order.
#[derive(Debug, Clone, PartialEq)]
pub struct TintGroup {
    pub color: TintColor,
    pub fragments: Vec<FragmentId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TintPlan {
    /// Every fragment has the same tint.
    Uniform(TintGroup),
    /// One group per distinct tint, in first-occurrence order.
    PerColor(Vec<TintGroup>),
}

impl TintPlan {
    pub fn groups(&self) -> &[TintGroup] {
        match self {
            TintPlan::Uniform(group) => std::slice::from_ref(group),
            TintPlan::PerColor(groups) => groups,
        }
    }
}

/// Tint of the draw call a fragment is named after, `None` when the name
/// matches no draw call.
pub fn fragment_tint(name: &str, drawcalls: &[DrawcallMeta]) -> Option<TintColor> {
    let prefix = index_prefix(name);
    drawcalls
        .iter()
        .find(|meta| meta.drawcall_index.to_string() == prefix)
        .map(DrawcallMeta::tint)
}

/// Partition naturally ordered fragments by tint.
///
/// Only fragments named after a draw call decide whether the tints agree.
/// When they do, every fragment is merged under that tint. Otherwise the
/// unmatched fragments join the white group.
pub fn plan_tint_groups(
    fragments: &[(FragmentId, String)],
    drawcalls: &[DrawcallMeta],
) -> TintPlan {
    let tinted: Vec<(FragmentId, Option<TintColor>)> = fragments
        .iter()
        .map(|(id, name)| (*id, fragment_tint(name, drawcalls)))
        .collect();

    let mut colors: Vec<TintColor> = Vec::new();
    for color in tinted.iter().filter_map(|(_, color)| *color) {
        if !colors.contains(&color) {
            colors.push(color);
        }
    }

    if colors.len() <= 1 {
        return TintPlan::Uniform(TintGroup {
            color: colors.first().copied().unwrap_or(WHITE),
            fragments: tinted.into_iter().map(|(id, _)| id).collect(),
        });
    }

    let mut groups: Vec<TintGroup> = Vec::new();
    for (id, color) in tinted {
        let color = color.unwrap_or(WHITE);
        match groups.iter_mut().find(|group| group.color == color) {
            Some(group) => group.fragments.push(id),
            None => groups.push(TintGroup {
                color,
                fragments: vec![id],
            }),
        }
    }
    TintPlan::PerColor(groups)
}

/// Merge `fragments` by tint, rename them under `base_name`, and emit one
/// record per resulting mesh.
pub fn reconcile_by_tint<H: SceneHost>(
    host: &mut H,
    model: &ModelRecord,
    fragments: &[FragmentId],
    base_name: &str,
) -> Result<Vec<MeshRecord>, ReconcileError> {
    let ordered = named_naturally(host, fragments)?;
    let plan = plan_tint_groups(&ordered, model.drawcalls());
    info!("Colors are the same: {}", matches!(plan, TintPlan::Uniform(_)));

    match plan {
        TintPlan::Uniform(group) => {
            let target = merge_naturally(host, &group.fragments)?
                .ok_or(ReconcileError::EmptyFragmentSet)?;
            let target_name = host.fragment_name(target)?;
            let prefix = index_prefix(&target_name).to_string();
            let index = parse_drawcall_index(&target_name)?;

            host.rename_fragment(target, &format!("{base_name}_{prefix}"))?;
            let record = mesh_record(
                host,
                model,
                target,
                index,
                Some(index),
                None,
                Some(Tint::Single(group.color)),
            )?;
            Ok(vec![record])
        }
        TintPlan::PerColor(groups) => {
            warn!("Using {} colors", groups.len());
            let mut records = Vec::with_capacity(groups.len());
            for (n, group) in groups.into_iter().enumerate() {
                info!("Current color: {:?}", group.color);
                let target = merge_naturally(host, &group.fragments)?
                    .ok_or(ReconcileError::EmptyFragmentSet)?;
                // Pass-through blobs come from the row at the synthesized index
                let index = n as i64;
                host.rename_fragment(target, &format!("{base_name}_{n}"))?;
                records.push(mesh_record(
                    host,
                    model,
                    target,
                    index,
                    Some(index),
                    None,
                    Some(Tint::Single(group.color)),
                )?);
            }
            Ok(records)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::host::memory::FragmentSpec;
    use crate::reconcile::tests::scene_with;

    const RED: TintColor = [1.0, 0.0, 0.0, 1.0];
    const BLUE: TintColor = [0.0, 0.0, 1.0, 1.0];

    fn model(value: serde_json::Value) -> ModelRecord {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn two_tints_make_two_meshes() {
        let mut scene = scene_with(vec![
            FragmentSpec::named("0").with_materials(&["a"]),
            FragmentSpec::named("1").with_materials(&["b"]),
            FragmentSpec::named("2"),
        ]);
        let model = model(json!({
            "model_materials": ["m/a", "m/b"],
            "parsed_data": [
                {"drawcall_index": 0, "vwnod_tint_color": [RED]},
                {"drawcall_index": 1, "vwnod_tint_color": [RED], "overlay_render_order": 3},
                {"drawcall_index": 2, "vwnod_tint_color": [BLUE], "vwnod_transform": ["row2"]}
            ]
        }));
        let fragments = scene.fragments();
        let records = reconcile_by_tint(&mut scene, &model, &fragments, "agg_ff").unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].drawcall_index, 0);
        assert_eq!(records[0].name, "agg_ff_0");
        assert_eq!(records[0].vwnod_tint_color, Some(Tint::Single(RED)));
        assert_eq!(
            records[0].material,
            vec![Some("m/a".to_string()), Some("m/b".to_string())]
        );
        assert_eq!(records[1].drawcall_index, 1);
        assert_eq!(records[1].name, "agg_ff_1");
        assert_eq!(records[1].vwnod_tint_color, Some(Tint::Single(BLUE)));
        // Blobs come from the row at the synthesized index, not from "2"
        assert_eq!(records[1].passthrough.overlay_render_order, Some(json!(3)));
        assert_eq!(records[1].passthrough.vwnod_transform, None);

        assert_eq!(scene.fragment_names(), vec!["agg_ff_0", "agg_ff_1"]);
    }

    #[test]
    fn uniform_tint_merges_everything() {
        let mut scene = scene_with(vec![
            FragmentSpec::named("10"),
            FragmentSpec::named("3"),
            FragmentSpec::named("4"),
        ]);
        let model = model(json!({
            "parsed_data": [
                {"drawcall_index": 0},
                {"drawcall_index": 1},
                {"drawcall_index": 2},
                {"drawcall_index": 3, "vwnod_transform": [1]},
                {"drawcall_index": 4},
                {"drawcall_index": 10}
            ]
        }));
        let fragments = scene.fragments();
        let records = reconcile_by_tint(&mut scene, &model, &fragments, "rock_aa").unwrap();

        assert_eq!(records.len(), 1);
        // "3" is first in natural order and absorbs the rest
        assert_eq!(records[0].name, "rock_aa_3");
        assert_eq!(records[0].drawcall_index, 3);
        assert_eq!(records[0].vwnod_tint_color, Some(Tint::Single(WHITE)));
        assert_eq!(records[0].entity_tint_color, None);
        assert_eq!(records[0].passthrough.vwnod_transform, Some(json!([1])));
        assert_eq!(scene.fragments().len(), 1);
    }

    #[test]
    fn unmatched_fragments_do_not_split_a_uniform_tint() {
        let mut scene = scene_with(vec![
            FragmentSpec::named("0"),
            FragmentSpec::named("1"),
            FragmentSpec::named("7"),
        ]);
        let model = model(json!({
            "parsed_data": [
                {"drawcall_index": 0, "vwnod_tint_color": [RED]},
                {"drawcall_index": 1, "vwnod_tint_color": [RED]}
            ]
        }));
        let fragments = scene.fragments();
        let records = reconcile_by_tint(&mut scene, &model, &fragments, "m").unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "m_0");
        assert_eq!(records[0].drawcall_index, 0);
        assert_eq!(records[0].vwnod_tint_color, Some(Tint::Single(RED)));
        assert_eq!(scene.fragment_names(), vec!["m_0"]);
    }

    #[test]
    fn no_matched_fragment_means_white() {
        let drawcalls: Vec<DrawcallMeta> = Vec::new();
        let fragments = vec![(FragmentId(0), "hull".to_string())];
        let plan = plan_tint_groups(&fragments, &drawcalls);
        assert_eq!(
            plan,
            TintPlan::Uniform(TintGroup {
                color: WHITE,
                fragments: vec![FragmentId(0)],
            })
        );
    }

    #[test]
    fn single_fragment_is_renamed_not_merged() {
        let mut scene = scene_with(vec![FragmentSpec::named("0")]);
        let model = model(json!({"parsed_data": [{"drawcall_index": 0}]}));
        let fragments = scene.fragments();
        let records = reconcile_by_tint(&mut scene, &model, &fragments, "x").unwrap();
        assert_eq!(records[0].name, "x_0");
        assert!(
            !scene
                .calls()
                .iter()
                .any(|c| matches!(c, crate::host::memory::HostCall::Merge { .. }))
        );
    }

    #[test]
    fn every_fragment_lands_in_exactly_one_group() {
        let drawcalls: Vec<DrawcallMeta> = serde_json::from_value(json!([
            {"drawcall_index": 0, "vwnod_tint_color": [BLUE]},
            {"drawcall_index": 1, "vwnod_tint_color": [RED]},
            {"drawcall_index": 2, "vwnod_tint_color": [BLUE]},
            {"drawcall_index": 3}
        ]))
        .unwrap();
        let fragments: Vec<(FragmentId, String)> = (0..5)
            .map(|i| (FragmentId(i), i.to_string()))
            .collect();
        let plan = plan_tint_groups(&fragments, &drawcalls);

        let TintPlan::PerColor(groups) = &plan else {
            panic!("expected several groups: {plan:?}");
        };
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].color, BLUE);
        assert_eq!(groups[0].fragments, vec![FragmentId(0), FragmentId(2)]);
        assert_eq!(groups[1].fragments, vec![FragmentId(1)]);
        // Draw call 3 has no tint and fragment 4 has no draw call: both white
        assert_eq!(groups[2].color, WHITE);
        assert_eq!(groups[2].fragments, vec![FragmentId(3), FragmentId(4)]);

        let mut all: Vec<_> = plan
            .groups()
            .iter()
            .flat_map(|g| g.fragments.clone())
            .collect();
        all.sort();
        assert_eq!(all, fragments.iter().map(|(id, _)| *id).collect::<Vec<_>>());
    }

    #[test]
    fn unindexed_merge_target_is_an_error() {
        let mut scene = scene_with(vec![FragmentSpec::named("hull")]);
        let model = model(json!({"parsed_data": []}));
        let fragments = scene.fragments();
        let err = reconcile_by_tint(&mut scene, &model, &fragments, "x").unwrap_err();
        assert!(matches!(err, ReconcileError::UnindexedFragment(_)));
    }

    #[test]
    fn empty_set_is_an_error() {
        let mut scene = scene_with(Vec::new());
        let model = model(json!({}));
        let err = reconcile_by_tint(&mut scene, &model, &[], "x").unwrap_err();
        assert!(matches!(err, ReconcileError::EmptyFragmentSet));
    }
}
