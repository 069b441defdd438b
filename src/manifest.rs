//! The `<map>_models.json` manifest shared with the engine-side importer.
//!
//! The upstream extractor writes one [`ModelRecord`] per compiled model the
//! map references, with its draw call metadata in `parsed_data`. The pipeline
//! fills in `name`, `mesh_data` and `fbx_path` and writes the file back.
//! Keys this crate doesn't know about are kept as-is.

use std::fmt;
use std::path::Path;

use bon::Builder;
use rootcause::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::IResult;
use crate::pipeline::RunReport;

/// An RGBA multiplier.
pub type TintColor = [f64; 4];

/// Opaque white, the tint of anything without one.
pub const WHITE: TintColor = [1.0, 1.0, 1.0, 1.0];

/// A tint as stored in the manifest: a single color, or one per placed instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Tint {
    Single(TintColor),
    PerInstance(Vec<TintColor>),
}

impl Tint {
    /// The color used to group fragments: the first color, white if there are none.
    pub fn primary(&self) -> TintColor {
        match self {
            Tint::Single(color) => *color,
            Tint::PerInstance(colors) => colors.first().copied().unwrap_or(WHITE),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Tint::PerInstance(colors) if colors.is_empty())
    }
}

fn default_lod_setup_index() -> i64 {
    -1
}

/// One row of draw call metadata, in the compiled model's draw call order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrawcallMeta {
    #[serde(default)]
    pub drawcall_index: i64,
    /// LOD group this draw call belongs to, -1 when it isn't part of one.
    #[serde(default = "default_lod_setup_index")]
    pub lod_setup_index: i64,
    /// Lower is more detailed.
    #[serde(default)]
    pub lod_group_mask: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_tint_color: Option<Tint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vwnod_tint_color: Option<Tint>,
    #[serde(flatten)]
    pub passthrough: Passthrough,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DrawcallMeta {
    /// Grouping tint of this draw call.
    pub fn tint(&self) -> TintColor {
        self.vwnod_tint_color
            .as_ref()
            .map_or(WHITE, Tint::primary)
    }
}

/// Per draw call blobs copied verbatim into the emitted mesh records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Passthrough {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vwnod_transform: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_transform: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vwnod_skin: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_skin: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_type_flags: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay_render_order: Option<Value>,
}

/// Whether a JSON value carries anything: not null, false, zero or empty.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

impl Passthrough {
    /// Copy of `self` keeping only the blobs that carry data.
    pub fn present(&self) -> Passthrough {
        let keep = |value: &Option<Value>| value.as_ref().filter(|v| is_truthy(v)).cloned();
        Passthrough {
            vwnod_transform: keep(&self.vwnod_transform),
            entity_transform: keep(&self.entity_transform),
            entity_data: keep(&self.entity_data),
            vwnod_skin: keep(&self.vwnod_skin),
            entity_skin: keep(&self.entity_skin),
            object_type_flags: keep(&self.object_type_flags),
            overlay_render_order: keep(&self.overlay_render_order),
        }
    }
}

/// One emitted mesh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
pub struct MeshRecord {
    pub drawcall_index: i64,
    pub name: String,
    /// Resolved material paths in slot order; empty when nothing resolved.
    #[serde(default)]
    pub material: Vec<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_tint_color: Option<Tint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vwnod_tint_color: Option<Tint>,
    #[serde(flatten)]
    #[builder(default)]
    pub passthrough: Passthrough,
    /// File this mesh was exported to, for world models exported per fragment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fbx_path: Option<String>,
}

/// One compiled model referenced by the map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    /// Path of the compiled model relative to the decompiled assets root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vmdl_c_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_materials: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed_data: Option<Vec<DrawcallMeta>>,
    /// Disambiguation token appended to the canonical name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_aggregate_meshes: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_lods: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_instances: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vwnod_instances: Option<i64>,
    /// Present (with any value) for raw meshes without authored metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_vmesh: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gltf_path: Option<String>,
    /// Output name; set once the record has been converted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh_data: Option<Vec<MeshRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fbx_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fbx_anim_list: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// How a record's fragments are reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelCategory {
    /// Geometry without authored metadata; instanced, missing rows tolerated.
    RawMesh,
    /// Several draw calls bundled into one model.
    Aggregate { has_lods: bool, instanced: bool },
    /// Everything else; fragments are merged by tint.
    Simple,
}

impl fmt::Display for ModelCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelCategory::RawMesh => f.write_str("raw mesh"),
            ModelCategory::Aggregate {
                has_lods,
                instanced,
            } => {
                f.write_str("aggregate")?;
                if *has_lods {
                    f.write_str(" with LODs")?;
                }
                f.write_str(if *instanced { ", instanced" } else { ", merged" })
            }
            ModelCategory::Simple => f.write_str("simple"),
        }
    }
}

impl ModelRecord {
    pub fn drawcalls(&self) -> &[DrawcallMeta] {
        self.parsed_data.as_deref().unwrap_or_default()
    }

    /// Metadata row at draw call position `index`.
    pub fn drawcall(&self, index: i64) -> Option<&DrawcallMeta> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.drawcalls().get(i))
    }

    pub fn materials(&self) -> &[String] {
        self.model_materials.as_deref().unwrap_or_default()
    }

    pub fn is_raw_mesh(&self) -> bool {
        self.is_vmesh.is_some()
    }

    pub fn is_aggregate(&self) -> bool {
        self.num_aggregate_meshes.is_some()
    }

    pub fn has_lods(&self) -> bool {
        self.num_lods.unwrap_or(0) > 0
    }

    pub fn is_instanced(&self) -> bool {
        self.entity_instances.unwrap_or(0) > 0 || self.vwnod_instances.unwrap_or(0) > 0
    }

    pub fn is_processed(&self) -> bool {
        self.name.is_some()
    }

    pub fn category(&self) -> ModelCategory {
        if self.is_raw_mesh() {
            ModelCategory::RawMesh
        } else if self.is_aggregate() {
            ModelCategory::Aggregate {
                has_lods: self.has_lods(),
                instanced: self.is_instanced(),
            }
        } else {
            ModelCategory::Simple
        }
    }

    /// Basename of the compiled model without its `.vmdl_c` extension.
    pub fn model_stem(&self) -> Option<&str> {
        let path = self.vmdl_c_path.as_deref()?;
        let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
        Some(name.strip_suffix(".vmdl_c").unwrap_or(name))
    }
}

/// The four record collections of a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, variantly::Variantly)]
pub enum Collection {
    MapModels,
    SkyboxModels,
    MapPropsModels,
    SkyboxPropsModels,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::MapModels,
        Collection::SkyboxModels,
        Collection::MapPropsModels,
        Collection::SkyboxPropsModels,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Collection::MapModels => "map_models",
            Collection::SkyboxModels => "skybox_models",
            Collection::MapPropsModels => "map_props_models",
            Collection::SkyboxPropsModels => "skybox_props_models",
        }
    }

    pub fn is_props(self) -> bool {
        self.is_map_props_models() || self.is_skybox_props_models()
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Position of a record inside a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordLocation {
    pub collection: Collection,
    pub index: usize,
}

impl fmt::Display for RecordLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.collection, self.index)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub map_models: Vec<ModelRecord>,
    #[serde(default)]
    pub skybox_models: Vec<ModelRecord>,
    #[serde(default)]
    pub map_props_models: Vec<ModelRecord>,
    #[serde(default)]
    pub skybox_props_models: Vec<ModelRecord>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Manifest {
    pub fn from_json(json: &str) -> IResult<Manifest> {
        Ok(serde_json::from_str(json)?)
    }

    /// Pretty-printed with the 4-space indent the importer side writes.
    pub fn to_json(&self) -> IResult<String> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.serialize(&mut serializer)?;
        Ok(String::from_utf8(out)?)
    }

    pub fn load(path: &Path) -> Result<Manifest, Report> {
        let json = std::fs::read_to_string(path)
            .context_with(|| format!("Failed to read manifest {}", path.display()))?;
        let manifest = Self::from_json(&json)
            .context_with(|| format!("Failed to parse manifest {}", path.display()))?;
        Ok(manifest)
    }

    pub fn save(&self, path: &Path) -> Result<(), Report> {
        let json = self.to_json().context("Failed to serialize manifest")?;
        std::fs::write(path, json)
            .context_with(|| format!("Failed to write manifest {}", path.display()))?;
        Ok(())
    }

    pub fn collection(&self, collection: Collection) -> &[ModelRecord] {
        match collection {
            Collection::MapModels => &self.map_models,
            Collection::SkyboxModels => &self.skybox_models,
            Collection::MapPropsModels => &self.map_props_models,
            Collection::SkyboxPropsModels => &self.skybox_props_models,
        }
    }

    pub fn collection_mut(&mut self, collection: Collection) -> &mut Vec<ModelRecord> {
        match collection {
            Collection::MapModels => &mut self.map_models,
            Collection::SkyboxModels => &mut self.skybox_models,
            Collection::MapPropsModels => &mut self.map_props_models,
            Collection::SkyboxPropsModels => &mut self.skybox_props_models,
        }
    }

    pub fn total_records(&self) -> usize {
        Collection::ALL
            .iter()
            .map(|c| self.collection(*c).len())
            .sum()
    }

    pub fn record(&self, location: RecordLocation) -> Option<&ModelRecord> {
        self.collection(location.collection).get(location.index)
    }

    /// Remove the records at `locations`. Each collection is drained from the
    /// highest index down so earlier removals don't shift later ones.
    /// Returns how many records were removed.
    pub fn remove_records<'a>(
        &mut self,
        locations: impl IntoIterator<Item = &'a RecordLocation>,
    ) -> usize {
        let mut locations: Vec<RecordLocation> = locations.into_iter().copied().collect();
        locations.sort_unstable();
        locations.dedup();

        let mut removed = 0;
        for location in locations.iter().rev() {
            let records = self.collection_mut(location.collection);
            if location.index < records.len() {
                records.remove(location.index);
                removed += 1;
            }
        }
        removed
    }

    /// Remove every record `report` flagged as failed.
    pub fn remove_failed(&mut self, report: &RunReport) -> usize {
        self.remove_records(report.failed_locations())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> ModelRecord {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn drawcall_defaults() {
        let meta: DrawcallMeta = serde_json::from_value(json!({})).unwrap();
        assert_eq!(meta.drawcall_index, 0);
        assert_eq!(meta.lod_setup_index, -1);
        assert_eq!(meta.lod_group_mask, 0);
        assert_eq!(meta.tint(), WHITE);
    }

    #[test]
    fn tint_shapes() {
        let single: Tint = serde_json::from_value(json!([0.5, 0.5, 0.5, 1.0])).unwrap();
        assert_eq!(single, Tint::Single([0.5, 0.5, 0.5, 1.0]));

        let per_instance: Tint =
            serde_json::from_value(json!([[0.1, 0.2, 0.3, 1.0], [1.0, 1.0, 1.0, 1.0]])).unwrap();
        assert_eq!(per_instance.primary(), [0.1, 0.2, 0.3, 1.0]);

        let empty: Tint = serde_json::from_value(json!([])).unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.primary(), WHITE);
    }

    #[test]
    fn unknown_keys_survive_round_trip() {
        let value = json!({
            "vmdl_c_path": "models/props/crate.vmdl_c",
            "origin": [1, 2, 3],
            "parsed_data": [{"drawcall_index": 0, "lod_setup_index": -1, "custom": true}]
        });
        let rec = record(value.clone());
        assert_eq!(rec.extra.get("origin"), Some(&json!([1, 2, 3])));
        assert_eq!(rec.drawcalls()[0].extra.get("custom"), Some(&json!(true)));
        let back = serde_json::to_value(&rec).unwrap();
        assert_eq!(back["origin"], json!([1, 2, 3]));
        assert_eq!(back["parsed_data"][0]["custom"], json!(true));
        assert!(back.get("name").is_none());
    }

    #[test]
    fn categories() {
        assert_eq!(record(json!({"is_vmesh": true})).category(), ModelCategory::RawMesh);
        assert_eq!(
            record(json!({"num_aggregate_meshes": 3, "num_lods": 2, "vwnod_instances": 0}))
                .category(),
            ModelCategory::Aggregate {
                has_lods: true,
                instanced: false
            }
        );
        assert_eq!(
            record(json!({"num_aggregate_meshes": 3, "entity_instances": 4})).category(),
            ModelCategory::Aggregate {
                has_lods: false,
                instanced: true
            }
        );
        assert_eq!(record(json!({})).category(), ModelCategory::Simple);
    }

    #[test]
    fn model_stem_strips_directories_and_extension() {
        let rec = record(json!({"vmdl_c_path": "maps/de_x/entities/lr1_agg0_1.vmdl_c"}));
        assert_eq!(rec.model_stem(), Some("lr1_agg0_1"));
        let rec = record(json!({"vmdl_c_path": "maps\\de_x\\crate.vmdl_c"}));
        assert_eq!(rec.model_stem(), Some("crate"));
    }

    #[test]
    fn passthrough_drops_empty_blobs() {
        let meta: DrawcallMeta = serde_json::from_value(json!({
            "vwnod_transform": [[1, 0, 0], [0, 1, 0]],
            "entity_data": [],
            "object_type_flags": 0,
            "overlay_render_order": 2
        }))
        .unwrap();
        let present = meta.passthrough.present();
        assert!(present.vwnod_transform.is_some());
        assert!(present.entity_data.is_none());
        assert!(present.object_type_flags.is_none());
        assert_eq!(present.overlay_render_order, Some(json!(2)));
    }

    #[test]
    fn remove_records_keeps_indices_stable() {
        let mut manifest = Manifest::default();
        manifest.map_models = (0..4)
            .map(|i| record(json!({"hex": i.to_string()})))
            .collect();
        let failed = [
            RecordLocation {
                collection: Collection::MapModels,
                index: 1,
            },
            RecordLocation {
                collection: Collection::MapModels,
                index: 3,
            },
        ];
        assert_eq!(manifest.remove_records(&failed), 2);
        let left: Vec<_> = manifest
            .map_models
            .iter()
            .map(|r| r.hex.clone().unwrap())
            .collect();
        assert_eq!(left, vec!["0", "2"]);
    }

    #[test]
    fn json_uses_four_space_indent() {
        let manifest = Manifest::from_json(r#"{"map_models": [{"hex": "aa"}]}"#).unwrap();
        let json = manifest.to_json().unwrap();
        assert!(json.contains("\n    \"map_models\""));
        assert!(json.contains("\"skybox_props_models\": []"));
    }
}
