//! Driving a whole manifest through the scene host.
//!
//! Records are handled strictly one at a time: the scene is cleared, the
//! compiled model is imported, its fragments are reduced and reconciled, the
//! result is exported, and the scene is cleared again. Collections are
//! processed in manifest order (world models, skybox models, then both prop
//! lists). Failed records are only removed once every record has been seen.

use std::fmt;
use std::path::{Path, PathBuf};

use bon::Builder;
use itertools::Itertools;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use variantly::Variantly;

use crate::host::{
    AnimationClip, ExportOptions, FragmentId, HostError, ImportOptions, ImportSource, SceneHost,
};
use crate::manifest::{
    Collection, Manifest, MeshRecord, ModelCategory, ModelRecord, RecordLocation,
};
use crate::naming::canonical_name;
use crate::reconcile::tint::reconcile_by_tint;
use crate::reconcile::{
    ReconcileError, RowLookup, lod, merge_naturally, named_naturally, reconcile_instanced,
};

/// Prefix of every skybox model's output name.
pub const SKY_PREFIX: &str = "sky__";

/// Name of the placeholder geometry glTF prop exports carry.
pub const HELPER_GEOMETRY_MARKER: &str = "Icosphere";

/// Where inputs come from and where exports go.
#[derive(Debug, Clone, Builder)]
pub struct PipelineOptions {
    /// Root of the decompiled game assets that `vmdl_c_path` is relative to.
    #[builder(into)]
    pub assets_root: PathBuf,
    /// Directory world model fragments are exported into.
    #[builder(into)]
    pub export_dir: PathBuf,
    /// Uniform scale factor. Default: 1.0.
    #[builder(default = 1.0)]
    pub scale: f32,
}

impl PipelineOptions {
    /// Global scale handed to the exporter.
    pub fn export_scale(&self) -> f32 {
        self.scale / 100.0
    }

    /// `fbx/` next to the manifest.
    pub fn default_export_dir(manifest_path: &Path) -> PathBuf {
        manifest_path
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join("fbx")
    }
}

/// Why a record was left untouched. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Variantly)]
pub enum SkipReason {
    /// The record doesn't point at a compiled model.
    NoModelPath,
    /// World model without a material list.
    MissingMaterialList,
    /// Prop without draw call metadata.
    MissingMetadata,
    /// `name` is already set from an earlier run.
    AlreadyProcessed,
    /// The import produced no geometry.
    NoGeometry,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkipReason::NoModelPath => "no model path",
            SkipReason::MissingMaterialList => "can't find materials",
            SkipReason::MissingMetadata => "no draw call metadata",
            SkipReason::AlreadyProcessed => "already converted",
            SkipReason::NoGeometry => "nothing was imported",
        })
    }
}

/// Why a record was flagged for removal.
#[derive(Debug, Error, Variantly)]
pub enum FailureReason {
    #[error("import failed: {0}")]
    Import(HostError),
    #[error("reconciliation failed: {0}")]
    Reconcile(#[from] ReconcileError),
    #[error("export failed: {0}")]
    Export(HostError),
    #[error("failed to create {}: {err}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        err: std::io::Error,
    },
}

/// What happened to every record of one run.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Records converted without any failure.
    pub processed: Vec<RecordLocation>,
    pub skipped: Vec<(RecordLocation, SkipReason)>,
    /// A record can appear more than once, e.g. when its import failed and
    /// reconciliation of the partial geometry failed too.
    pub failed: Vec<(RecordLocation, FailureReason)>,
}

impl RunReport {
    pub fn failed_locations(&self) -> impl Iterator<Item = &RecordLocation> {
        self.failed.iter().map(|(location, _)| location)
    }

    pub fn is_failed(&self, location: RecordLocation) -> bool {
        self.failed_locations().any(|failed| *failed == location)
    }

    fn flag(&mut self, location: RecordLocation, reason: FailureReason) {
        warn!("{location} flagged for removal: {reason}");
        self.failed.push((location, reason));
    }
}

/// Whether `record` is converted at all. Returns the model path to import.
pub fn check_record(collection: Collection, record: &ModelRecord) -> Result<&str, SkipReason> {
    let path = record.vmdl_c_path.as_deref().ok_or(SkipReason::NoModelPath)?;
    if collection.is_props() {
        if record.parsed_data.is_none() {
            return Err(SkipReason::MissingMetadata);
        }
    } else if record.model_materials.is_none() {
        return Err(SkipReason::MissingMaterialList);
    }
    if record.is_processed() {
        return Err(SkipReason::AlreadyProcessed);
    }
    Ok(path)
}

/// Output name of a record: the source basename for props, the canonical
/// name (with [`SKY_PREFIX`] for skybox models) otherwise.
pub fn output_name(collection: Collection, record: &ModelRecord) -> Option<String> {
    let stem = record.model_stem()?;
    if collection.is_props() {
        return Some(stem.to_string());
    }
    let name = canonical_name(stem, record.hex.as_deref().unwrap_or_default());
    Some(if collection.is_skybox_models() {
        format!("{SKY_PREFIX}{name}")
    } else {
        name
    })
}

/// What a run would do with one record.
#[derive(Debug, Clone, PartialEq)]
pub enum PlannedAction {
    Skip(SkipReason),
    Convert {
        name: String,
        /// `None` for props, which are always reconciled by position.
        category: Option<ModelCategory>,
    },
}

/// Decide what a run would do with every record, without touching a host.
pub fn plan(manifest: &Manifest) -> Vec<(RecordLocation, PlannedAction)> {
    Collection::ALL
        .iter()
        .flat_map(|collection| {
            manifest
                .collection(*collection)
                .iter()
                .enumerate()
                .map(move |(index, record)| {
                    let location = RecordLocation {
                        collection: *collection,
                        index,
                    };
                    let action = match check_record(*collection, record) {
                        Err(reason) => PlannedAction::Skip(reason),
                        Ok(_) => PlannedAction::Convert {
                            name: output_name(*collection, record).unwrap_or_default(),
                            category: (!collection.is_props()).then(|| record.category()),
                        },
                    };
                    (location, action)
                })
        })
        .collect()
}

/// Path of the prop export: the compiled model path with `.fbx` in place of
/// `.vmdl_c`.
pub fn prop_export_path(model_path: &Path) -> PathBuf {
    let text = model_path.to_string_lossy();
    match text.strip_suffix(".vmdl_c") {
        Some(stem) => PathBuf::from(format!("{stem}.fbx")),
        None => model_path.with_extension("fbx"),
    }
}

/// Animation clips a glTF prop exports, from the `animname` of every entity
/// entry of its first draw call, each written to `dir`.
///
/// Clip names with a `\` path are exported as `{prop_name}_{first component}`.
pub fn animation_clips(record: &ModelRecord, prop_name: &str, dir: &Path) -> Vec<AnimationClip> {
    let entries = record
        .drawcalls()
        .first()
        .and_then(|meta| meta.passthrough.entity_data.as_ref())
        .and_then(Value::as_array);
    let Some(entries) = entries else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| entry.get("animname").and_then(Value::as_str))
        .unique()
        .map(|name| {
            let stem = match name.split_once('\\') {
                Some((first, _)) => format!("{prop_name}_{first}"),
                None => name.to_string(),
            };
            AnimationClip {
                name: name.to_string(),
                path: dir.join(format!("{stem}.fbx")),
            }
        })
        .collect()
}

enum Outcome {
    Converted,
    NoGeometry,
}

pub struct Pipeline<H> {
    host: H,
    options: PipelineOptions,
}

impl<H: SceneHost> Pipeline<H> {
    pub fn new(host: H, options: PipelineOptions) -> Self {
        Self { host, options }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn into_host(self) -> H {
        self.host
    }

    /// Convert every record of `manifest` in place, then drop the records
    /// that failed.
    pub fn run(&mut self, manifest: &mut Manifest) -> RunReport {
        let total = manifest.total_records();
        info!("Converting {total} models");

        let mut report = RunReport::default();
        let mut seen = 0;
        for collection in Collection::ALL {
            self.host.clear_scene();
            for (index, record) in manifest.collection_mut(collection).iter_mut().enumerate() {
                seen += 1;
                let location = RecordLocation { collection, index };
                info!("[{seen}/{total}] {location}");
                self.process_record(location, record, &mut report);
            }
        }

        let removed = manifest.remove_failed(&report);
        if removed > 0 {
            warn!("Removed {removed} failed models from the manifest");
        }
        info!(
            "Converted {}, skipped {}, removed {removed}",
            report.processed.len(),
            report.skipped.len()
        );
        report
    }

    fn process_record(
        &mut self,
        location: RecordLocation,
        record: &mut ModelRecord,
        report: &mut RunReport,
    ) {
        let model_path = match check_record(location.collection, record) {
            Ok(path) => self.options.assets_root.join(path),
            Err(reason) => {
                match reason {
                    SkipReason::NoModelPath => debug!("{location}: {reason}, skipping"),
                    _ => warn!(
                        "Model {:?} {reason}, skipping",
                        record.vmdl_c_path.as_deref().unwrap_or_default()
                    ),
                }
                report.skipped.push((location, reason));
                return;
            }
        };

        let outcome = if location.collection.is_props() {
            self.process_prop(location, &model_path, record, report)
        } else {
            self.process_world_model(location, &model_path, record, report)
        };
        self.host.clear_scene();

        match outcome {
            Ok(_) if report.is_failed(location) => {}
            Ok(Outcome::Converted) => report.processed.push(location),
            Ok(Outcome::NoGeometry) => report.skipped.push((location, SkipReason::NoGeometry)),
            Err(reason) => report.flag(location, reason),
        }
    }

    /// Import `source`. A failure flags the record but whatever geometry the
    /// importer created is still processed.
    fn import(&mut self, location: RecordLocation, source: &ImportSource, report: &mut RunReport) {
        if let Err(err) = self.host.import_model(source, &ImportOptions::default()) {
            report.flag(location, FailureReason::Import(err));
        }
    }

    fn process_world_model(
        &mut self,
        location: RecordLocation,
        model_path: &Path,
        record: &mut ModelRecord,
        report: &mut RunReport,
    ) -> Result<Outcome, FailureReason> {
        info!("Working with model {}", model_path.display());
        let resource_dir = model_path.parent().map(Path::to_path_buf).unwrap_or_default();
        let source = ImportSource::Vmdl {
            path: model_path.to_path_buf(),
            resource_dir,
        };
        self.import(location, &source, report);
        self.host.remove_armatures();

        let imported = self.host.fragments().len();
        info!("Number of imported objects: {imported}");
        if imported == 0 {
            return Ok(Outcome::NoGeometry);
        }

        let name = output_name(location.collection, record).unwrap_or_default();
        info!("Mesh name: {name}");

        let mut meshes = self.reconcile_world_model(record, &name)?;
        self.host.bake_vertex_colors();

        let options = ExportOptions {
            use_selection: true,
            ..ExportOptions::geometry(self.options.export_scale())
        };
        for fragment in self.host.fragments() {
            let fragment_name = self
                .host
                .fragment_name(fragment)
                .map_err(FailureReason::Export)?;
            let path = self.options.export_dir.join(format!("{fragment_name}.fbx"));
            debug!("Exporting {}", path.display());
            self.host
                .export_fragments(&[fragment], &path, &options)
                .map_err(FailureReason::Export)?;

            if let Some(mesh) = meshes.iter_mut().find(|mesh| mesh.name == fragment_name) {
                mesh.fbx_path = Some(path.to_string_lossy().into_owned());
            }
        }

        record.mesh_data = Some(meshes);
        record.name = Some(name);
        Ok(Outcome::Converted)
    }

    fn reconcile_world_model(
        &mut self,
        record: &ModelRecord,
        name: &str,
    ) -> Result<Vec<MeshRecord>, ReconcileError> {
        let host = &mut self.host;
        let mut fragments = host.fragments();

        if record.is_raw_mesh() {
            fragments = lod::reduce_prop_lods(host, &fragments)?;
            for (n, (id, _)) in named_naturally(host, &fragments)?.into_iter().enumerate() {
                host.rename_fragment(id, &n.to_string())?;
            }
        } else {
            lod::strip_lod_suffixes(host, &fragments)?;
        }

        let category = record.category();
        info!("Category: {category}");
        match category {
            ModelCategory::RawMesh => {
                reconcile_instanced(host, record, &fragments, name, RowLookup::Name, true)
            }
            ModelCategory::Aggregate {
                has_lods,
                instanced,
            } => {
                if has_lods {
                    fragments = lod::reduce_aggregate_lods(host, record.drawcalls(), &fragments)?;
                }
                if instanced {
                    reconcile_instanced(host, record, &fragments, name, RowLookup::Name, false)
                } else {
                    reconcile_by_tint(host, record, &fragments, name)
                }
            }
            ModelCategory::Simple => reconcile_by_tint(host, record, &fragments, name),
        }
    }

    fn process_prop(
        &mut self,
        location: RecordLocation,
        model_path: &Path,
        record: &mut ModelRecord,
        report: &mut RunReport,
    ) -> Result<Outcome, FailureReason> {
        let prop_name = output_name(location.collection, record).unwrap_or_default();
        let prop_path = prop_export_path(model_path);
        info!("Current prop: {}", prop_path.display());
        info!("Current hex: {}", record.hex.as_deref().unwrap_or("none"));

        let gltf = record
            .gltf_path
            .as_deref()
            .map(PathBuf::from)
            .filter(|path| path.exists());

        match &gltf {
            Some(path) => {
                let source = ImportSource::Gltf { path: path.clone() };
                self.import(location, &source, report);
                let helpers = self
                    .host
                    .remove_helper_geometry(HELPER_GEOMETRY_MARKER)
                    .map_err(ReconcileError::from)?;
                debug!("Removed {helpers} helper objects");
            }
            None => {
                let resource_dir = model_path.parent().map(Path::to_path_buf).unwrap_or_default();
                let source = ImportSource::Vmdl {
                    path: model_path.to_path_buf(),
                    resource_dir,
                };
                self.import(location, &source, report);
                self.host.remove_armatures();
            }
        }

        let mut fragments = self.shape_prop(&prop_name)?;
        if fragments.is_empty() {
            return Ok(Outcome::NoGeometry);
        }

        let scale = self.options.export_scale();
        if gltf.is_some() {
            self.export_animated_prop(record, &prop_name, &prop_path, &fragments)?;
        } else {
            self.host
                .export_fragments(&fragments, &prop_path, &ExportOptions::geometry(scale))
                .map_err(FailureReason::Export)?;
        }

        if fragments.len() > 1 && gltf.is_none() {
            let target = merge_naturally(&mut self.host, &fragments)
                .map_err(ReconcileError::from)?
                .ok_or(ReconcileError::EmptyFragmentSet)?;
            self.host
                .rename_fragment(target, &prop_name)
                .map_err(ReconcileError::from)?;
            fragments = vec![target];
        }

        let meshes = reconcile_instanced(
            &mut self.host,
            record,
            &fragments,
            &prop_name,
            RowLookup::Position,
            false,
        )?;

        record.mesh_data = Some(meshes);
        record.fbx_path = Some(prop_path.to_string_lossy().into_owned());
        record.name = Some(prop_name);
        Ok(Outcome::Converted)
    }

    /// Drop lower LODs and, when some fragments are skinned, keep only those
    /// merged into one fragment called `prop_name`.
    fn shape_prop(&mut self, prop_name: &str) -> Result<Vec<FragmentId>, ReconcileError> {
        let fragments = self.host.fragments();
        let fragments = lod::reduce_prop_lods(&mut self.host, &fragments)?;
        if fragments.len() <= 1 {
            return Ok(fragments);
        }

        let mut skinned = Vec::new();
        let mut unskinned = Vec::new();
        for id in fragments.iter().copied() {
            if self.host.has_vertex_groups(id)? {
                skinned.push(id);
            } else {
                unskinned.push(id);
            }
        }
        if skinned.is_empty() {
            return Ok(fragments);
        }

        for id in unskinned {
            info!(
                "Removing mesh not linked to an armature {}",
                self.host.fragment_name(id)?
            );
            self.host.delete_fragment(id)?;
        }
        let target = merge_naturally(&mut self.host, &skinned)?
            .ok_or(ReconcileError::EmptyFragmentSet)?;
        self.host.rename_fragment(target, prop_name)?;
        Ok(vec![target])
    }

    fn export_animated_prop(
        &mut self,
        record: &mut ModelRecord,
        prop_name: &str,
        prop_path: &Path,
        fragments: &[FragmentId],
    ) -> Result<(), FailureReason> {
        if !self.host.has_armature() {
            debug!("No armature in {}, nothing to export", prop_path.display());
            return Ok(());
        }

        let folder = prop_path.parent().unwrap_or_else(|| Path::new(""));
        let anim_dir = folder.join(format!("{prop_name}_animations"));
        std::fs::create_dir_all(&anim_dir).map_err(|err| FailureReason::Filesystem {
            path: anim_dir.clone(),
            err,
        })?;

        info!("Exporting animations");
        let scale = self.options.export_scale();
        let clips = animation_clips(record, prop_name, &anim_dir);
        let written = self
            .host
            .export_animations(&clips, &ExportOptions::animation(scale))
            .map_err(FailureReason::Export)?;

        if !written.is_empty() {
            let list = record.fbx_anim_list.get_or_insert_with(Vec::new);
            for path in written {
                let path = path.to_string_lossy().into_owned();
                if !list.contains(&path) {
                    list.push(path);
                }
            }
        }

        let options = ExportOptions {
            use_selection: true,
            with_armature: true,
            ..ExportOptions::geometry(scale)
        };
        self.host
            .export_fragments(fragments, prop_path, &options)
            .map_err(FailureReason::Export)
    }
}
