//! The 3D scene host the engine drives.
//!
//! The host owns all geometry. The engine only ever sees [`FragmentId`]
//! handles, reads names and material slots through them, and asks the host to
//! rename, merge, delete and export. A host exposes exactly one scene, so the
//! pipeline clears it before and after every model.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// In-memory host used by tests and dry runs
pub mod memory;

/// Opaque handle to one imported piece of geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FragmentId(pub u64);

#[derive(Debug, Error)]
pub enum HostError {
    #[error("failed to import {}: {reason}", path.display())]
    Import { path: PathBuf, reason: String },
    #[error("failed to export {}: {reason}", path.display())]
    Export { path: PathBuf, reason: String },
    #[error("no fragment {0:?} in the scene")]
    UnknownFragment(FragmentId),
}

/// What to import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportSource {
    /// A compiled model. `resource_dir` is where the importer looks for
    /// dependent resources.
    Vmdl { path: PathBuf, resource_dir: PathBuf },
    /// A glTF sidecar exported alongside an animated prop.
    Gltf { path: PathBuf },
}

/// One animation clip of the scene armature and the file it's exported to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnimationClip {
    pub name: String,
    pub path: PathBuf,
}

impl ImportSource {
    pub fn path(&self) -> &Path {
        match self {
            ImportSource::Vmdl { path, .. } | ImportSource::Gltf { path } => path,
        }
    }
}

/// Options passed through to the host importer.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Let the importer go looking for textures and materials on its own.
    /// Default: false, materials are resolved from the manifest instead.
    pub discover_resources: bool,
    /// Import scale. Default: 1.0, scaling happens on export.
    pub scale: f32,
    /// Smooth shading for glTF imports. Default: true.
    pub smooth_shading: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            discover_resources: false,
            scale: 1.0,
            smooth_shading: true,
        }
    }
}

/// Options passed through to the host exporter.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Uniform scale applied to exported geometry.
    pub global_scale: f32,
    /// Export only the given fragments rather than the whole scene.
    pub use_selection: bool,
    /// Include the scene armature alongside the exported fragments.
    pub with_armature: bool,
    pub bake_animation: bool,
    pub bake_space_transform: bool,
    pub add_leaf_bones: bool,
    /// Smoothing written per face rather than per edge.
    pub face_smoothing: bool,
}

impl ExportOptions {
    /// Options for static geometry at the given uniform scale.
    pub fn geometry(global_scale: f32) -> Self {
        Self {
            global_scale,
            ..Default::default()
        }
    }

    /// Options for armature-only animation clips.
    pub fn animation(global_scale: f32) -> Self {
        Self {
            global_scale,
            use_selection: true,
            with_armature: true,
            bake_animation: true,
            face_smoothing: false,
            ..Default::default()
        }
    }
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            global_scale: 1.0,
            use_selection: false,
            with_armature: false,
            bake_animation: false,
            bake_space_transform: true,
            add_leaf_bones: false,
            face_smoothing: true,
        }
    }
}

/// A 3D application holding a single mutable scene.
///
/// All calls are synchronous. Mutating calls on a handle that no longer
/// exists fail with [`HostError::UnknownFragment`].
pub trait SceneHost {
    /// Delete every object, mesh, material, action, armature and collection.
    fn clear_scene(&mut self);

    /// Import a model into the current scene. On failure the scene may still
    /// contain whatever the importer managed to create.
    fn import_model(&mut self, source: &ImportSource, options: &ImportOptions)
    -> Result<(), HostError>;

    /// Mesh fragments currently in the scene, in host order.
    fn fragments(&self) -> Vec<FragmentId>;

    fn fragment_name(&self, id: FragmentId) -> Result<String, HostError>;

    /// Rename both the object and its mesh data.
    fn rename_fragment(&mut self, id: FragmentId, name: &str) -> Result<(), HostError>;

    /// Material slot names in slot order. Empty slots are `None`.
    fn material_slots(&self, id: FragmentId) -> Result<Vec<Option<String>>, HostError>;

    /// Whether the fragment is weighted to any bone.
    fn has_vertex_groups(&self, id: FragmentId) -> Result<bool, HostError>;

    /// Join `others` into `target`. `target` keeps its handle and name.
    fn merge_fragments(&mut self, target: FragmentId, others: &[FragmentId])
    -> Result<(), HostError>;

    /// Remove the object and release its mesh data.
    fn delete_fragment(&mut self, id: FragmentId) -> Result<(), HostError>;

    /// Whether the scene holds an armature object.
    fn has_armature(&self) -> bool;

    /// Drop skeleton data imported alongside static geometry.
    fn remove_armatures(&mut self);

    /// Convert the packed vertex color UV layers into a color attribute.
    fn bake_vertex_colors(&mut self);

    fn export_fragments(
        &mut self,
        ids: &[FragmentId],
        path: &Path,
        options: &ExportOptions,
    ) -> Result<(), HostError>;

    /// Export each clip of the scene armature to its path, returning the
    /// written files. Clips the armature doesn't have are skipped.
    fn export_animations(
        &mut self,
        clips: &[AnimationClip],
        options: &ExportOptions,
    ) -> Result<Vec<PathBuf>, HostError>;

    /// Delete every fragment whose name contains `marker`. Returns how many
    /// were removed.
    fn remove_helper_geometry(&mut self, marker: &str) -> Result<usize, HostError> {
        let mut removed = 0;
        for id in self.fragments() {
            if self.fragment_name(id)?.contains(marker) {
                self.delete_fragment(id)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
