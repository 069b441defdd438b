use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use super::{
    AnimationClip, ExportOptions, FragmentId, HostError, ImportOptions, ImportSource, SceneHost,
};

/// Description of one mesh fragment an import produces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FragmentSpec {
    pub name: String,
    pub material_slots: Vec<Option<String>>,
    pub vertex_groups: bool,
}

impl FragmentSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_materials(mut self, slots: &[&str]) -> Self {
        self.material_slots = slots.iter().map(|s| Some(s.to_string())).collect();
        self
    }

    pub fn skinned(mut self) -> Self {
        self.vertex_groups = true;
        self
    }
}

/// What importing a given source path yields.
#[derive(Debug, Clone, Default)]
pub struct SourceSpec {
    pub fragments: Vec<FragmentSpec>,
    pub armature: bool,
    /// Animation clips carried by the armature.
    pub clips: Vec<String>,
    /// When set, the import reports this failure after creating `fragments`.
    pub import_error: Option<String>,
}

impl SourceSpec {
    pub fn new(fragments: impl IntoIterator<Item = FragmentSpec>) -> Self {
        Self {
            fragments: fragments.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Fragments named `"0"`..`"n-1"`, one per draw call.
    pub fn numbered(count: usize) -> Self {
        Self::new((0..count).map(|i| FragmentSpec::named(i.to_string())))
    }

    pub fn failing(mut self, reason: impl Into<String>) -> Self {
        self.import_error = Some(reason.into());
        self
    }

    pub fn with_armature(mut self, clips: &[&str]) -> Self {
        self.armature = true;
        self.clips = clips.iter().map(|c| c.to_string()).collect();
        self
    }
}

/// Every call the engine made against a [`MemoryScene`], by fragment name.
#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    Clear,
    Import(PathBuf),
    Rename { from: String, to: String },
    Merge { target: String, others: Vec<String> },
    Delete(String),
    RemoveArmatures,
    BakeVertexColors,
    Export { names: Vec<String>, path: PathBuf },
    ExportAnimations(Vec<PathBuf>),
}

/// A scene host that keeps fragments in memory.
///
/// Imports are looked up in a table of registered sources; unknown sources
/// fail like a missing file would. Every call is appended to [`Self::calls`].
#[derive(Debug, Default)]
pub struct MemoryScene {
    sources: HashMap<PathBuf, SourceSpec>,
    failing_exports: HashSet<PathBuf>,
    objects: BTreeMap<FragmentId, FragmentSpec>,
    armature: Option<Vec<String>>,
    next_id: u64,
    calls: Vec<HostCall>,
}

impl MemoryScene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register what importing `path` produces.
    pub fn register(&mut self, path: impl Into<PathBuf>, source: SourceSpec) -> &mut Self {
        self.sources.insert(path.into(), source);
        self
    }

    /// Make every export to `path` fail.
    pub fn fail_export(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.failing_exports.insert(path.into());
        self
    }

    pub fn calls(&self) -> &[HostCall] {
        &self.calls
    }

    /// Names of the fragments currently in the scene, in host order.
    pub fn fragment_names(&self) -> Vec<String> {
        self.objects.values().map(|spec| spec.name.clone()).collect()
    }

    /// Every export call as `(fragment names, path)`.
    pub fn exports(&self) -> Vec<(Vec<String>, PathBuf)> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                HostCall::Export { names, path } => Some((names.clone(), path.clone())),
                _ => None,
            })
            .collect()
    }

    fn object(&self, id: FragmentId) -> Result<&FragmentSpec, HostError> {
        self.objects.get(&id).ok_or(HostError::UnknownFragment(id))
    }

    fn object_mut(&mut self, id: FragmentId) -> Result<&mut FragmentSpec, HostError> {
        self.objects
            .get_mut(&id)
            .ok_or(HostError::UnknownFragment(id))
    }

    /// Hosts deduplicate names the way Blender does: `name`, `name.001`, ...
    fn unique_name(&self, wanted: &str, except: Option<FragmentId>) -> String {
        let taken = |candidate: &str| {
            self.objects
                .iter()
                .any(|(id, spec)| Some(*id) != except && spec.name == candidate)
        };
        if !taken(wanted) {
            return wanted.to_string();
        }
        (1..)
            .map(|n| format!("{wanted}.{n:03}"))
            .find(|candidate| !taken(candidate))
            .unwrap_or_else(|| wanted.to_string())
    }
}

impl SceneHost for MemoryScene {
    fn clear_scene(&mut self) {
        self.objects.clear();
        self.armature = None;
        self.calls.push(HostCall::Clear);
    }

    fn import_model(
        &mut self,
        source: &ImportSource,
        _options: &ImportOptions,
    ) -> Result<(), HostError> {
        let path = source.path().to_path_buf();
        self.calls.push(HostCall::Import(path.clone()));

        let Some(spec) = self.sources.get(&path).cloned() else {
            return Err(HostError::Import {
                path,
                reason: "file not found".to_string(),
            });
        };

        for mut fragment in spec.fragments {
            fragment.name = self.unique_name(&fragment.name, None);
            let id = FragmentId(self.next_id);
            self.next_id += 1;
            self.objects.insert(id, fragment);
        }
        if spec.armature {
            self.armature = Some(spec.clips);
        }

        match spec.import_error {
            Some(reason) => Err(HostError::Import { path, reason }),
            None => Ok(()),
        }
    }

    fn fragments(&self) -> Vec<FragmentId> {
        self.objects.keys().copied().collect()
    }

    fn fragment_name(&self, id: FragmentId) -> Result<String, HostError> {
        Ok(self.object(id)?.name.clone())
    }

    fn rename_fragment(&mut self, id: FragmentId, name: &str) -> Result<(), HostError> {
        let from = self.object(id)?.name.clone();
        let to = self.unique_name(name, Some(id));
        self.object_mut(id)?.name = to.clone();
        self.calls.push(HostCall::Rename { from, to });
        Ok(())
    }

    fn material_slots(&self, id: FragmentId) -> Result<Vec<Option<String>>, HostError> {
        Ok(self.object(id)?.material_slots.clone())
    }

    fn has_vertex_groups(&self, id: FragmentId) -> Result<bool, HostError> {
        Ok(self.object(id)?.vertex_groups)
    }

    fn merge_fragments(
        &mut self,
        target: FragmentId,
        others: &[FragmentId],
    ) -> Result<(), HostError> {
        self.object(target)?;
        let mut absorbed = Vec::with_capacity(others.len());
        for id in others.iter().filter(|id| **id != target) {
            absorbed.push(self.object(*id)?.clone());
        }
        for id in others {
            if *id != target {
                self.objects.remove(id);
            }
        }

        let target_spec = self.object_mut(target)?;
        for spec in &absorbed {
            for slot in &spec.material_slots {
                if !target_spec.material_slots.contains(slot) {
                    target_spec.material_slots.push(slot.clone());
                }
            }
            target_spec.vertex_groups |= spec.vertex_groups;
        }

        let target = target_spec.name.clone();
        self.calls.push(HostCall::Merge {
            target,
            others: absorbed.into_iter().map(|spec| spec.name).collect(),
        });
        Ok(())
    }

    fn delete_fragment(&mut self, id: FragmentId) -> Result<(), HostError> {
        let spec = self
            .objects
            .remove(&id)
            .ok_or(HostError::UnknownFragment(id))?;
        self.calls.push(HostCall::Delete(spec.name));
        Ok(())
    }

    fn has_armature(&self) -> bool {
        self.armature.is_some()
    }

    fn remove_armatures(&mut self) {
        self.armature = None;
        self.calls.push(HostCall::RemoveArmatures);
    }

    fn bake_vertex_colors(&mut self) {
        self.calls.push(HostCall::BakeVertexColors);
    }

    fn export_fragments(
        &mut self,
        ids: &[FragmentId],
        path: &Path,
        _options: &ExportOptions,
    ) -> Result<(), HostError> {
        let names = ids
            .iter()
            .map(|id| self.fragment_name(*id))
            .collect::<Result<Vec<_>, _>>()?;
        self.calls.push(HostCall::Export {
            names,
            path: path.to_path_buf(),
        });

        if self.failing_exports.contains(path) {
            return Err(HostError::Export {
                path: path.to_path_buf(),
                reason: "write failed".to_string(),
            });
        }
        Ok(())
    }

    fn export_animations(
        &mut self,
        clips: &[AnimationClip],
        _options: &ExportOptions,
    ) -> Result<Vec<PathBuf>, HostError> {
        let available = self.armature.as_deref().unwrap_or_default();
        let written: Vec<PathBuf> = clips
            .iter()
            .filter(|clip| available.contains(&clip.name))
            .map(|clip| clip.path.clone())
            .collect();
        self.calls.push(HostCall::ExportAnimations(written.clone()));
        Ok(written)
    }
}
