// Shared fixtures for the pipeline integration tests
#![allow(dead_code)]

use std::path::{Path, PathBuf};

use s2maps::host::memory::MemoryScene;
use s2maps::manifest::Manifest;
use s2maps::pipeline::{Pipeline, PipelineOptions, RunReport};
use serde_json::{Value, json};

pub const ASSETS_ROOT: &str = "/game";
pub const EXPORT_DIR: &str = "/out/fbx";

pub fn options() -> PipelineOptions {
    options_with_root(ASSETS_ROOT)
}

pub fn options_with_root(assets_root: impl Into<PathBuf>) -> PipelineOptions {
    PipelineOptions::builder()
        .assets_root(assets_root)
        .export_dir(EXPORT_DIR)
        .scale(100.0)
        .build()
}

/// Absolute path the pipeline imports for a manifest-relative model path.
pub fn asset(relative: &str) -> PathBuf {
    Path::new(ASSETS_ROOT).join(relative)
}

pub fn exported(name: &str) -> PathBuf {
    Path::new(EXPORT_DIR).join(format!("{name}.fbx"))
}

pub fn manifest(value: Value) -> Manifest {
    serde_json::from_value(value).expect("valid manifest fixture")
}

/// A world model record with `rows` plain draw call rows.
pub fn world_model(path: &str, hex: &str, rows: usize) -> Value {
    let rows: Vec<Value> = (0..rows).map(|i| json!({"drawcall_index": i})).collect();
    json!({
        "vmdl_c_path": path,
        "hex": hex,
        "model_materials": [],
        "parsed_data": rows
    })
}

pub fn prop(path: &str) -> Value {
    json!({
        "vmdl_c_path": path,
        "hex": "0",
        "parsed_data": [{"drawcall_index": 0}]
    })
}

/// Run `manifest` through a fresh pipeline over `scene`.
pub fn run(scene: MemoryScene, manifest: &mut Manifest) -> (RunReport, MemoryScene) {
    run_with(scene, options(), manifest)
}

pub fn run_with(
    scene: MemoryScene,
    options: PipelineOptions,
    manifest: &mut Manifest,
) -> (RunReport, MemoryScene) {
    let mut pipeline = Pipeline::new(scene, options);
    let report = pipeline.run(manifest);
    (report, pipeline.into_host())
}
