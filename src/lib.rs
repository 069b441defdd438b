/// Error definitions
pub mod error;
/// The 3D scene host contract and an in-memory implementation
pub mod host;
/// `<map>_models.json` manifest model and I/O
pub mod manifest;
/// Material slot resolution against a model's material list
pub mod materials;
/// Canonical output names for imported models
pub mod naming;
/// Human-friendly ordering of fragment names
pub mod natural;
/// Per-record import, reconcile and export driver
pub mod pipeline;
/// Matching imported fragments to draw call metadata
pub mod reconcile;
