use std::path::PathBuf;

use clap::Parser;
use rootcause::Report;
use tracing::{info, warn};

use s2maps::manifest::Manifest;
use s2maps::pipeline::{self, PipelineOptions, PlannedAction};

/// Plan the conversion of a map's `_models.json` manifest
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the `<map>_models.json` manifest
    manifest: PathBuf,

    /// Uniform scale factor applied on export
    scale: f32,

    /// Root of the decompiled game assets
    assets_root: PathBuf,

    /// Directory world model fragments are exported into. Defaults to `fbx/`
    /// next to the manifest
    #[clap(short, long)]
    export_dir: Option<PathBuf>,
}

fn main() -> Result<(), Report> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let export_dir = args
        .export_dir
        .unwrap_or_else(|| PipelineOptions::default_export_dir(&args.manifest));
    let options = PipelineOptions::builder()
        .assets_root(args.assets_root)
        .export_dir(export_dir)
        .scale(args.scale)
        .build();

    let manifest = Manifest::load(&args.manifest)?;

    info!(
        "{} models, assets in {}, exporting to {} at scale {}",
        manifest.total_records(),
        options.assets_root.display(),
        options.export_dir.display(),
        options.export_scale()
    );

    let mut converted = 0;
    for (location, action) in pipeline::plan(&manifest) {
        match action {
            PlannedAction::Skip(reason) => warn!("{location}: skip ({reason})"),
            PlannedAction::Convert { name, category } => {
                converted += 1;
                match category {
                    Some(category) => info!("{location}: {name} ({category})"),
                    None => info!("{location}: {name} (prop)"),
                }
            }
        }
    }
    info!("{converted} models would be converted");

    Ok(())
}
