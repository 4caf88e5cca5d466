//! Command-line inspector for multiresolution meshes.
//!
//! Opens an index and its fragment blob, prints the DAG's shape and
//! extracts a cut for a given eye position, either in one blocking pass or
//! by streaming fragments over several frames.
//!
//! Run with `cargo run -p multires-inspect -- --index terrain.mrmi --write-sample`
//! to generate a synthetic terrain and inspect it.

mod sample;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use glam::Vec3;
use multires_config::{CliArgs, Config, LodConfig, default_config_dir};
use multires_fragment::{FileBlobReader, FragmentError, FragmentLoader, FragmentStore, MemoryBudget};
use multires_index::{IndexError, MultiresIndex};
use multires_lod::{
    Cut, Extractor, LodCriterion, LodSettings, ResolutionLadder, StreamingExtractor,
    ViewFrustumCriterion, ViewParams,
};
use tracing::{info, warn};

const FOV_Y: f32 = std::f32::consts::FRAC_PI_3;
const ASPECT: f32 = 16.0 / 9.0;
const VIEWPORT_HEIGHT: f32 = 1080.0;
const NEAR: f32 = 0.1;

#[derive(Parser, Debug)]
#[command(name = "multires-inspect", about = "Inspect and extract multiresolution meshes")]
struct InspectArgs {
    #[command(flatten)]
    common: CliArgs,

    /// Eye position "x,y,z". Without it the coarsest cut is extracted.
    #[arg(long, value_parser = parse_vec3)]
    eye: Option<Vec3>,

    /// Look-at target "x,y,z" (defaults to the mesh center).
    #[arg(long, value_parser = parse_vec3)]
    target: Option<Vec3>,

    /// Stream fragments in the background for this many frames instead of
    /// loading the cut synchronously.
    #[arg(long)]
    frames: Option<u64>,

    /// Generate a synthetic terrain at the index and blob paths first.
    #[arg(long)]
    write_sample: bool,

    /// Refinement levels of the synthetic terrain.
    #[arg(long, default_value_t = 4)]
    sample_depth: u32,

    /// Edge length of the synthetic terrain.
    #[arg(long, default_value_t = 1024.0)]
    sample_size: f32,
}

#[derive(Debug, thiserror::Error)]
enum InspectError {
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Fragment(#[from] FragmentError),
    #[error("failed to open fragment blob {}: {source}", path.display())]
    Blob {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no index path given (use --index or set index.index_path in multires.ron)")]
    MissingIndexPath,
}

fn parse_vec3(s: &str) -> Result<Vec3, String> {
    let parts = s
        .split(',')
        .map(|p| p.trim().parse::<f32>().map_err(|e| format!("{p:?}: {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    match parts.as_slice() {
        &[x, y, z] => Ok(Vec3::new(x, y, z)),
        _ => Err(format!("expected x,y,z, got {s:?}")),
    }
}

fn criterion_from_config(lod: &LodConfig) -> LodCriterion {
    let mut criterion = ViewFrustumCriterion::new(LodSettings {
        max_pixel_error: lod.max_pixel_error,
        z_scale: lod.z_scale,
        max_texture_size: lod.max_texture_size,
        max_projected_texel_size: lod.max_projected_texel_size,
    });
    if !lod.texture_resolutions.is_empty() {
        let ladder = ResolutionLadder::new(lod.texture_resolutions.iter().copied());
        criterion = criterion.with_registry(Arc::new(ladder));
    }
    criterion.into()
}

/// Camera at `eye` looking at `target`, with a far plane past the whole mesh.
fn view_for(index: &MultiresIndex, eye: Vec3, target: Vec3, z_scale: f32) -> ViewParams {
    let bbox = index.bbox().scale_z(z_scale);
    let far = (bbox.distance_to_point(eye) + bbox.size().length()) * 2.0 + 1.0;
    let forward = (target - eye).normalize_or_zero();
    let up = if forward.cross(Vec3::Z).length_squared() < 1e-6 {
        Vec3::Y
    } else {
        Vec3::Z
    };
    ViewParams::look_at(eye, target, up, FOV_Y, ASPECT, NEAR, far, VIEWPORT_HEIGHT)
}

fn print_cut(label: &str, cut: &Cut, store: &FragmentStore<FileBlobReader>) {
    let triangles: usize = cut
        .fragments()
        .iter()
        .filter_map(|&id| store.resident(id))
        .map(|payload| payload.triangle_count())
        .sum();
    let stats = cut.stats();
    println!("{label}");
    println!("  arcs:       {}", cut.len());
    println!("  fragments:  {}", cut.fragments().len());
    println!("  triangles:  {triangles}");
    println!("  evaluated:  {}", stats.arcs_evaluated);
    println!("  applied:    {}", stats.nodes_applied);
    println!("  deferred:   {}", stats.refinements_deferred);
    println!(
        "  resident:   {} fragments, {} bytes",
        store.loaded_count(),
        store.resident_bytes()
    );
}

fn run(args: InspectArgs) -> Result<(), InspectError> {
    let config_dir = args
        .common
        .config
        .clone()
        .or_else(default_config_dir)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args.common);

    let log_dir = config_dir.join("logs");
    multires_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    let index_path = config
        .index
        .index_path
        .clone()
        .ok_or(InspectError::MissingIndexPath)?;
    let blob_path = config
        .index
        .resolved_blob_path()
        .ok_or(InspectError::MissingIndexPath)?;

    if args.write_sample {
        let written =
            sample::write_sample(&index_path, &blob_path, args.sample_size, args.sample_depth)?;
        info!(
            index = %index_path.display(),
            blob = %blob_path.display(),
            arcs = written.arcs().len(),
            "wrote sample terrain"
        );
    }

    let index = Arc::new(MultiresIndex::open(&index_path)?);
    println!("Index {}", index_path.display());
    println!("  nodes:      {}", index.nodes().len());
    println!("  arcs:       {}", index.arcs().len());
    println!("  fragments:  {}", index.fragments().len());
    println!("  roots:      {}", index.roots().len());
    println!("  leaves:     {}", index.leaf_count());

    let z_scale = config.lod.z_scale;
    let (criterion, view) = match args.eye {
        Some(eye) => {
            let center = index.bbox().scale_z(z_scale).center();
            let target = args.target.unwrap_or(center);
            (
                criterion_from_config(&config.lod),
                view_for(&index, eye, target, z_scale),
            )
        }
        None => {
            let center = index.bbox().center();
            let eye = center + Vec3::Z * index.bbox().max_side_length().max(1.0);
            (LodCriterion::Coarsest, view_for(&index, eye, center, z_scale))
        }
    };

    let reader = open_blob(&blob_path)?;
    let store = Arc::new(FragmentStore::new(index.shared_fragments(), reader));

    match args.frames {
        None => {
            let cut = Extractor::new(&index).extract_with(&criterion, &view, store.as_ref());
            for &id in cut.fragments() {
                if let Err(e) = store.load(id) {
                    warn!(fragment = id, error = %e, "cut fragment unavailable");
                }
            }
            print_cut("Cut", &cut, &store);
        }
        Some(frames) => {
            let streaming_config = &config.streaming;
            let workers = match streaming_config.worker_count {
                0 => FragmentLoader::<FileBlobReader>::default_worker_count(),
                n => n,
            };
            let loader = FragmentLoader::new(
                Arc::clone(&store),
                workers,
                streaming_config.queue_capacity,
            )?;
            let mut streaming = StreamingExtractor::new(
                Arc::clone(&index),
                loader,
                MemoryBudget::new(streaming_config.memory_budget_bytes),
            )
            .with_max_requests_per_frame(streaming_config.max_requests_per_frame);

            for _ in 0..frames.max(1) {
                let frame = streaming.extract(&criterion, &view);
                info!(
                    frame = frame.number,
                    arcs = frame.cut.len(),
                    ready = frame.ready.len(),
                    missing = frame.missing.len(),
                    evicted = frame.evicted.len(),
                    "frame"
                );
                if frame.number == frames.max(1) {
                    print_cut(&format!("Frame {}", frame.number), &frame.cut, &store);
                    println!("  missing:    {}", frame.missing.len());
                }
                std::thread::sleep(std::time::Duration::from_millis(16));
            }
            let failed = streaming.failed().count();
            if failed > 0 {
                warn!(failed, "some fragments could not be loaded");
            }
        }
    }
    Ok(())
}

fn open_blob(path: &Path) -> Result<FileBlobReader, InspectError> {
    FileBlobReader::open(path).map_err(|source| InspectError::Blob {
        path: path.to_path_buf(),
        source,
    })
}

fn main() -> ExitCode {
    match run(InspectArgs::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vec3() {
        assert_eq!(parse_vec3("1, 2.5,-3").unwrap(), Vec3::new(1.0, 2.5, -3.0));
        assert!(parse_vec3("1,2").is_err());
        assert!(parse_vec3("a,b,c").is_err());
    }

    #[test]
    fn test_args_flatten_common_flags() {
        let args = InspectArgs::parse_from([
            "multires-inspect",
            "--index",
            "t.mrmi",
            "--eye",
            "0,0,100",
            "--frames",
            "3",
            "--max-pixel-error",
            "2",
        ]);
        assert_eq!(args.common.index, Some(PathBuf::from("t.mrmi")));
        assert_eq!(args.common.max_pixel_error, Some(2.0));
        assert_eq!(args.eye, Some(Vec3::new(0.0, 0.0, 100.0)));
        assert_eq!(args.frames, Some(3));
        assert!(!args.write_sample);
        assert_eq!(args.sample_depth, 4);
    }

    #[test]
    fn test_criterion_from_config() {
        let lod = LodConfig {
            max_pixel_error: 2.0,
            ..LodConfig::default()
        };
        match criterion_from_config(&lod) {
            LodCriterion::ViewFrustum(c) => assert_eq!(c.settings().max_pixel_error, 2.0),
            LodCriterion::Coarsest => panic!("expected a view-frustum criterion"),
        }
    }

    /// A view from above a sample terrain refines near the eye and stays
    /// coarse further away.
    #[test]
    fn test_sample_view_refines() {
        let (index, _) = sample::build_sample(1024.0, 3).unwrap();
        let view = view_for(&index, Vec3::new(100.0, 100.0, 60.0), Vec3::new(300.0, 300.0, 0.0), 1.0);
        let coarse = Extractor::new(&index).extract(&LodCriterion::Coarsest, &view);
        assert_eq!(coarse.len(), 1);

        let cut = Extractor::new(&index).extract(&criterion_from_config(&LodConfig::default()), &view);
        assert!(cut.len() > 1);
        assert!(cut.stats().nodes_applied >= 1);
    }
}
