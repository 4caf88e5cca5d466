//! Command-line overrides for [`Config`].

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Common command-line arguments.
///
/// Values given here override settings loaded from `multires.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "multires", about = "Multiresolution mesh extraction")]
pub struct CliArgs {
    /// Binary index file.
    #[arg(long)]
    pub index: Option<PathBuf>,

    /// Fragment blob file (defaults to the index path with a `.blob` extension).
    #[arg(long)]
    pub blob: Option<PathBuf>,

    /// Largest tolerated screen-space error in pixels.
    #[arg(long)]
    pub max_pixel_error: Option<f32>,

    /// Vertical exaggeration.
    #[arg(long)]
    pub z_scale: Option<f32>,

    /// Memory budget for resident fragments, in bytes.
    #[arg(long)]
    pub memory_budget: Option<usize>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref path) = args.index {
            self.index.index_path = Some(path.clone());
        }
        if let Some(ref path) = args.blob {
            self.index.blob_path = Some(path.clone());
        }
        if let Some(e) = args.max_pixel_error {
            self.lod.max_pixel_error = e;
        }
        if let Some(z) = args.z_scale {
            self.lod.z_scale = z;
        }
        if let Some(bytes) = args.memory_budget {
            self.streaming.memory_budget_bytes = bytes;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
