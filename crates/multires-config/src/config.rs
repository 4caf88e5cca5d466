//! Configuration structs with defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const CONFIG_FILE: &str = "multires.ron";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub lod: LodConfig,
    pub streaming: StreamingConfig,
    pub index: IndexConfig,
    pub debug: DebugConfig,
}

/// Refinement criterion settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LodConfig {
    /// Largest tolerated projected geometric error, in pixels.
    pub max_pixel_error: f32,
    /// Vertical exaggeration.
    pub z_scale: f32,
    /// Largest texture edge a fragment may need, in texels.
    pub max_texture_size: u32,
    /// Desired on-screen texel size, in pixels.
    pub max_projected_texel_size: f32,
    /// Available texture resolutions in meters per texel. Empty disables the
    /// texture check.
    pub texture_resolutions: Vec<f32>,
}

impl Default for LodConfig {
    fn default() -> Self {
        Self {
            max_pixel_error: 5.0,
            z_scale: 1.0,
            max_texture_size: 4096,
            max_projected_texel_size: 1.0,
            texture_resolutions: Vec::new(),
        }
    }
}

/// Background loading and memory settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamingConfig {
    /// Loader threads; 0 derives the count from the CPU.
    pub worker_count: usize,
    /// Queued load requests before new ones are refused.
    pub queue_capacity: usize,
    /// Upper bound on resident payload bytes.
    pub memory_budget_bytes: usize,
    /// New load requests issued per frame.
    pub max_requests_per_frame: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            worker_count: 0,
            queue_capacity: 64,
            memory_budget_bytes: 256 * 1024 * 1024,
            max_requests_per_frame: 32,
        }
    }
}

/// Location of the mesh on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexConfig {
    pub index_path: Option<PathBuf>,
    /// Fragment blob; defaults to the index path with a `.blob` extension.
    pub blob_path: Option<PathBuf>,
}

impl IndexConfig {
    pub fn resolved_blob_path(&self) -> Option<PathBuf> {
        self.blob_path
            .clone()
            .or_else(|| self.index_path.as_ref().map(|p| p.with_extension("blob")))
    }
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log filter, e.g. "info" or "warn,multires_lod=debug".
    pub log_level: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// `<platform config dir>/multires`, if the platform has one.
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("multires"))
}

impl Config {
    fn read(config_path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(config_path).map_err(|source| ConfigError::ReadError {
                path: config_path.to_path_buf(),
                source,
            })?;
        ron::from_str(&contents).map_err(|source| ConfigError::ParseError {
            path: config_path.to_path_buf(),
            source,
        })
    }

    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let config = Self::read(&config_path)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `multires.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);
        let write_error = |source| ConfigError::WriteError {
            path: config_path.clone(),
            source,
        };
        std::fs::create_dir_all(config_dir).map_err(write_error)?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);
        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(write_error)?;
        Ok(())
    }

    /// Re-read the file: `Some(new_config)` if it differs from `self`.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let new_config = Self::read(&config_dir.join(CONFIG_FILE))?;
        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }
}
