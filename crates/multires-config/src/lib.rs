//! Configuration for multiresolution mesh extraction.
//!
//! Settings persist to disk as RON and tolerate missing or unknown fields, so
//! files written by older or newer versions keep loading. Command-line
//! arguments override the loaded values.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{Config, DebugConfig, IndexConfig, LodConfig, StreamingConfig, default_config_dir};
pub use error::ConfigError;
