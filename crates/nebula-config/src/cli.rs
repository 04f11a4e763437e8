//! Command-line argument parsing for the surface demo.

use std::path::PathBuf;

use clap::Parser;

use crate::{Config, ElevationMode};

/// Surface engine command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "nebula-surface", about = "Nebula planetary surface tile engine")]
pub struct CliArgs {
    /// Celestial body name.
    #[arg(long)]
    pub body: Option<String>,

    /// Root directory of the surface tile trees.
    #[arg(long)]
    pub data_root: Option<PathBuf>,

    /// Maximum tile level.
    #[arg(long)]
    pub max_level: Option<u32>,

    /// Elevation interpolation (flat, linear, cubic).
    #[arg(long, value_parser = parse_elevation_mode)]
    pub elevation: Option<ElevationMode>,

    /// Load tiles on background threads.
    #[arg(long)]
    pub async_loading: Option<bool>,

    /// Number of frames to simulate.
    #[arg(long, default_value_t = 600)]
    pub frames: u64,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

fn parse_elevation_mode(s: &str) -> Result<ElevationMode, String> {
    match s.to_ascii_lowercase().as_str() {
        "flat" | "none" => Ok(ElevationMode::Flat),
        "linear" => Ok(ElevationMode::Linear),
        "cubic" => Ok(ElevationMode::Cubic),
        other => Err(format!("unknown elevation mode '{other}'")),
    }
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref body) = args.body {
            self.surface.body = body.clone();
        }
        if let Some(ref root) = args.data_root {
            self.surface.data_root = root.clone();
        }
        if let Some(lvl) = args.max_level {
            self.surface.max_level = lvl;
        }
        if let Some(mode) = args.elevation {
            self.surface.elevation_mode = mode;
        }
        if let Some(async_loading) = args.async_loading {
            self.surface.async_loading = async_loading;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
