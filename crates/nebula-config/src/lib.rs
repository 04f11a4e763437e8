//! Configuration for the planetary surface engine.
//!
//! Settings persist to disk as RON files and can be overridden from the
//! command line via clap. Unknown or missing fields fall back to defaults so
//! older and newer config files keep loading.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{CameraConfig, Config, DebugConfig, ElevationMode, SurfaceConfig};
pub use error::ConfigError;
