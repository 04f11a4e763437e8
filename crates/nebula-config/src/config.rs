//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level surface engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Planetary surface and tile loading settings.
    pub surface: SurfaceConfig,
    /// Camera settings that feed the per-frame render parameters.
    pub camera: CameraConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// How elevation samples are derived for tiles without their own file.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ElevationMode {
    /// No elevation; tiles lie on the bare sphere.
    Flat,
    /// Integer averages of enclosing ancestor samples.
    Linear,
    /// Cubic estimate from four ancestor samples per axis.
    #[default]
    Cubic,
}

/// Surface configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SurfaceConfig {
    /// Celestial body name, used as the directory below `data_root`.
    pub body: String,
    /// Root directory of the `Surf`, `Mask` and `Elev` tile trees.
    pub data_root: PathBuf,
    /// Planet mean radius in meters.
    pub radius_m: f64,
    /// Deepest tile level the selector may subdivide to.
    pub max_level: u32,
    /// Elevation interpolation for inherited tiles.
    pub elevation_mode: ElevationMode,
    /// Resolution bias (2 to 6). Higher values refine more aggressively.
    pub resolution_bias: f64,
    /// Multiplier on the apparent tile size used for level selection.
    pub resolution_scale: f64,
    /// Frames a tile may go unrendered before its subtree is pruned.
    pub staleness_frames: u64,
    /// Load tiles on background worker threads.
    pub async_loading: bool,
    /// Loader worker threads (0 = derive from the CPU count).
    pub loader_threads: usize,
    /// Render specular reflections on masked water surfaces.
    pub specular: bool,
    /// Render night-side city lights from mask textures.
    pub night_lights: bool,
    /// Brightness of night lights (0.0 - 1.0).
    pub light_factor: f32,
}

/// Camera configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CameraConfig {
    /// Vertical half-aperture in degrees.
    pub aperture_deg: f64,
    /// Viewport height in pixels.
    pub viewport_height: u32,
    /// Environment-map rendering is active: culled subtrees are retained.
    pub env_map: bool,
    /// Custom (secondary) cameras are active: culled subtrees are retained.
    pub custom_cameras: bool,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Freeze the tile tree: no subdivision, pruning or loading.
    pub freeze: bool,
}

// --- Default implementations ---

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            body: "Earth".to_string(),
            data_root: PathBuf::from("Textures"),
            radius_m: 6_371_000.0,
            max_level: 14,
            elevation_mode: ElevationMode::Cubic,
            resolution_bias: 4.0,
            resolution_scale: 1.0,
            staleness_frames: 64,
            async_loading: true,
            loader_threads: 0,
            specular: true,
            night_lights: true,
            light_factor: 0.5,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            aperture_deg: 25.0,
            viewport_height: 720,
            env_map: false,
            custom_cameras: false,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            freeze: false,
        }
    }
}

const CONFIG_FILE: &str = "config.ron";

// --- Load / Save / Reload ---

impl Config {
    /// Platform config directory for the surface engine, if one exists.
    pub fn default_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("nebula-surface"))
    }

    /// Load `config.ron` from `config_dir`, writing the defaults there first
    /// if the file does not exist yet.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let path = config_dir.join(CONFIG_FILE);
        if !path.exists() {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Wrote default surface config to {}", path.display());
            return Ok(config);
        }
        let config = Self::read_file(&path)?;
        log::info!("Loaded surface config from {}", path.display());
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = ron::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config to `config_dir/config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        let path = config_dir.join(CONFIG_FILE);
        let write_err = |source| ConfigError::Write {
            path: path.clone(),
            source,
        };
        std::fs::create_dir_all(config_dir).map_err(write_err)?;
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(2)
            .enumerate_arrays(false);
        let text = ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::Serialize)?;
        std::fs::write(&path, text).map_err(write_err)
    }

    /// Re-read the file. `Some` if it differs from `self`.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let fresh = Self::read_file(&config_dir.join(CONFIG_FILE))?;
        if fresh == *self {
            return Ok(None);
        }
        log::info!("Surface config changed on disk");
        Ok(Some(fresh))
    }

    /// Reject values the tile manager cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.surface;
        if s.radius_m.is_nan() || s.radius_m <= 0.0 {
            return Err(invalid("surface.radius_m", format!("{} is not positive", s.radius_m)));
        }
        if !(2.0..=6.0).contains(&s.resolution_bias) {
            return Err(invalid(
                "surface.resolution_bias",
                format!("{} is outside 2..=6", s.resolution_bias),
            ));
        }
        if s.resolution_scale.is_nan() || s.resolution_scale <= 0.0 {
            return Err(invalid(
                "surface.resolution_scale",
                format!("{} is not positive", s.resolution_scale),
            ));
        }
        if !(0.0..=1.0).contains(&s.light_factor) {
            return Err(invalid("surface.light_factor", format!("{} is outside 0..=1", s.light_factor)));
        }
        let ap = self.camera.aperture_deg;
        if ap.is_nan() || ap <= 0.0 || ap >= 90.0 {
            return Err(invalid("camera.aperture_deg", format!("{ap} is outside (0, 90)")));
        }
        if self.camera.viewport_height == 0 {
            return Err(invalid("camera.viewport_height", "must be nonzero".to_string()));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: String) -> ConfigError {
    ConfigError::Invalid { field, reason }
}
