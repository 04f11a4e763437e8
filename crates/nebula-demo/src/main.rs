//! Headless fly-over of a planetary surface.
//!
//! Configuration is loaded from `config.ron` and can be overridden via CLI
//! flags. The camera descends from three planet radii to a low orbit while
//! circling the equator, and per-frame tile statistics are logged.
//!
//! When the configured data root has no elevation tree for the body, a
//! synthetic one is generated in a temporary directory.
//!
//! Run with `cargo run -p nebula-demo -- --frames 300 --log-level debug`.

use std::f64::consts::TAU;
use std::path::Path;
use std::time::{Duration, Instant};

use clap::Parser;
use glam::{DMat4, DVec3};
use nebula_config::{CliArgs, Config};
use nebula_elevation::{ELEV_STRIDE, ElevationArchive, ElevationError, ElevationGrid};
use nebula_tilemgr::{LatLngRect, SurfaceManager, SurfaceSettings, TileDraw, TileKey, TileRenderer};

/// Altitude at the end of the descent, in planet radii.
const FINAL_ALTITUDE: f64 = 0.002;

/// Counts what would be submitted to the GPU.
#[derive(Default)]
struct CountingRenderer {
    draws: u64,
    indices: u64,
    masked: u64,
}

impl TileRenderer for CountingRenderer {
    fn draw_tile(&mut self, draw: &TileDraw<'_>) {
        self.draws += 1;
        self.indices += draw.mesh.indices().len() as u64;
        if draw.mask.is_some() {
            self.masked += 1;
        }
    }
}

/// Rolling hills and a ridge band, in meters.
fn synthetic_height(lat: f64, lng: f64) -> i16 {
    let hills = 900.0 * (6.0 * lat).sin() * (5.0 * lng).cos();
    let ridge = 2500.0 * (-(lat - 0.3).powi(2) * 40.0).exp();
    (hills + ridge).round() as i16
}

/// Write level 0 and 1 elevation tiles for `body` below `root`.
fn write_synthetic_terrain(root: &Path, body: &str) -> Result<(), ElevationError> {
    let archive = ElevationArchive::new(root, body);
    for lvl in 0..=1 {
        let level = TileKey::new(lvl, 0, 0);
        for ilat in 0..level.nlat() {
            for ilng in 0..level.nlng() {
                let tile = TileKey::new(lvl, ilat, ilng);
                let (minlat, maxlat) = tile.lat_range();
                let (minlng, maxlng) = tile.lng_range();
                let cells = (ELEV_STRIDE - 3) as f64;
                let grid = ElevationGrid::from_fn(|row, col| {
                    let lat = minlat + (row as f64 - 1.0) / cells * (maxlat - minlat);
                    let lng = minlng + (col as f64 - 1.0) / cells * (maxlng - minlng);
                    synthetic_height(lat, lng)
                });
                archive.write(lvl, ilat, ilng, &grid)?;
            }
        }
    }
    tracing::info!(root = %root.display(), body, "wrote synthetic elevation tiles");
    Ok(())
}

/// Camera position and view-projection at fraction `t` of the flight.
fn camera_at(t: f64, radius: f64, aperture: f64, aspect: f64) -> (DVec3, DMat4) {
    let altitude = radius * (2.0 * (1.0 - t) + FINAL_ALTITUDE);
    let lng = TAU * 0.25 * t;
    let dir = nebula_tilemgr::sphere_dir(0.05, lng);
    let eye = dir * (radius + altitude);
    // look ahead along the orbit, tilted towards the ground
    let ahead = nebula_tilemgr::sphere_dir(0.05, lng + 0.2);
    let target = ahead * radius;
    let view = DMat4::look_at_rh(eye, target, dir);
    let near = (altitude * 0.1).max(1.0);
    let proj = DMat4::perspective_rh(2.0 * aperture, aspect, near, radius * 10.0);
    (eye, proj * view)
}

fn main() {
    let args = CliArgs::parse();

    let config_dir = args
        .config
        .clone()
        .or_else(Config::default_dir)
        .unwrap_or_else(|| Path::new(".").join("nebula-surface"));

    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    nebula_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    let archive = ElevationArchive::new(&config.surface.data_root, &config.surface.body);
    let scratch = if archive.path(0, 0, 0).exists() {
        None
    } else {
        match tempfile::tempdir() {
            Ok(dir) => {
                if let Err(e) = write_synthetic_terrain(dir.path(), &config.surface.body) {
                    tracing::error!(error = %e, "failed to write synthetic terrain");
                    return;
                }
                config.surface.data_root = dir.path().to_path_buf();
                Some(dir)
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to create scratch directory");
                return;
            }
        }
    };

    let settings = SurfaceSettings::from(&config);
    let radius = settings.radius;
    let aperture = settings.aperture;
    let aspect = 16.0 / 9.0;
    let mut manager = SurfaceManager::new(settings);
    let mut renderer = CountingRenderer::default();

    let frames = args.frames.max(1);
    let started = Instant::now();
    for frame in 1..=frames {
        let t = frame as f64 / frames as f64;
        let (eye, view_proj) = camera_at(t, radius, aperture, aspect);
        let prm = manager.frame_params(eye, view_proj, frame);
        let stats = manager.render(&prm, &mut renderer);

        if frame % 60 == 0 || frame == frames {
            tracing::info!(
                frame,
                altitude_km = (eye.length() - radius) / 1000.0,
                tiles = stats.total_tiles(),
                deepest = stats.tiles.len().saturating_sub(1),
                vertices = stats.vertices,
                pending = stats.pending_loads,
                tree = manager.tile_count(),
                "frame"
            );
        }
        // give background loaders a moment, as a real frame would
        if manager.pending_loads() > 0 {
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    let (eye, _) = camera_at(1.0, radius, aperture, aspect);
    let (lat, lng) = ((eye.y / eye.length()).asin(), eye.z.atan2(eye.x));
    if let Some(key) = manager.search_tile(lat, lng, 32, false) {
        tracing::info!(tile = %key, "tile below the camera");
    }
    let rect = LatLngRect {
        latmin: lat - 0.05,
        latmax: lat + 0.05,
        lngmin: lng - 0.05,
        lngmax: lng + 0.05,
    };
    match manager.coverage(&rect, 8, 256) {
        Ok(tiles) => tracing::info!(count = tiles.len(), "coverage around the camera"),
        Err(e) => tracing::warn!(error = %e, "coverage query failed"),
    }

    tracing::info!(
        frames,
        draws = renderer.draws,
        indices = renderer.indices,
        masked = renderer.masked,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "fly-over finished"
    );
    drop(manager);
    drop(scratch);
}
