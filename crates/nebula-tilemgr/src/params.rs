//! Per-frame render parameters and statistics.

use glam::{DMat4, DVec3};

/// Default resolution bias.
pub const DEFAULT_RESOLUTION_BIAS: f64 = 4.0;

/// Viewport height, in pixels, at which a resolution scale applies
/// unchanged.
pub const REFERENCE_VIEWPORT_HEIGHT: u32 = 720;

/// Default number of frames a tile may go unrendered before its subtree is
/// pruned.
pub const DEFAULT_STALENESS_FRAMES: u64 = 64;

/// Snapshot of the camera and planet state for one frame, supplied by the
/// planet-level renderer.
#[derive(Clone, Debug)]
pub struct RenderParams {
    /// Unit direction from the planet centre to the camera, planet frame.
    pub cdir: DVec3,
    /// Camera distance from the planet centre in planet radii.
    pub cdist: f64,
    /// Angular radius (from the planet centre) of the visible cap.
    pub viewap: f64,
    /// Unit direction from the planet centre to the sun, planet frame.
    pub sdir: DVec3,
    /// Camera view-projection matrix.
    pub view_proj: DMat4,
    /// Planet frame to world transform.
    pub planet_world: DMat4,
    /// Deepest level the selector may subdivide to.
    pub max_level: u32,
    /// Tangent of the camera's vertical half-aperture.
    pub tan_ap: f64,
    /// Multiplier on apparent tile size.
    pub resolution_scale: f64,
    /// Resolution bias (2 to 6).
    pub resolution_bias: f64,
    /// Monotonic frame counter.
    pub frame_id: u64,
    /// This is the main scene pass (not an environment map or secondary
    /// camera).
    pub main_pass: bool,
    /// Keep subtrees of tiles outside this camera's frustum, because other
    /// views may still see them.
    pub keep_offscreen: bool,
    /// Cloud shadows are drawn as a flat layer and need no per-tile pass.
    pub flat_cloud_shadows: bool,
}

impl RenderParams {
    /// Parameters for a camera at `camera_pos` (planet frame, meters) above a
    /// planet of `radius` meters.
    pub fn for_camera(camera_pos: DVec3, radius: f64, view_proj: DMat4, aperture: f64) -> Self {
        let dist = camera_pos.length();
        let cdist = dist / radius;
        Self {
            cdir: camera_pos.try_normalize().unwrap_or(DVec3::Y),
            cdist,
            viewap: horizon_aperture(cdist),
            sdir: DVec3::X,
            view_proj,
            planet_world: DMat4::IDENTITY,
            max_level: 14,
            tan_ap: aperture.tan(),
            resolution_scale: 1.0,
            resolution_bias: DEFAULT_RESOLUTION_BIAS,
            frame_id: 0,
            main_pass: true,
            keep_offscreen: false,
            flat_cloud_shadows: false,
        }
    }

    /// Planet frame to clip space.
    pub fn clip_transform(&self) -> DMat4 {
        self.view_proj * self.planet_world
    }
}

/// Angular radius of the cap visible from `cdist` planet radii. Zero at or
/// below the surface.
pub fn horizon_aperture(cdist: f64) -> f64 {
    if cdist > 1.0 { (1.0 / cdist).acos() } else { 0.0 }
}

/// Resolution scale for a viewport `viewport_height` pixels tall. A taller
/// viewport shows each tile over more pixels, so tiles count as larger.
pub fn viewport_resolution_scale(scale: f64, viewport_height: u32) -> f64 {
    scale * f64::from(REFERENCE_VIEWPORT_HEIGHT) / f64::from(viewport_height.max(1))
}

/// Everything the selector needs for one pass besides the tree.
#[derive(Clone, Copy, Debug)]
pub struct FrameContext<'a> {
    pub prm: &'a RenderParams,
    /// Planet radius in meters.
    pub radius: f64,
    pub staleness_frames: u64,
}

impl<'a> FrameContext<'a> {
    pub fn new(prm: &'a RenderParams, radius: f64) -> Self {
        Self {
            prm,
            radius,
            staleness_frames: DEFAULT_STALENESS_FRAMES,
        }
    }
}

/// Counters gathered while drawing one frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Tiles drawn per level.
    pub tiles: Vec<u32>,
    /// Vertices submitted.
    pub vertices: u64,
    /// Loads queued or running at the end of the frame.
    pub pending_loads: u64,
}

impl FrameStats {
    pub fn record_tile(&mut self, lvl: u32, vertices: usize) {
        let lvl = lvl as usize;
        if self.tiles.len() <= lvl {
            self.tiles.resize(lvl + 1, 0);
        }
        self.tiles[lvl] += 1;
        self.vertices += vertices as u64;
    }

    pub fn total_tiles(&self) -> u32 {
        self.tiles.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_horizon_aperture() {
        assert_eq!(horizon_aperture(1.0), 0.0);
        assert_eq!(horizon_aperture(0.5), 0.0);
        assert!((horizon_aperture(2.0) - std::f64::consts::FRAC_PI_3).abs() < 1e-12);
    }

    #[test]
    fn test_viewport_resolution_scale() {
        assert_eq!(viewport_resolution_scale(1.0, REFERENCE_VIEWPORT_HEIGHT), 1.0);
        assert_eq!(viewport_resolution_scale(1.0, 1440), 0.5);
        assert_eq!(viewport_resolution_scale(2.0, 360), 8.0);
        // a zero height is treated as one pixel
        assert!(viewport_resolution_scale(1.0, 0).is_finite());
    }

    #[test]
    fn test_for_camera() {
        let prm = RenderParams::for_camera(DVec3::new(0.0, 0.0, 3000.0), 1000.0, DMat4::IDENTITY, 0.5);
        assert_eq!(prm.cdir, DVec3::Z);
        assert!((prm.cdist - 3.0).abs() < 1e-12);
        assert!((prm.viewap - (1.0f64 / 3.0).acos()).abs() < 1e-12);
        assert!((prm.tan_ap - 0.5f64.tan()).abs() < 1e-12);
    }

    #[test]
    fn test_stats_grow_per_level() {
        let mut stats = FrameStats::default();
        stats.record_tile(3, 1089);
        stats.record_tile(3, 1089);
        stats.record_tile(0, 1089);
        assert_eq!(stats.tiles, vec![1, 0, 0, 2]);
        assert_eq!(stats.total_tiles(), 3);
        assert_eq!(stats.vertices, 3 * 1089);
    }
}
