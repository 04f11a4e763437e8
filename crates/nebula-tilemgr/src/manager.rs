//! The surface manager: owns the tile tree and drives a frame.
//!
//! Each frame the render thread locks the tree, updates it with
//! [`process_node`], then walks it again to stitch and draw every tile
//! marked for rendering. Loader threads only take the lock briefly to
//! splice finished loads.

use std::f64::consts::FRAC_PI_2;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use glam::{DMat4, DVec3};
use nebula_config::{Config, ElevationMode};
use nebula_elevation::{ElevationArchive, Interpolation};

use crate::key::TileKey;
use crate::loader::{LoadMode, SharedTree, TileLoader, lock_tree};
use crate::mesh::TileMesh;
use crate::params::{FrameContext, FrameStats, RenderParams, viewport_resolution_scale};
use crate::quadtree::{NodeId, QuadTree};
use crate::query::{self, LatLngRect, TileQueryError};
use crate::selector::{process_node, tile_radius};
use crate::stitch::match_edges;
use crate::surface_tile::{SurfaceEnv, SurfaceTile, load_tile_sync};
use crate::texture::{FileTextureSource, TexCrdRange, TextureHandle, TextureSource};
use crate::tile::{Tile, TileState};

/// Sun angle beyond which night lights are drawn.
const NIGHT_LIGHTS_MIN_SUN_ANGLE: f64 = 1.45;

/// Manager settings, usually taken from [`Config`].
#[derive(Clone, Debug, PartialEq)]
pub struct SurfaceSettings {
    pub body: String,
    /// Directory holding `<body>/Surf`, `<body>/Mask` and `<body>/Elev`.
    pub data_root: PathBuf,
    /// Planet radius in meters.
    pub radius: f64,
    pub max_level: u32,
    pub interpolation: Interpolation,
    pub resolution_bias: f64,
    pub resolution_scale: f64,
    pub staleness_frames: u64,
    pub load_mode: LoadMode,
    pub specular: bool,
    pub night_lights: bool,
    pub light_factor: f32,
    /// Camera half-aperture in radians.
    pub aperture: f64,
    /// Other views (environment maps, extra cameras) may need tiles outside
    /// the main camera's frustum.
    pub keep_offscreen: bool,
    pub freeze: bool,
}

impl From<&Config> for SurfaceSettings {
    fn from(config: &Config) -> Self {
        let s = &config.surface;
        let interpolation = match s.elevation_mode {
            ElevationMode::Flat => Interpolation::Flat,
            ElevationMode::Linear => Interpolation::Linear,
            ElevationMode::Cubic => Interpolation::Cubic,
        };
        let load_mode = if s.async_loading {
            LoadMode::Async {
                threads: s.loader_threads,
            }
        } else {
            LoadMode::Sync
        };
        Self {
            body: s.body.clone(),
            data_root: s.data_root.clone(),
            radius: s.radius_m,
            max_level: s.max_level,
            interpolation,
            resolution_bias: s.resolution_bias,
            resolution_scale: viewport_resolution_scale(s.resolution_scale, config.camera.viewport_height),
            staleness_frames: s.staleness_frames,
            load_mode,
            specular: s.specular,
            night_lights: s.night_lights,
            light_factor: s.light_factor,
            aperture: config.camera.aperture_deg.to_radians(),
            keep_offscreen: config.camera.env_map || config.camera.custom_cameras,
            freeze: config.debug.freeze,
        }
    }
}

impl Default for SurfaceSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// Per-tile shading switches for the renderer.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ShadingFlags {
    /// Water specular reflection from the mask.
    pub specular: bool,
    pub cloud_shadows: bool,
    /// Night lights from the mask.
    pub lights: bool,
    /// Night light intensity, zero when lights are off.
    pub night_factor: f32,
}

/// Everything needed to draw one tile.
#[derive(Debug)]
pub struct TileDraw<'a> {
    pub key: TileKey,
    pub mesh: &'a TileMesh,
    pub texture: Option<&'a TextureHandle>,
    pub mask: Option<&'a TextureHandle>,
    pub texrange: TexCrdRange,
    pub flags: ShadingFlags,
    /// Mesh frame to world.
    pub world: DMat4,
}

/// Backend that draws tiles.
pub trait TileRenderer {
    fn draw_tile(&mut self, draw: &TileDraw<'_>);
}

/// Shading switches for a tile given the sun direction.
pub fn shading_flags(key: TileKey, has_mask: bool, prm: &RenderParams, settings: &SurfaceSettings) -> ShadingFlags {
    let mut flags = ShadingFlags {
        lights: settings.night_lights,
        ..Default::default()
    };
    if has_mask {
        let sdist = prm.sdir.dot(key.center_dir()).clamp(-1.0, 1.0).acos();
        let rad = tile_radius(key) * 0.5;
        let lit = sdist < FRAC_PI_2 + rad;
        flags.specular = settings.specular && lit;
        flags.cloud_shadows = lit && !prm.flat_cloud_shadows;
        flags.lights = flags.lights && sdist > NIGHT_LIGHTS_MIN_SUN_ANGLE;
    }
    if flags.lights {
        flags.night_factor = settings.light_factor;
    }
    flags
}

/// Level-of-detail tile manager for one planet surface.
pub struct SurfaceManager {
    settings: SurfaceSettings,
    tree: SharedTree,
    loader: TileLoader,
}

impl SurfaceManager {
    /// Manager reading textures and elevation from `settings.data_root`.
    pub fn new(settings: SurfaceSettings) -> Self {
        let textures = FileTextureSource::new(&settings.data_root, &settings.body);
        Self::with_textures(settings, Box::new(textures))
    }

    /// Manager with a custom texture source. Both roots are loaded before
    /// returning.
    pub fn with_textures(settings: SurfaceSettings, textures: Box<dyn TextureSource>) -> Self {
        let env = Arc::new(SurfaceEnv {
            radius: settings.radius,
            interpolation: settings.interpolation,
            archive: ElevationArchive::new(&settings.data_root, &settings.body),
            textures,
            load_masks: settings.specular || settings.night_lights,
        });

        let mut tree = QuadTree::new(SurfaceTile::new(TileKey::root(0)), SurfaceTile::new(TileKey::root(1)));
        for root in tree.roots() {
            load_tile_sync(&mut tree, root, &env);
        }
        let tree = Arc::new(Mutex::new(tree));
        let loader = TileLoader::new(&tree, env, settings.load_mode);

        tracing::info!(
            body = %settings.body,
            max_level = settings.max_level,
            async_loading = loader.is_async(),
            "surface manager ready"
        );
        Self { settings, tree, loader }
    }

    pub fn settings(&self) -> &SurfaceSettings {
        &self.settings
    }

    /// Shared handle to the tile tree.
    pub fn tree(&self) -> &SharedTree {
        &self.tree
    }

    /// Stop (or resume) updating the tree; rendering continues.
    pub fn set_freeze(&mut self, freeze: bool) {
        if freeze != self.settings.freeze {
            tracing::info!(freeze, "surface tree freeze toggled");
        }
        self.settings.freeze = freeze;
    }

    pub fn is_frozen(&self) -> bool {
        self.settings.freeze
    }

    /// Frame parameters for a camera at `camera_pos` (planet frame, meters)
    /// with the manager's resolution settings.
    pub fn frame_params(&self, camera_pos: DVec3, view_proj: DMat4, frame_id: u64) -> RenderParams {
        RenderParams {
            max_level: self.settings.max_level,
            resolution_bias: self.settings.resolution_bias,
            resolution_scale: self.settings.resolution_scale,
            keep_offscreen: self.settings.keep_offscreen,
            frame_id,
            ..RenderParams::for_camera(camera_pos, self.settings.radius, view_proj, self.settings.aperture)
        }
    }

    /// Update the tree for `prm` and draw it.
    pub fn render(&mut self, prm: &RenderParams, renderer: &mut dyn TileRenderer) -> FrameStats {
        let ctx = FrameContext {
            prm,
            radius: self.settings.radius,
            staleness_frames: self.settings.staleness_frames,
        };
        let mut stats = FrameStats::default();
        {
            let mut tree = lock_tree(&self.tree);
            if !self.settings.freeze {
                for root in tree.roots() {
                    process_node(&mut tree, root, &ctx, &mut self.loader);
                }
            }
            for root in tree.roots() {
                render_node(&mut tree, root, &ctx, &self.settings, renderer, &mut stats);
            }
        }
        stats.pending_loads = self.loader.pending();
        tracing::trace!(tiles = stats.total_tiles(), vertices = stats.vertices, "surface frame");
        stats
    }

    /// Keys of the tiles drawn in the last frame.
    pub fn query_tiles(&self) -> Vec<TileKey> {
        let tree = lock_tree(&self.tree);
        keys(&tree, query::query_tiles(&tree))
    }

    /// Textured tiles up to `max_level` covering `rect`.
    pub fn coverage(&self, rect: &LatLngRect, max_level: u32, limit: usize) -> Result<Vec<TileKey>, TileQueryError> {
        let tree = lock_tree(&self.tree);
        let ids = query::coverage(&tree, rect, max_level, limit)?;
        Ok(keys(&tree, ids))
    }

    /// Deepest loaded tile up to `max_level` containing the point.
    pub fn search_tile(&self, lat: f64, lng: f64, max_level: u32, own_texture: bool) -> Option<TileKey> {
        let tree = lock_tree(&self.tree);
        query::search_tile(&tree, lat, lng, max_level, own_texture)
            .and_then(|id| tree.get(id))
            .map(Tile::key)
    }

    /// Nodes in the tree, loaded or not.
    pub fn tile_count(&self) -> usize {
        lock_tree(&self.tree).len()
    }

    pub fn pending_loads(&self) -> u64 {
        self.loader.pending()
    }
}

fn keys(tree: &QuadTree<SurfaceTile>, ids: Vec<NodeId>) -> Vec<TileKey> {
    ids.into_iter().filter_map(|id| tree.get(id)).map(Tile::key).collect()
}

fn render_node(
    tree: &mut QuadTree<SurfaceTile>,
    id: NodeId,
    ctx: &FrameContext<'_>,
    settings: &SurfaceSettings,
    renderer: &mut dyn TileRenderer,
    stats: &mut FrameStats,
) {
    let Some(state) = tree.get(id).map(Tile::state) else {
        return;
    };
    match state {
        TileState::ForRender => {
            match_edges(tree, id, ctx.radius);
            let Some(tile) = tree.get_mut(id) else {
                return;
            };
            tile.core.frame_id = ctx.prm.frame_id;
            let tile = &*tile;
            let Some(mesh) = tile.mesh() else {
                return;
            };
            let key = tile.key();
            let draw = TileDraw {
                key,
                mesh,
                texture: tile.texture().map(|t| &t.handle),
                mask: tile.mask().map(|t| &t.handle),
                texrange: *tile.texrange(),
                flags: shading_flags(key, tile.mask().is_some(), ctx.prm, settings),
                world: ctx.prm.planet_world * DMat4::from_translation(mesh.shift()),
            };
            renderer.draw_tile(&draw);
            stats.record_tile(key.lvl, mesh.vertex_count());
        }
        TileState::Active => {
            for child in tree.children(id).into_iter().flatten() {
                if tree.get(child).is_some_and(|t| t.state().is_active()) {
                    render_node(tree, child, ctx, settings, renderer, stats);
                }
            }
        }
        TileState::Invalid | TileState::Invisible => {}
    }
}
