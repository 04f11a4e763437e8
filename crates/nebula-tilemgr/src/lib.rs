//! Quadtree level-of-detail manager for planetary surface tiles.
//!
//! The planet is split into two level-0 tiles (western and eastern
//! hemisphere), each refined by a quadtree. Every frame
//! [`SurfaceManager::render`] walks the tree, decides per tile whether to
//! cull, draw or subdivide it, requests missing children from a
//! background loader, stitches shared edges between tiles of different
//! levels and hands the resulting meshes to a [`TileRenderer`].

mod frustum;
mod key;
mod loader;
mod manager;
mod mesh;
mod params;
mod quadtree;
mod query;
mod selector;
mod stitch;
mod surface_tile;
mod texture;
mod tile;

pub use frustum::{Aabb, Frustum};
pub use key::{TileKey, sphere_dir};
pub use loader::{LOAD_QUEUE_CAPACITY, LoadMode, SharedTree, TileLoader, lock_tree};
pub use manager::{ShadingFlags, SurfaceManager, SurfaceSettings, TileDraw, TileRenderer, shading_flags};
pub use mesh::{PATCH_VERTS, SHIFT_ORIGIN_LEVEL, TileMesh, TileVertex, lat_edge_row, lng_edge_col, vertex_index};
pub use params::{
    DEFAULT_RESOLUTION_BIAS, DEFAULT_STALENESS_FRAMES, FrameContext, FrameStats, REFERENCE_VIEWPORT_HEIGHT, RenderParams,
    horizon_aperture, viewport_resolution_scale,
};
pub use quadtree::{NodeId, QuadTree};
pub use query::{LatLngRect, TileQueryError, coverage, query_tiles, search_tile};
pub use selector::{ChildLoader, RES_SCALE, process_node, target_level, tile_radius};
pub use stitch::{
    EdgeNeighbour, MAX_STITCH_LEVEL_DIFF, fix_corner, fix_latitude_boundary, fix_longitude_boundary, match_edges,
};
pub use surface_tile::{
    ELEVATION_ANCESTOR_DEPTH, ElevationChain, ElevationSlot, LoadedTile, MeshJob, SurfaceEnv, SurfaceTile, TileFiles,
    attach, elevation_grid, ensure_elevation, load_tile_sync, splice,
};
pub use texture::{FileTextureSource, NoTextures, TexCrdRange, Texture, TextureHandle, TextureKind, TextureRef, TextureSource};
pub use tile::{Tile, TileCore, TileState};

pub use nebula_elevation::PATCH_RES;
