//! Tile state shared by every tile type stored in the quadtree.

use glam::{DMat4, DVec3};

use crate::key::TileKey;

/// Per-frame lifecycle of a tile.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TileState {
    /// Created but not yet loaded; has no geometry.
    #[default]
    Invalid,
    /// Loaded but not drawn this frame (culled, or not yet visited).
    Invisible,
    /// Loaded and subdivided: its four children are drawn instead.
    Active,
    /// Loaded and drawn at its own resolution.
    ForRender,
}

impl TileState {
    /// Data is loaded and usable.
    pub fn is_valid(self) -> bool {
        self != TileState::Invalid
    }

    /// The tile takes part in this frame's rendered cover, either directly
    /// or through its children.
    pub fn is_active(self) -> bool {
        matches!(self, TileState::Active | TileState::ForRender)
    }
}

/// Bookkeeping common to all tiles.
#[derive(Clone, Debug)]
pub struct TileCore {
    pub key: TileKey,
    pub state: TileState,
    /// Unit vector through the tile centre.
    pub center: DVec3,
    /// Frame in which the tile was last drawn.
    pub frame_id: u64,
    /// Edges already matched against neighbours this frame.
    pub edge_ok: bool,
    /// Neighbour levels the mesh edges were last matched against.
    pub lngnbr_lvl: u32,
    pub latnbr_lvl: u32,
    pub dianbr_lvl: u32,
    /// Mean elevation of the footprint in meters.
    pub mean_elev: f64,
    /// A load request is queued or running.
    pub load_pending: bool,
}

impl TileCore {
    pub fn new(key: TileKey) -> Self {
        Self {
            key,
            state: TileState::Invalid,
            center: key.center_dir(),
            frame_id: 0,
            edge_ok: false,
            lngnbr_lvl: key.lvl,
            latnbr_lvl: key.lvl,
            dianbr_lvl: key.lvl,
            mean_elev: 0.0,
            load_pending: false,
        }
    }
}

/// Behaviour the generic quadtree algorithms need from a tile.
pub trait Tile {
    fn core(&self) -> &TileCore;

    fn core_mut(&mut self) -> &mut TileCore;

    /// Whether the tile's bounding box intersects the view frustum.
    /// `transform` maps planet-frame coordinates to clip space.
    fn in_view(&self, transform: &DMat4) -> bool;

    /// Tile carries a surface texture, own or inherited.
    fn has_texture(&self) -> bool {
        false
    }

    /// Tile carries a surface texture loaded for its own key.
    fn has_own_texture(&self) -> bool {
        false
    }

    fn key(&self) -> TileKey {
        self.core().key
    }

    fn state(&self) -> TileState {
        self.core().state
    }
}
