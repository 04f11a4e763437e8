//! Per-frame level-of-detail selection.
//!
//! [`process_node`] walks the tree from a root, culling tiles beyond the
//! horizon or outside the frustum, choosing a target level from the tile's
//! distance to the camera, and subdividing where the target is deeper than
//! the tile. A tile only hands over to its children once all four are
//! loaded; until then it renders itself.

use std::f64::consts::{FRAC_PI_2, SQRT_2};

use crate::key::TileKey;
use crate::params::FrameContext;
use crate::quadtree::{NodeId, QuadTree};
use crate::tile::{Tile, TileState};

/// Resolution falloff with the logarithm of apparent tile size.
pub const RES_SCALE: f64 = 1.1;

/// Angular radius of a level-0 tile's bounding cap.
const RAD0: f64 = SQRT_2 * FRAC_PI_2;

/// Creates and loads tiles on behalf of the selector.
pub trait ChildLoader<T: Tile> {
    /// Attach a new child of `parent` in `quadrant` and load it, either now
    /// or in the background.
    fn load_child(&mut self, tree: &mut QuadTree<T>, parent: NodeId, quadrant: usize) -> Option<NodeId>;

    /// Request loading of an existing child that is still `Invalid`.
    fn reload(&mut self, tree: &mut QuadTree<T>, node: NodeId);

    /// Nodes that were just removed from the tree.
    fn pruned(&mut self, removed: &[NodeId]) {
        let _ = removed;
    }
}

/// Angular radius of a tile's bounding cap at `key`'s level.
pub fn tile_radius(key: TileKey) -> f64 {
    RAD0 / key.nlat() as f64
}

/// Level the selector wants at this tile, before clamping by the caller's
/// current level. `adist` is the angle between the camera direction and the
/// nearest tile edge (negative when the camera is above the tile).
pub fn target_level(key: TileKey, mean_elev: f64, adist: f64, ctx: &FrameContext<'_>) -> i32 {
    let prm = ctx.prm;
    let nlat = key.nlat();
    let mut bias = prm.resolution_bias;
    // lower resolution towards the poles
    if key.ilat < nlat / 6 || key.ilat >= nlat - nlat / 6 {
        bias -= 1.0;
        if key.ilat < nlat / 12 || key.ilat >= nlat - nlat / 12 {
            bias -= 1.0;
        }
    }

    let erad = 1.0 + mean_elev / ctx.radius;
    let tdist = if adist < 0.0 {
        prm.cdist - erad
    } else {
        let h = erad * adist.sin();
        let a = prm.cdist - erad * adist.cos();
        a.hypot(h)
    };

    if prm.viewap > 0.0 {
        bias -= 2.0 * (adist.max(0.0) / prm.viewap).sqrt();
    }

    let maxlvl = prm.max_level as i32;
    let apr = tdist * prm.tan_ap * prm.resolution_scale;
    if apr < 1e-6 {
        maxlvl
    } else {
        ((bias - apr.ln() * RES_SCALE) as i32).clamp(0, maxlvl)
    }
}

fn prune<T: Tile, L: ChildLoader<T>>(tree: &mut QuadTree<T>, id: NodeId, loader: &mut L) {
    let removed = tree.del_children(id);
    if !removed.is_empty() {
        if let Some(tile) = tree.get(id) {
            tracing::debug!(tile = %tile.key(), removed = removed.len(), "pruned subtree");
        }
        loader.pruned(&removed);
    }
}

fn set_state<T: Tile>(tree: &mut QuadTree<T>, id: NodeId, state: TileState) {
    if let Some(tile) = tree.get_mut(id) {
        tile.core_mut().state = state;
    }
}

/// Update the subtree at `id` for this frame.
///
/// Afterwards every visited tile is `ForRender` (draw it), `Active` (draw
/// its children) or `Invisible` (culled). Children of culled tiles are
/// deleted, except level 0 which is never culled and tiles outside the
/// frustum while other views need them.
pub fn process_node<T: Tile, L: ChildLoader<T>>(
    tree: &mut QuadTree<T>,
    id: NodeId,
    ctx: &FrameContext<'_>,
    loader: &mut L,
) {
    let prm = ctx.prm;
    let Some(tile) = tree.get_mut(id) else {
        return;
    };
    let core = tile.core_mut();
    core.state = TileState::ForRender;
    core.edge_ok = false;
    let key = core.key;
    let center = core.center;
    let mean_elev = core.mean_elev;
    let last_drawn = core.frame_id;

    let mut step_down = true;

    // horizon test, skipped at or below the surface
    let alpha = prm.cdir.dot(center).clamp(-1.0, 1.0).acos();
    let adist = alpha - tile_radius(key);
    if prm.viewap > 0.0 && adist >= prm.viewap {
        if key.lvl == 0 {
            step_down = false;
        } else {
            prune(tree, id, loader);
            set_state(tree, id, TileState::Invisible);
            return;
        }
    }

    // frustum test
    let in_view = tree.get(id).is_some_and(|t| t.in_view(&prm.clip_transform()));
    if !in_view {
        if key.lvl == 0 {
            step_down = false;
        } else {
            if !prm.keep_offscreen {
                prune(tree, id, loader);
            }
            set_state(tree, id, TileState::Invisible);
            return;
        }
    }

    if step_down {
        step_down = (key.lvl as i32) < target_level(key, mean_elev, adist, ctx);
    }

    if step_down {
        let mut complete = true;
        for quadrant in 0..4 {
            let child = match tree.child(id, quadrant) {
                Some(child) => {
                    if tree.get(child).is_some_and(|t| t.state() == TileState::Invalid) {
                        loader.reload(tree, child);
                    }
                    Some(child)
                }
                None => loader.load_child(tree, id, quadrant),
            };
            let valid = child
                .and_then(|c| tree.get(c))
                .is_some_and(|t| t.state().is_valid());
            if !valid {
                complete = false;
            }
        }
        if complete {
            set_state(tree, id, TileState::Active);
            for child in tree.children(id).into_iter().flatten() {
                process_node(tree, child, ctx, loader);
            }
            return;
        }
    } else if prm.main_pass && prm.frame_id.saturating_sub(last_drawn) > ctx.staleness_frames {
        prune(tree, id, loader);
    }
}
