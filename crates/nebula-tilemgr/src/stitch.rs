//! Crack removal between tiles of different levels.
//!
//! A tile only ever adjusts the two edges and the corner facing away from
//! its parent's centre; the other two edges border siblings at the same
//! level. Vertices on an edge shared with a coarser neighbour are scaled
//! radially to the neighbour's elevation and the vertices between them are
//! interpolated, so the fine edge lies on the coarse one.

use std::ops::RangeInclusive;

use glam::DVec3;
use nebula_elevation::{ElevationView, PATCH_RES};

use crate::mesh::{TileMesh, TileVertex, lat_edge_row, lng_edge_col, vertex_index};
use crate::quadtree::{NodeId, QuadTree};
use crate::surface_tile::SurfaceTile;
use crate::tile::Tile;

/// Deepest level difference the interleaved edge sampling supports.
pub const MAX_STITCH_LEVEL_DIFF: u32 = 5;

/// What the stitcher needs to know about a neighbour tile.
#[derive(Clone, Debug)]
pub struct EdgeNeighbour {
    pub lvl: u32,
    pub has_mesh: bool,
    pub elev: Option<ElevationView>,
}

impl EdgeNeighbour {
    pub fn snapshot(tree: &QuadTree<SurfaceTile>, id: Option<NodeId>) -> Option<Self> {
        let tile = tree.get(id?)?;
        Some(Self {
            lvl: tile.key().lvl,
            has_mesh: tile.mesh.is_some(),
            elev: tile.elev_view.clone(),
        })
    }
}

fn rescale(pos: [f32; 3], shift: DVec3, radfac: f64) -> [f32; 3] {
    let p = DVec3::from_array(pos.map(f64::from));
    (p * radfac + shift * (radfac - 1.0)).as_vec3().to_array()
}

fn radius_factor(radius: f64, nbr_elev: i16, own_elev: i16) -> f64 {
    (radius + nbr_elev as f64) / (radius + own_elev as f64)
}

/// Move the outer corner vertex to the diagonal neighbour's corner
/// elevation. Needs elevation on both tiles.
pub fn fix_corner(tile: &mut SurfaceTile, nbr: Option<&EdgeNeighbour>, radius: f64) {
    let key = tile.core.key;
    let (Some(mesh), Some(elev)) = (tile.mesh.as_mut(), tile.elev_view.as_ref()) else {
        return;
    };
    let Some(nbr_elev) = nbr.and_then(|n| n.elev.as_ref()) else {
        return;
    };
    let row = lat_edge_row(key);
    let col = lng_edge_col(key);
    let store = mesh.lng_edge()[row];
    let radfac = radius_factor(
        radius,
        nbr_elev.sample(PATCH_RES - row, PATCH_RES - col),
        elev.sample(row, col),
    );
    let shift = mesh.shift();
    mesh.vertices_mut()[vertex_index(row, col)].pos = rescale(store.pos, shift, radfac);
}

/// Rewrite the outer longitude edge against `nbr`: restore it for a
/// same-level neighbour, conform it to a coarser one. With `keep_corner`
/// the outer corner vertex is left alone.
pub fn fix_longitude_boundary(
    tile: &mut SurfaceTile,
    nbr: Option<&EdgeNeighbour>,
    keep_corner: bool,
    radius: f64,
) {
    let key = tile.core.key;
    let Some(nbr) = nbr.filter(|n| n.has_mesh) else {
        return;
    };
    let Some(mesh) = tile.mesh.as_mut() else {
        return;
    };
    let col = lng_edge_col(key);
    let nbr_lvl = nbr.lvl.min(key.lvl);

    if nbr_lvl == key.lvl {
        let (mut i0, mut i1) = (0, PATCH_RES);
        if keep_corner {
            if key.is_south() {
                i0 += 1;
            } else {
                i1 -= 1;
            }
        }
        for i in i0..=i1 {
            let v = mesh.lng_edge()[i];
            mesh.vertices_mut()[vertex_index(i, col)] = v;
        }
        return;
    }

    let dlvl = key.lvl - nbr_lvl;
    if dlvl > MAX_STITCH_LEVEL_DIFF {
        return;
    }
    let (Some(elev), Some(nbr_elev)) = (tile.elev_view.as_ref(), nbr.elev.as_ref()) else {
        return;
    };
    let nsub = 1usize << dlvl;
    let nbr_range = PATCH_RES / nsub;
    let subidx = (key.ilat & (nsub as i32 - 1)) as usize;
    let nbr_row0 = (nsub - 1 - subidx) * nbr_range;
    let nbr_col = PATCH_RES - col;

    let (mut i0, mut i1) = (0, nbr_range);
    if keep_corner {
        if key.is_south() {
            i0 += 1;
        } else {
            i1 -= 1;
        }
    }
    let store = mesh.lng_edge().to_vec();
    conform_edge(mesh, &store, i0..=i1, radius, |i| {
        let row = i * nsub;
        (
            vertex_index(row, col),
            row,
            nbr_elev.sample(nbr_row0 + i, nbr_col),
            elev.sample(row, col),
        )
    });
    for i in 0..nbr_range {
        let a = mesh.vertices()[vertex_index(i * nsub, col)];
        let b = mesh.vertices()[vertex_index((i + 1) * nsub, col)];
        for j in 1..nsub {
            let w = j as f32 / nsub as f32;
            mesh.vertices_mut()[vertex_index(i * nsub + j, col)].interpolate(&a, &b, w);
        }
    }
}

/// Rewrite the outer latitude edge against `nbr`; see
/// [`fix_longitude_boundary`].
pub fn fix_latitude_boundary(
    tile: &mut SurfaceTile,
    nbr: Option<&EdgeNeighbour>,
    keep_corner: bool,
    radius: f64,
) {
    let key = tile.core.key;
    let Some(nbr) = nbr.filter(|n| n.has_mesh) else {
        return;
    };
    let Some(mesh) = tile.mesh.as_mut() else {
        return;
    };
    let row = lat_edge_row(key);
    let nbr_lvl = nbr.lvl.min(key.lvl);

    if nbr_lvl == key.lvl {
        let (mut i0, mut i1) = (0, PATCH_RES);
        if keep_corner {
            if key.is_east() {
                i1 -= 1;
            } else {
                i0 += 1;
            }
        }
        for i in i0..=i1 {
            let v = mesh.lat_edge()[i];
            mesh.vertices_mut()[vertex_index(row, i)] = v;
        }
        return;
    }

    let dlvl = key.lvl - nbr_lvl;
    if dlvl > MAX_STITCH_LEVEL_DIFF {
        return;
    }
    let (Some(elev), Some(nbr_elev)) = (tile.elev_view.as_ref(), nbr.elev.as_ref()) else {
        return;
    };
    let nsub = 1usize << dlvl;
    let nbr_range = PATCH_RES / nsub;
    let subidx = (key.ilng & (nsub as i32 - 1)) as usize;
    let nbr_col0 = subidx * nbr_range;
    let nbr_row = PATCH_RES - row;

    let (mut i0, mut i1) = (0, nbr_range);
    if keep_corner {
        if key.is_east() {
            i1 -= 1;
        } else {
            i0 += 1;
        }
    }
    let store = mesh.lat_edge().to_vec();
    conform_edge(mesh, &store, i0..=i1, radius, |i| {
        let col = i * nsub;
        (
            vertex_index(row, col),
            col,
            nbr_elev.sample(nbr_row, nbr_col0 + i),
            elev.sample(row, col),
        )
    });
    for i in 0..nbr_range {
        let a = mesh.vertices()[vertex_index(row, i * nsub)];
        let b = mesh.vertices()[vertex_index(row, (i + 1) * nsub)];
        for j in 1..nsub {
            let w = j as f32 / nsub as f32;
            mesh.vertices_mut()[vertex_index(row, i * nsub + j)].interpolate(&a, &b, w);
        }
    }
}

/// Scale the vertices shared with a coarser neighbour. `sample(i)` yields
/// the vertex index, the index into the stored edge, and the neighbour and
/// own elevations there.
fn conform_edge(
    mesh: &mut TileMesh,
    store: &[TileVertex],
    range: RangeInclusive<usize>,
    radius: f64,
    sample: impl Fn(usize) -> (usize, usize, i16, i16),
) {
    let shift = mesh.shift();
    for i in range {
        let (idx, along, nbr_e, own_e) = sample(i);
        let radfac = radius_factor(radius, nbr_e, own_e);
        mesh.vertices_mut()[idx].pos = rescale(store[along].pos, shift, radfac);
    }
}

/// Remove cracks between `id` and its neighbours, at most once per frame.
///
/// Neighbours coarser than the tile are matched first, since their edges
/// are what this tile conforms to. Vertex data is only rewritten when a
/// neighbour's level differs from the one the edges were last matched
/// against.
pub fn match_edges(tree: &mut QuadTree<SurfaceTile>, id: NodeId, radius: f64) {
    let Some(tile) = tree.get_mut(id) else {
        return;
    };
    if tile.core.edge_ok {
        return;
    }
    tile.core.edge_ok = true;
    if tile.mesh.is_none() {
        return;
    }
    let key = tile.core.key;
    let dlat = if key.is_south() { 1 } else { -1 };
    let dlng = if key.is_east() { 1 } else { -1 };

    let find = |tree: &QuadTree<SurfaceTile>, ilat: i32, ilng: i32| {
        tree.find_node(key.lvl, ilat, ilng)
            .filter(|&n| tree.get(n).is_some_and(|t| t.state().is_valid()))
    };
    let lngnbr = find(tree, key.ilat, key.ilng + dlng);
    let latnbr = find(tree, key.ilat + dlat, key.ilng);
    let dianbr = find(tree, key.ilat + dlat, key.ilng + dlng);

    let level = |tree: &QuadTree<SurfaceTile>, n: Option<NodeId>| {
        n.and_then(|n| tree.get(n)).map_or(key.lvl, |t| t.key().lvl)
    };
    let lng_lvl = level(tree, lngnbr);
    let lat_lvl = level(tree, latnbr);
    let dia_lvl = level(tree, dianbr);

    let mut nbr_updated = false;
    if let Some(n) = lngnbr.filter(|_| lng_lvl < key.lvl) {
        match_edges(tree, n, radius);
        nbr_updated = true;
    }
    if let Some(n) = latnbr.filter(|_| lat_lvl < key.lvl) {
        match_edges(tree, n, radius);
        nbr_updated = true;
    }
    if !nbr_updated && let Some(n) = dianbr.filter(|_| dia_lvl < key.lvl) {
        // a coarser diagonal neighbour owns the corner elevation
        match_edges(tree, n, radius);
    }

    let lng = EdgeNeighbour::snapshot(tree, lngnbr);
    let lat = EdgeNeighbour::snapshot(tree, latnbr);
    let dia = EdgeNeighbour::snapshot(tree, dianbr);

    let Some(tile) = tree.get_mut(id) else {
        return;
    };
    let core = &tile.core;
    let changed = lng_lvl != core.lngnbr_lvl || lat_lvl != core.latnbr_lvl || dia_lvl != core.dianbr_lvl;
    if !changed {
        return;
    }

    if dia_lvl < lng_lvl && dia_lvl < lat_lvl {
        fix_corner(tile, dia.as_ref(), radius);
        fix_latitude_boundary(tile, lat.as_ref(), true, radius);
        fix_longitude_boundary(tile, lng.as_ref(), true, radius);
    } else if lat_lvl < lng_lvl {
        fix_latitude_boundary(tile, lat.as_ref(), false, radius);
        fix_longitude_boundary(tile, lng.as_ref(), true, radius);
    } else {
        fix_longitude_boundary(tile, lng.as_ref(), false, radius);
        fix_latitude_boundary(tile, lat.as_ref(), true, radius);
    }
    if let Some(mesh) = tile.mesh.as_mut() {
        mesh.map_vertices();
    }
    tile.core.lngnbr_lvl = lng_lvl;
    tile.core.latnbr_lvl = lat_lvl;
    tile.core.dianbr_lvl = dia_lvl;
    tracing::trace!(tile = %key, lng_lvl, lat_lvl, dia_lvl, "edges matched");
}

#[cfg(test)]
mod tests {
    use nebula_elevation::{ElevationGrid, Interpolation};

    use super::*;
    use crate::key::TileKey;
    use crate::surface_tile::tests::{env, surface_tree};
    use crate::surface_tile::{SurfaceEnv, load_tile_sync};
    use crate::tile::TileState;

    const P: usize = PATCH_RES;

    fn terrain() -> ElevationGrid {
        ElevationGrid::from_fn(|r, c| {
            ((r as f64 * 0.05).sin() * 200.0 + (c as f64 * 0.031).cos() * 150.0) as i16
        })
    }

    fn subdivide(tree: &mut QuadTree<SurfaceTile>, env: &SurfaceEnv, id: NodeId) -> [NodeId; 4] {
        let key = tree.get(id).unwrap().key();
        tree.get_mut(id).unwrap().core.state = TileState::Active;
        [0, 1, 2, 3].map(|q| {
            let child = tree.add_child(id, q, SurfaceTile::new(key.child(q))).unwrap();
            assert!(load_tile_sync(tree, child, env));
            tree.get_mut(child).unwrap().core.state = TileState::ForRender;
            child
        })
    }

    /// Both hemispheres rendered at level 3 over varied terrain.
    fn scene() -> (tempfile::TempDir, SurfaceEnv, QuadTree<SurfaceTile>) {
        let dir = tempfile::tempdir().unwrap();
        let env = env(dir.path(), Interpolation::Cubic);
        env.archive.write(0, 0, 0, &terrain()).unwrap();
        env.archive.write(0, 0, 1, &terrain()).unwrap();

        let mut tree = surface_tree();
        let mut frontier = tree.roots().to_vec();
        for &root in &frontier {
            assert!(load_tile_sync(&mut tree, root, &env));
        }
        for _ in 0..3 {
            let mut next = Vec::new();
            for id in frontier {
                next.extend(subdivide(&mut tree, &env, id));
            }
            frontier = next;
        }
        (dir, env, tree)
    }

    fn node(tree: &QuadTree<SurfaceTile>, key: TileKey) -> NodeId {
        let id = tree.find_node(key.lvl, key.ilat, key.ilng).unwrap();
        assert_eq!(tree.get(id).unwrap().key(), key);
        id
    }

    fn mesh(tree: &QuadTree<SurfaceTile>, id: NodeId) -> &TileMesh {
        tree.get(id).unwrap().mesh().unwrap()
    }

    fn new_frame(tree: &mut QuadTree<SurfaceTile>) {
        let ids: Vec<_> = tree.iter().map(|(id, _)| id).collect();
        for id in ids {
            tree.get_mut(id).unwrap().core.edge_ok = false;
        }
    }

    #[test]
    fn test_fine_edge_lies_on_coarse_edge() {
        let (_dir, env, mut tree) = scene();
        let parent = node(&tree, TileKey::new(3, 2, 9));
        subdivide(&mut tree, &env, parent);
        // south-east child: outer edges face (3,2,10) and (3,3,9)
        let fine = node(&tree, TileKey::new(4, 5, 19));
        match_edges(&mut tree, fine, env.radius);

        let coarse = node(&tree, TileKey::new(3, 2, 10));
        let (fm, cm) = (mesh(&tree, fine), mesh(&tree, coarse));
        for i in 0..=P / 2 {
            let d = fm.planet_position(2 * i, P) - cm.planet_position(i, 0);
            assert!(d.length() < 1e-2, "row {i}: {}", d.length());
        }
        for i in 0..P / 2 {
            let mid = (cm.planet_position(i, 0) + cm.planet_position(i + 1, 0)) * 0.5;
            let d = fm.planet_position(2 * i + 1, P) - mid;
            assert!(d.length() < 1e-2, "mid {i}: {}", d.length());
        }

        // southern edge against the eastern half of (3,3,9)'s northern edge
        let south = node(&tree, TileKey::new(3, 3, 9));
        let sm = mesh(&tree, south);
        for i in 0..=P / 2 {
            let d = fm.planet_position(0, 2 * i) - sm.planet_position(P, P / 2 + i);
            assert!(d.length() < 1e-2, "col {i}: {}", d.length());
        }

        let t = tree.get(fine).unwrap();
        assert_eq!((t.core.lngnbr_lvl, t.core.latnbr_lvl, t.core.dianbr_lvl), (3, 3, 3));
    }

    #[test]
    fn test_matching_is_idempotent() {
        let (_dir, env, mut tree) = scene();
        let parent = node(&tree, TileKey::new(3, 2, 9));
        subdivide(&mut tree, &env, parent);
        let fine = node(&tree, TileKey::new(4, 5, 19));

        match_edges(&mut tree, fine, env.radius);
        let first: Vec<u8> = bytemuck::cast_slice(mesh(&tree, fine).vertices()).to_vec();
        let version = mesh(&tree, fine).version();

        match_edges(&mut tree, fine, env.radius);
        new_frame(&mut tree);
        match_edges(&mut tree, fine, env.radius);
        let second: &[u8] = bytemuck::cast_slice(mesh(&tree, fine).vertices());
        assert_eq!(first.as_slice(), second);
        assert_eq!(mesh(&tree, fine).version(), version);
    }

    #[test]
    fn test_same_level_neighbours_share_edges() {
        let (_dir, env, mut tree) = scene();
        for key in [TileKey::new(3, 2, 9), TileKey::new(3, 2, 10)] {
            let id = node(&tree, key);
            subdivide(&mut tree, &env, id);
        }
        let west = node(&tree, TileKey::new(4, 5, 19));
        let east = node(&tree, TileKey::new(4, 5, 20));
        match_edges(&mut tree, west, env.radius);
        match_edges(&mut tree, east, env.radius);

        let (wm, em) = (mesh(&tree, west), mesh(&tree, east));
        for row in 0..=P {
            let d = wm.planet_position(row, P) - em.planet_position(row, 0);
            assert!(d.length() < 1e-3, "row {row}: {}", d.length());
        }
    }

    #[test]
    fn test_refined_neighbour_restores_own_edge() {
        let (_dir, env, mut tree) = scene();
        let parent = node(&tree, TileKey::new(3, 2, 9));
        subdivide(&mut tree, &env, parent);
        let fine = node(&tree, TileKey::new(4, 5, 19));
        let pristine = mesh(&tree, fine).vertices().to_vec();

        match_edges(&mut tree, fine, env.radius);
        assert_ne!(mesh(&tree, fine).vertices(), pristine.as_slice());

        let coarse = node(&tree, TileKey::new(3, 2, 10));
        subdivide(&mut tree, &env, coarse);
        new_frame(&mut tree);
        match_edges(&mut tree, fine, env.radius);

        let fm = mesh(&tree, fine);
        // the southern corner still belongs to the coarse latitude neighbour
        for row in 1..=P {
            assert_eq!(fm.vertices()[vertex_index(row, P)], pristine[vertex_index(row, P)]);
        }
        assert_eq!(tree.get(fine).unwrap().core.lngnbr_lvl, 4);
    }

    #[test]
    fn test_missing_neighbours_leave_mesh_untouched() {
        let (_dir, env, mut tree) = scene();
        let id = node(&tree, TileKey::new(3, 1, 4));
        let tile = tree.get_mut(id).unwrap();
        let before = tile.mesh().unwrap().vertices().to_vec();
        fix_corner(tile, None, env.radius);
        fix_longitude_boundary(tile, None, false, env.radius);
        fix_latitude_boundary(tile, None, false, env.radius);
        assert_eq!(tile.mesh().unwrap().vertices(), before.as_slice());
    }
}
