//! Planet surface tiles: mesh, textures and elevation.
//!
//! Loading a tile is split so that file I/O and resampling never run under
//! the tree lock: [`TileFiles::read`] fetches the tile's own files,
//! [`splice`] resolves inherited textures and snapshots the ancestor
//! elevation slots under the lock, [`MeshJob::build`] derives missing
//! ancestor grids and generates the mesh unlocked, and [`attach`] installs
//! both under the lock again.

use std::sync::Arc;

use glam::DMat4;
use nebula_elevation::{ElevationArchive, ElevationGrid, ElevationView, Interpolation, derive_quadrant};

use crate::frustum::Frustum;
use crate::key::TileKey;
use crate::mesh::TileMesh;
use crate::quadtree::{NodeId, QuadTree};
use crate::texture::{TexCrdRange, TextureHandle, TextureKind, TextureRef, TextureSource};
use crate::tile::{Tile, TileCore, TileState};

/// Levels between a tile and the ancestor whose grid it samples.
pub const ELEVATION_ANCESTOR_DEPTH: usize = 3;

/// What is known about a tile's own elevation grid.
#[derive(Clone, Debug, Default)]
pub enum ElevationSlot {
    /// The file has not been looked for yet.
    #[default]
    Unprobed,
    /// No file for this tile; the grid can be derived from the parent.
    FileMissing,
    /// Nothing available here or above, or the file was malformed.
    Unavailable,
    Present(Arc<ElevationGrid>),
}

impl ElevationSlot {
    pub fn grid(&self) -> Option<&Arc<ElevationGrid>> {
        match self {
            ElevationSlot::Present(grid) => Some(grid),
            _ => None,
        }
    }
}

/// Shared, read-only inputs for loading surface tiles.
pub struct SurfaceEnv {
    /// Planet radius in meters.
    pub radius: f64,
    pub interpolation: Interpolation,
    pub archive: ElevationArchive,
    pub textures: Box<dyn TextureSource>,
    /// Load mask textures for specular water and night lights.
    pub load_masks: bool,
}

impl SurfaceEnv {
    fn probe_elevation(&self, key: TileKey) -> ElevationSlot {
        if self.interpolation == Interpolation::Flat {
            return ElevationSlot::Unavailable;
        }
        match self.archive.read(key.lvl, key.ilat, key.ilng) {
            Ok(Some(grid)) => ElevationSlot::Present(Arc::new(grid)),
            Ok(None) => ElevationSlot::FileMissing,
            Err(e) => {
                tracing::warn!(tile = %key, "ignoring elevation file: {e}");
                ElevationSlot::Unavailable
            }
        }
    }
}

/// A tile of the planet surface.
#[derive(Debug)]
pub struct SurfaceTile {
    pub(crate) core: TileCore,
    pub(crate) mesh: Option<TileMesh>,
    pub(crate) texture: Option<TextureRef>,
    pub(crate) mask: Option<TextureRef>,
    pub(crate) texrange: TexCrdRange,
    pub(crate) elevation: ElevationSlot,
    pub(crate) elev_view: Option<ElevationView>,
}

impl SurfaceTile {
    /// An unloaded tile.
    pub fn new(key: TileKey) -> Self {
        Self {
            core: TileCore::new(key),
            mesh: None,
            texture: None,
            mask: None,
            texrange: TexCrdRange::FULL,
            elevation: ElevationSlot::Unprobed,
            elev_view: None,
        }
    }

    pub fn mesh(&self) -> Option<&TileMesh> {
        self.mesh.as_ref()
    }

    pub fn texture(&self) -> Option<&TextureRef> {
        self.texture.as_ref()
    }

    pub fn mask(&self) -> Option<&TextureRef> {
        self.mask.as_ref()
    }

    pub fn texrange(&self) -> &TexCrdRange {
        &self.texrange
    }

    /// The tile's own grid, serving its great-grandchildren.
    pub fn elevation(&self) -> &ElevationSlot {
        &self.elevation
    }

    /// Samples covering this tile, from its great-grandparent's grid.
    pub fn elevation_view(&self) -> Option<&ElevationView> {
        self.elev_view.as_ref()
    }
}

impl Tile for SurfaceTile {
    fn core(&self) -> &TileCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TileCore {
        &mut self.core
    }

    fn in_view(&self, transform: &DMat4) -> bool {
        let Some(mesh) = &self.mesh else {
            return true;
        };
        if self.core.key.lvl == 0 {
            return true;
        }
        let local = *transform * DMat4::from_translation(mesh.shift());
        Frustum::from_matrix(&local).intersects(mesh.bbox())
    }

    fn has_texture(&self) -> bool {
        self.texture.is_some()
    }

    fn has_own_texture(&self) -> bool {
        self.texture.as_ref().is_some_and(|t| t.owned)
    }
}

/// Files read for one tile outside the tree lock.
#[derive(Debug)]
pub struct TileFiles {
    pub key: TileKey,
    pub texture: Option<TextureHandle>,
    pub mask: Option<TextureHandle>,
    pub elevation: ElevationSlot,
}

impl TileFiles {
    pub fn read(key: TileKey, env: &SurfaceEnv) -> Self {
        let texture = env.textures.load(TextureKind::Surface, key);
        let mask = if env.load_masks && texture.is_some() {
            env.textures.load(TextureKind::Mask, key)
        } else {
            None
        };
        Self {
            key,
            texture,
            mask,
            elevation: env.probe_elevation(key),
        }
    }
}

/// Elevation slots of a tile and its ancestors, captured under the tree
/// lock and resolved without it.
///
/// The chain runs upwards from the tile and ends at the first slot that is
/// already settled (`Present` or `Unavailable`) or at a root.
#[derive(Debug, Default)]
pub struct ElevationChain {
    links: Vec<(NodeId, TileKey, ElevationSlot)>,
}

impl ElevationChain {
    /// Snapshot the slots from `id` upwards. Only clones handles.
    pub fn capture(tree: &QuadTree<SurfaceTile>, id: NodeId) -> Self {
        let mut links = Vec::new();
        let mut cur = Some(id);
        while let Some(node) = cur {
            let Some(tile) = tree.get(node) else {
                break;
            };
            let slot = tile.elevation.clone();
            let settled = matches!(slot, ElevationSlot::Present(_) | ElevationSlot::Unavailable);
            links.push((node, tile.core.key, slot));
            if settled {
                break;
            }
            cur = tree.parent(node);
        }
        Self { links }
    }

    /// Probe unread files and derive grids down to the first link. May read
    /// files and resample; never touches the tree.
    pub fn resolve(&mut self, env: &SurfaceEnv) -> Option<Arc<ElevationGrid>> {
        if env.interpolation == Interpolation::Flat {
            self.links.clear();
            return None;
        }
        let mut top = None;
        for (i, (_, key, slot)) in self.links.iter_mut().enumerate() {
            if matches!(slot, ElevationSlot::Unprobed) {
                *slot = env.probe_elevation(*key);
            }
            if !matches!(slot, ElevationSlot::FileMissing) {
                top = Some(i);
                break;
            }
        }
        // an unsettled root has nothing to derive from
        let top = top.unwrap_or_else(|| self.links.len().saturating_sub(1));
        self.links.truncate(top + 1);

        let (_, _, slot) = self.links.last_mut()?;
        let mut grid = slot.grid().cloned();
        if grid.is_none() {
            *slot = ElevationSlot::Unavailable;
        }
        for (_, key, slot) in self.links.iter_mut().rev().skip(1) {
            grid = grid
                .and_then(|g| derive_quadrant(&g, key.is_south(), key.is_east(), env.interpolation))
                .map(Arc::new);
            *slot = match &grid {
                Some(g) => {
                    tracing::trace!(tile = %key, "derived elevation from parent");
                    ElevationSlot::Present(Arc::clone(g))
                }
                None => ElevationSlot::Unavailable,
            };
        }
        grid
    }

    /// Cache resolved slots in nodes that still exist and have not been
    /// settled meanwhile.
    pub fn store(self, tree: &mut QuadTree<SurfaceTile>) {
        for (node, _, slot) in self.links {
            if matches!(slot, ElevationSlot::Unprobed) {
                continue;
            }
            if let Some(tile) = tree.get_mut(node)
                && !matches!(tile.elevation, ElevationSlot::Present(_) | ElevationSlot::Unavailable)
            {
                tile.elevation = slot;
            }
        }
    }
}

/// Inputs for building one tile's mesh without the tree lock.
#[derive(Debug)]
pub struct MeshJob {
    pub key: TileKey,
    /// Elevation of the great-grandparent and its unresolved ancestors.
    pub elevation: ElevationChain,
    pub texrange: TexCrdRange,
}

/// A built tile waiting to be attached.
#[derive(Debug)]
pub struct LoadedTile {
    pub mesh: TileMesh,
    pub elevation: Option<ElevationView>,
    chain: ElevationChain,
}

impl MeshJob {
    /// Resolve the ancestor elevation and generate the mesh.
    pub fn build(mut self, env: &SurfaceEnv) -> LoadedTile {
        let elevation = self
            .elevation
            .resolve(env)
            .map(|grid| ElevationView::for_descendant(grid, self.key.ilat, self.key.ilng));
        let mesh = TileMesh::build(self.key, elevation.as_ref(), &self.texrange, env.radius);
        LoadedTile {
            mesh,
            elevation,
            chain: self.elevation,
        }
    }
}

/// The grid owned by `id`, reading or deriving it on first use.
///
/// A tile without its own file derives its grid from its parent's, which
/// may in turn be derived, up to the root. The result is cached in the
/// slots along the way.
pub fn elevation_grid(
    tree: &mut QuadTree<SurfaceTile>,
    id: NodeId,
    env: &SurfaceEnv,
) -> Option<Arc<ElevationGrid>> {
    let mut chain = ElevationChain::capture(tree, id);
    let grid = chain.resolve(env);
    chain.store(tree);
    grid
}

/// Make sure `id` has an elevation grid. `false` means the tile renders
/// without elevation, which is not an error.
pub fn ensure_elevation(tree: &mut QuadTree<SurfaceTile>, id: NodeId, env: &SurfaceEnv) -> bool {
    elevation_grid(tree, id, env).is_some()
}

/// Install freshly read files into `id` and resolve what it inherits.
/// Returns `None` if the node has been pruned meanwhile.
pub fn splice(
    tree: &mut QuadTree<SurfaceTile>,
    id: NodeId,
    files: TileFiles,
    env: &SurfaceEnv,
) -> Option<MeshJob> {
    let key = tree.get(id)?.core.key;
    let parent = tree.parent(id).and_then(|p| tree.get(p));

    let (texture, texrange, inherited_mask) = match files.texture {
        Some(handle) => (Some(TextureRef { handle, owned: true }), TexCrdRange::FULL, None),
        None => match parent.and_then(|p| p.texture.as_ref().map(|t| (t, p))) {
            Some((tex, p)) => (
                Some(TextureRef {
                    handle: Arc::clone(&tex.handle),
                    owned: false,
                }),
                p.texrange.sub_range(key),
                p.mask.clone(),
            ),
            None => (None, TexCrdRange::FULL, None),
        },
    };
    let mask = if !env.load_masks {
        None
    } else if texture.as_ref().is_some_and(|t| t.owned) {
        files.mask.map(|handle| TextureRef { handle, owned: true })
    } else {
        inherited_mask.map(|m| TextureRef { owned: false, ..m })
    };

    let tile = tree.get_mut(id)?;
    tile.texture = texture;
    tile.mask = mask;
    tile.texrange = texrange;
    if matches!(tile.elevation, ElevationSlot::Unprobed) {
        tile.elevation = files.elevation;
    }

    let elevation = tree
        .ancestor(id, ELEVATION_ANCESTOR_DEPTH)
        .map(|gg| ElevationChain::capture(tree, gg))
        .unwrap_or_default();
    Some(MeshJob {
        key,
        elevation,
        texrange,
    })
}

/// Install a built tile and cache the elevation resolved for it. Returns
/// `false` if the node has been pruned.
pub fn attach(tree: &mut QuadTree<SurfaceTile>, id: NodeId, loaded: LoadedTile) -> bool {
    let LoadedTile { mesh, elevation, chain } = loaded;
    chain.store(tree);
    let Some(tile) = tree.get_mut(id) else {
        return false;
    };
    tile.core.mean_elev = elevation.as_ref().map_or(0.0, ElevationView::mean);
    tile.elev_view = elevation;
    tile.mesh = Some(mesh);
    tile.core.state = TileState::Invisible;
    tile.core.load_pending = false;
    tile.core.edge_ok = false;
    let key = tile.core.key;
    tile.core.lngnbr_lvl = key.lvl;
    tile.core.latnbr_lvl = key.lvl;
    tile.core.dianbr_lvl = key.lvl;
    tracing::debug!(tile = %key, "tile loaded");
    true
}

/// Read, splice, build and attach in one go, holding `tree` throughout.
pub fn load_tile_sync(tree: &mut QuadTree<SurfaceTile>, id: NodeId, env: &SurfaceEnv) -> bool {
    let Some(key) = tree.get(id).map(Tile::key) else {
        return false;
    };
    let files = TileFiles::read(key, env);
    let Some(job) = splice(tree, id, files, env) else {
        return false;
    };
    attach(tree, id, job.build(env))
}

#[cfg(test)]
pub(crate) mod tests {
    use glam::DVec3;

    use super::*;
    use crate::texture::{FileTextureSource, NoTextures};

    pub(crate) fn env(dir: &std::path::Path, interpolation: Interpolation) -> SurfaceEnv {
        SurfaceEnv {
            radius: 1000.0,
            interpolation,
            archive: ElevationArchive::new(dir, "Test"),
            textures: Box::new(NoTextures),
            load_masks: false,
        }
    }

    pub(crate) fn surface_tree() -> QuadTree<SurfaceTile> {
        QuadTree::new(SurfaceTile::new(TileKey::root(0)), SurfaceTile::new(TileKey::root(1)))
    }

    /// Create (unloaded) nodes down to `key` and return its id.
    pub(crate) fn path_to(tree: &mut QuadTree<SurfaceTile>, key: TileKey) -> NodeId {
        let nlng = key.nlng();
        let ilng = key.ilng.rem_euclid(nlng);
        let mut id = tree.roots()[((ilng >> key.lvl) & 1) as usize];
        for i in (0..key.lvl).rev() {
            let q = (((key.ilat >> i) & 1) * 2 + ((ilng >> i) & 1)) as usize;
            id = match tree.child(id, q) {
                Some(child) => child,
                None => {
                    let child_key = tree.get(id).unwrap().key().child(q);
                    tree.add_child(id, q, SurfaceTile::new(child_key)).unwrap()
                }
            };
        }
        assert_eq!(tree.get(id).unwrap().key(), key);
        id
    }

    #[test]
    fn test_elevation_derived_from_level_four_file() {
        let dir = tempfile::tempdir().unwrap();
        let env = env(dir.path(), Interpolation::Cubic);
        env.archive.write(4, 0, 0, &ElevationGrid::flat(250)).unwrap();

        let mut tree = surface_tree();
        let id = path_to(&mut tree, TileKey::new(7, 3, 5));
        assert!(ensure_elevation(&mut tree, id, &env));

        let grid = tree.get(id).unwrap().elevation().grid().unwrap().clone();
        assert!(grid.samples().iter().all(|&s| s == 250));
        assert_eq!(grid.mean(), 250.0);

        // intermediate levels were cached on the way
        let l5 = tree.ancestor(id, 2).unwrap();
        assert!(tree.get(l5).unwrap().elevation().grid().is_some());
        // the chain stops at the first tile with a file
        let l3 = tree.ancestor(id, 4).unwrap();
        assert!(matches!(tree.get(l3).unwrap().elevation(), ElevationSlot::Unprobed));
    }

    #[test]
    fn test_no_elevation_anywhere_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let env = env(dir.path(), Interpolation::Linear);
        let mut tree = surface_tree();
        let id = path_to(&mut tree, TileKey::new(5, 4, 9));
        assert!(!ensure_elevation(&mut tree, id, &env));
        assert!(matches!(tree.get(id).unwrap().elevation(), ElevationSlot::Unavailable));
        assert!(load_tile_sync(&mut tree, id, &env));
        assert!(tree.get(id).unwrap().elevation_view().is_none());
    }

    #[test]
    fn test_flat_mode_ignores_files() {
        let dir = tempfile::tempdir().unwrap();
        let env = env(dir.path(), Interpolation::Flat);
        env.archive.write(0, 0, 0, &ElevationGrid::flat(10)).unwrap();
        let mut tree = surface_tree();
        let root = tree.roots()[0];
        assert!(!ensure_elevation(&mut tree, root, &env));
    }

    #[test]
    fn test_malformed_file_degrades_to_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let env = env(dir.path(), Interpolation::Cubic);
        let path = env.archive.path(2, 1, 3);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"ELE\x01 short").unwrap();
        let files = TileFiles::read(TileKey::new(2, 1, 3), &env);
        assert!(matches!(files.elevation, ElevationSlot::Unavailable));
    }

    #[test]
    fn test_load_builds_mesh_over_ancestor_elevation() {
        let dir = tempfile::tempdir().unwrap();
        let env = env(dir.path(), Interpolation::Cubic);
        env.archive
            .write(0, 0, 1, &ElevationGrid::flat(40).with_mean(40.0))
            .unwrap();

        let mut tree = surface_tree();
        let key = TileKey::new(3, 2, 13);
        let id = path_to(&mut tree, key);
        assert!(load_tile_sync(&mut tree, id, &env));

        let tile = tree.get(id).unwrap();
        assert_eq!(tile.state(), TileState::Invisible);
        assert!(!tile.core().load_pending);
        assert_eq!(tile.core().mean_elev, 40.0);
        let mesh = tile.mesh().unwrap();
        let r = mesh.planet_position(5, 5).length();
        assert!((r - 1040.0).abs() < 1e-2);
    }

    #[test]
    fn test_splice_leaves_ancestor_derivation_to_the_job() {
        let dir = tempfile::tempdir().unwrap();
        let env = env(dir.path(), Interpolation::Linear);
        env.archive.write(0, 0, 1, &ElevationGrid::flat(60)).unwrap();

        let mut tree = surface_tree();
        let key = TileKey::new(4, 5, 20);
        let id = path_to(&mut tree, key);
        let gg = tree.ancestor(id, ELEVATION_ANCESTOR_DEPTH).unwrap();
        let root = tree.roots()[1];
        assert_eq!(tree.ancestor(gg, 1), Some(root));

        let files = TileFiles::read(key, &env);
        let job = splice(&mut tree, id, files, &env).unwrap();
        // nothing above the tile itself was read or derived under the lock
        assert!(matches!(tree.get(gg).unwrap().elevation(), ElevationSlot::Unprobed));
        assert!(matches!(tree.get(root).unwrap().elevation(), ElevationSlot::Unprobed));
        assert!(tree.get(id).unwrap().elevation_view().is_none());

        let loaded = job.build(&env);
        assert!(loaded.elevation.is_some());
        assert!(attach(&mut tree, id, loaded));

        let derived = tree.get(gg).unwrap().elevation().grid().unwrap().clone();
        assert!(derived.samples().iter().all(|&s| s == 60));
        assert!(tree.get(root).unwrap().elevation().grid().is_some());
        let tile = tree.get(id).unwrap();
        assert_eq!(tile.core().mean_elev, 60.0);
        assert!(tile.elevation_view().is_some());
    }

    #[test]
    fn test_attach_keeps_grids_settled_meanwhile() {
        let dir = tempfile::tempdir().unwrap();
        let env = env(dir.path(), Interpolation::Linear);
        env.archive.write(0, 0, 1, &ElevationGrid::flat(60)).unwrap();

        let mut tree = surface_tree();
        let key = TileKey::new(4, 5, 20);
        let id = path_to(&mut tree, key);
        let gg = tree.ancestor(id, ELEVATION_ANCESTOR_DEPTH).unwrap();
        let job = splice(&mut tree, id, TileFiles::read(key, &env), &env).unwrap();

        let earlier = Arc::new(ElevationGrid::flat(7));
        tree.get_mut(gg).unwrap().elevation = ElevationSlot::Present(Arc::clone(&earlier));
        assert!(attach(&mut tree, id, job.build(&env)));
        let kept = tree.get(gg).unwrap().elevation().grid().unwrap().clone();
        assert!(Arc::ptr_eq(&kept, &earlier));
    }

    #[test]
    fn test_children_inherit_parent_texture_and_mask() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileTextureSource::new(dir.path(), "Test");
        let parent_key = TileKey::new(1, 0, 0);
        for kind in [TextureKind::Surface, TextureKind::Mask] {
            let path = source.path(kind, parent_key);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, b"DDS ").unwrap();
        }
        let env = SurfaceEnv {
            textures: Box::new(source),
            load_masks: true,
            ..env(dir.path(), Interpolation::Flat)
        };

        let mut tree = surface_tree();
        let parent = path_to(&mut tree, parent_key);
        assert!(load_tile_sync(&mut tree, parent, &env));
        assert!(tree.get(parent).unwrap().has_own_texture());
        assert!(tree.get(parent).unwrap().mask().unwrap().owned);

        let child_key = parent_key.child(3);
        let child = path_to(&mut tree, child_key);
        assert!(load_tile_sync(&mut tree, child, &env));
        let tile = tree.get(child).unwrap();
        assert!(tile.has_texture());
        assert!(!tile.has_own_texture());
        assert!(!tile.mask().unwrap().owned);
        assert_eq!(*tile.texrange(), TexCrdRange::FULL.sub_range(child_key));
        let uv = tile.mesh().unwrap().vertices()[0].uv;
        assert_eq!(uv, [0.5, 1.0]);
    }

    #[test]
    fn test_pruned_node_is_not_attached() {
        let dir = tempfile::tempdir().unwrap();
        let env = env(dir.path(), Interpolation::Flat);
        let mut tree = surface_tree();
        let root = tree.roots()[1];
        let child = path_to(&mut tree, TileKey::new(1, 0, 2));
        let files = TileFiles::read(TileKey::new(1, 0, 2), &env);
        let job = splice(&mut tree, child, files, &env).unwrap();
        tree.del_children(root);
        assert!(!attach(&mut tree, child, job.build(&env)));
    }

    #[test]
    fn test_in_view_culls_tiles_behind_camera() {
        let dir = tempfile::tempdir().unwrap();
        let env = env(dir.path(), Interpolation::Flat);
        let mut tree = surface_tree();
        let key = TileKey::new(5, 10, 20);
        let id = path_to(&mut tree, key);
        let tile = tree.get(id).unwrap();
        assert!(tile.in_view(&DMat4::ZERO), "unloaded tiles are never culled");

        assert!(load_tile_sync(&mut tree, id, &env));
        let tile = tree.get(id).unwrap();
        let center = key.center_dir();
        let eye = center * 2000.0;
        let proj = DMat4::perspective_rh(0.8, 1.0, 1.0, 1e5);
        let facing = proj * DMat4::look_at_rh(eye, DVec3::ZERO, DVec3::Y);
        let away = proj * DMat4::look_at_rh(eye, center * 3000.0, DVec3::Y);
        assert!(tile.in_view(&facing));
        assert!(!tile.in_view(&away));
    }
}
