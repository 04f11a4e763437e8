//! Tile patch meshes.
//!
//! Each tile is a `PATCH_RES x PATCH_RES` grid of quads over its latitude
//! and longitude extents, displaced radially by the tile's elevation view.
//! Vertex `(row, col)` sits at index `row * (PATCH_RES + 1) + col`; row 0 is
//! the southern edge and column 0 the western edge.
//!
//! Tiles from level 4 down are built relative to a shift vector (the tile
//! centre on the reference sphere) to keep `f32` positions precise.

use glam::{DVec3, Vec3};
use nebula_elevation::{ElevationView, PATCH_RES};

use crate::frustum::Aabb;
use crate::key::{TileKey, sphere_dir};
use crate::texture::TexCrdRange;

/// Vertices along one side of a patch.
pub const PATCH_VERTS: usize = PATCH_RES + 1;

/// Levels from which meshes are built relative to the tile centre.
pub const SHIFT_ORIGIN_LEVEL: u32 = 4;

/// A single patch vertex, laid out for direct GPU upload.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct TileVertex {
    /// Position relative to the mesh origin, meters.
    pub pos: [f32; 3],
    /// Unit surface normal.
    pub normal: [f32; 3],
    /// Texture coordinates within the tile's texture range.
    pub uv: [f32; 2],
}

static_assertions::assert_eq_size!(TileVertex, [u8; 32]);

impl TileVertex {
    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.pos)
    }

    /// Set position and normal to a blend of `a` (`w = 0`) and `b`
    /// (`w = 1`). Texture coordinates are kept.
    pub fn interpolate(&mut self, a: &TileVertex, b: &TileVertex, w: f32) {
        let w0 = 1.0 - w;
        for k in 0..3 {
            self.pos[k] = a.pos[k] * w0 + b.pos[k] * w;
            self.normal[k] = a.normal[k] * w0 + b.normal[k] * w;
        }
    }
}

/// Vertex and index buffers of one tile, plus the pristine copies of the
/// two edges facing away from the parent's centre.
#[derive(Clone, Debug)]
pub struct TileMesh {
    vertices: Vec<TileVertex>,
    indices: Vec<u32>,
    lng_edge: Vec<TileVertex>,
    lat_edge: Vec<TileVertex>,
    shift: DVec3,
    bbox: Aabb,
    version: u64,
}

/// Index of vertex `(row, col)`.
pub const fn vertex_index(row: usize, col: usize) -> usize {
    row * PATCH_VERTS + col
}

/// Column of the outer longitude edge: east for odd `ilng`.
pub const fn lng_edge_col(key: TileKey) -> usize {
    if key.is_east() { PATCH_RES } else { 0 }
}

/// Row of the outer latitude edge: south for odd `ilat`.
pub const fn lat_edge_row(key: TileKey) -> usize {
    if key.is_south() { 0 } else { PATCH_RES }
}

impl TileMesh {
    /// Build the patch for `key` on a sphere of `radius` meters.
    ///
    /// Without an elevation view the patch lies on the bare sphere.
    pub fn build(key: TileKey, elev: Option<&ElevationView>, texrange: &TexCrdRange, radius: f64) -> Self {
        let (minlat, maxlat) = key.lat_range();
        let (minlng, maxlng) = key.lng_range();
        let dlat = (maxlat - minlat) / PATCH_RES as f64;
        let dlng = (maxlng - minlng) / PATCH_RES as f64;
        let shift = if key.lvl >= SHIFT_ORIGIN_LEVEL {
            key.center_dir() * radius
        } else {
            DVec3::ZERO
        };

        let du = (texrange.tumax - texrange.tumin) / PATCH_RES as f32;
        let dv = (texrange.tvmax - texrange.tvmin) / PATCH_RES as f32;

        let mut vertices = Vec::with_capacity(PATCH_VERTS * PATCH_VERTS);
        for row in 0..PATCH_VERTS {
            let lat = minlat + row as f64 * dlat;
            for col in 0..PATCH_VERTS {
                let lng = minlng + col as f64 * dlng;
                let dir = sphere_dir(lat, lng);
                let e = elev.map_or(0.0, |v| v.sample(row, col) as f64);
                let pos = dir * (radius + e) - shift;
                let normal = match elev {
                    Some(v) => surface_normal(v, row, col, lat, lng, radius * dlat, radius * dlng),
                    None => dir,
                };
                vertices.push(TileVertex {
                    pos: pos.as_vec3().to_array(),
                    normal: normal.as_vec3().to_array(),
                    uv: [
                        texrange.tumin + du * col as f32,
                        texrange.tvmax - dv * row as f32,
                    ],
                });
            }
        }

        let mut indices = Vec::with_capacity(PATCH_RES * PATCH_RES * 6);
        for row in 0..PATCH_RES {
            for col in 0..PATCH_RES {
                let a = vertex_index(row, col) as u32;
                let b = a + 1;
                let c = a + PATCH_VERTS as u32;
                let d = c + 1;
                // counter-clockwise seen from outside the sphere
                indices.extend_from_slice(&[a, c, b, b, c, d]);
            }
        }

        let ecol = lng_edge_col(key);
        let erow = lat_edge_row(key);
        let lng_edge = (0..PATCH_VERTS).map(|row| vertices[vertex_index(row, ecol)]).collect();
        let lat_edge = (0..PATCH_VERTS).map(|col| vertices[vertex_index(erow, col)]).collect();

        let mut mesh = Self {
            vertices,
            indices,
            lng_edge,
            lat_edge,
            shift,
            bbox: Aabb::new(DVec3::ZERO, DVec3::ZERO),
            version: 0,
        };
        mesh.update_bbox();
        mesh
    }

    fn update_bbox(&mut self) {
        if let Some(bbox) = Aabb::from_points(self.vertices.iter().map(|v| v.position().as_dvec3())) {
            self.bbox = bbox;
        }
    }

    pub fn vertices(&self) -> &[TileVertex] {
        &self.vertices
    }

    pub(crate) fn vertices_mut(&mut self) -> &mut [TileVertex] {
        &mut self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Outer longitude edge as generated, south to north.
    pub fn lng_edge(&self) -> &[TileVertex] {
        &self.lng_edge
    }

    /// Outer latitude edge as generated, west to east.
    pub fn lat_edge(&self) -> &[TileVertex] {
        &self.lat_edge
    }

    /// Offset of the mesh origin from the planet centre.
    pub fn shift(&self) -> DVec3 {
        self.shift
    }

    /// Bounding box in the mesh frame.
    pub fn bbox(&self) -> &Aabb {
        &self.bbox
    }

    /// Bumped whenever vertex data changes and must be re-uploaded.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Planet-frame position of vertex `(row, col)`.
    pub fn planet_position(&self, row: usize, col: usize) -> DVec3 {
        self.vertices[vertex_index(row, col)].position().as_dvec3() + self.shift
    }

    /// Commit edited vertices: refresh the bounding box and bump the version.
    pub fn map_vertices(&mut self) {
        self.update_bbox();
        self.version += 1;
    }
}

/// Normal from central differences of the padded elevation samples.
fn surface_normal(
    elev: &ElevationView,
    row: usize,
    col: usize,
    lat: f64,
    lng: f64,
    dy: f64,
    dx_equator: f64,
) -> DVec3 {
    let (r, c) = (row as isize, col as isize);
    let s = |dr: isize, dc: isize| elev.sample_padded(r + dr, c + dc) as f64;

    let (slat, clat) = lat.sin_cos();
    let (slng, clng) = lng.sin_cos();
    let up = DVec3::new(clat * clng, slat, clat * slng);
    let north = DVec3::new(-slat * clng, clat, -slat * slng);
    let east = DVec3::new(-slng, 0.0, clng);

    let dedn = (s(1, 0) - s(-1, 0)) / (2.0 * dy);
    let dx = dx_equator * clat;
    let dede = if dx > 1e-6 * dy {
        (s(0, 1) - s(0, -1)) / (2.0 * dx)
    } else {
        0.0
    };
    (up - north * dedn - east * dede).normalize()
}
