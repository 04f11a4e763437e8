//! Frustum planes and box tests in tile-local space.

use glam::{DMat4, DVec3, DVec4};

/// Axis-aligned box in a tile's local mesh frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: DVec3,
    pub max: DVec3,
}

impl Aabb {
    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    /// Smallest box containing every point.
    pub fn from_points(points: impl IntoIterator<Item = DVec3>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        Some(iter.fold(Self::new(first, first), |b, p| Self::new(b.min.min(p), b.max.max(p))))
    }

    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }
}

/// Side planes of a clip-space volume with `0 <= z` depth (D3D/wgpu
/// convention). The far plane is ignored: planetary tiles are culled by the
/// horizon test instead.
#[derive(Clone, Debug)]
pub struct Frustum {
    planes: [DVec4; 5],
}

impl Frustum {
    /// Extract planes from a matrix mapping some local frame to clip space.
    /// The planes are expressed in that local frame.
    pub fn from_matrix(m: &DMat4) -> Self {
        let rows = [m.row(0), m.row(1), m.row(2), m.row(3)];
        let mut planes = [
            rows[3] + rows[0],
            rows[3] - rows[0],
            rows[3] + rows[1],
            rows[3] - rows[1],
            rows[2],
        ];
        for plane in &mut planes {
            let len = plane.truncate().length();
            if len > 0.0 {
                *plane /= len;
            }
        }
        Self { planes }
    }

    /// The box is at least partially inside. Conservative near frustum
    /// corners.
    pub fn intersects(&self, aabb: &Aabb) -> bool {
        self.planes.iter().all(|plane| {
            let n = plane.truncate();
            let p = DVec3::new(
                if n.x >= 0.0 { aabb.max.x } else { aabb.min.x },
                if n.y >= 0.0 { aabb.max.y } else { aabb.min.y },
                if n.z >= 0.0 { aabb.max.z } else { aabb.min.z },
            );
            n.dot(p) + plane.w >= 0.0
        })
    }
}
