//! Tile addressing on the latitude/longitude quadtree.

use std::f64::consts::{FRAC_PI_2, PI, TAU};
use std::fmt;

use glam::DVec3;

/// Address of one tile: subdivision level plus latitude and longitude band
/// indices.
///
/// Level `lvl` has `1 << lvl` latitude bands, numbered from the north pole
/// southward, and `2 << lvl` longitude bands, numbered eastward from -180°.
/// The two level-0 tiles are the western and eastern hemispheres.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub lvl: u32,
    pub ilat: i32,
    pub ilng: i32,
}

impl TileKey {
    pub const fn new(lvl: u32, ilat: i32, ilng: i32) -> Self {
        Self { lvl, ilat, ilng }
    }

    /// Level-0 hemisphere tile (`0` = west, `1` = east).
    pub const fn root(index: i32) -> Self {
        Self::new(0, 0, index)
    }

    /// Latitude bands at this level.
    pub const fn nlat(self) -> i32 {
        1 << self.lvl
    }

    /// Longitude bands at this level.
    pub const fn nlng(self) -> i32 {
        2 << self.lvl
    }

    /// Child in `quadrant` (0 = NW, 1 = NE, 2 = SW, 3 = SE).
    pub const fn child(self, quadrant: usize) -> Self {
        Self::new(
            self.lvl + 1,
            self.ilat * 2 + (quadrant / 2) as i32,
            self.ilng * 2 + (quadrant % 2) as i32,
        )
    }

    pub const fn parent(self) -> Option<Self> {
        if self.lvl == 0 {
            None
        } else {
            Some(Self::new(self.lvl - 1, self.ilat >> 1, self.ilng >> 1))
        }
    }

    /// Quadrant this tile occupies within its parent.
    pub const fn quadrant(self) -> usize {
        ((self.ilat & 1) * 2 + (self.ilng & 1)) as usize
    }

    /// The tile lies in the southern half of its parent.
    pub const fn is_south(self) -> bool {
        self.ilat & 1 == 1
    }

    /// The tile lies in the eastern half of its parent.
    pub const fn is_east(self) -> bool {
        self.ilng & 1 == 1
    }

    /// `(minlat, maxlat)` in radians.
    pub fn lat_range(self) -> (f64, f64) {
        let dlat = PI / self.nlat() as f64;
        let maxlat = FRAC_PI_2 - self.ilat as f64 * dlat;
        (maxlat - dlat, maxlat)
    }

    /// `(minlng, maxlng)` in radians.
    pub fn lng_range(self) -> (f64, f64) {
        let dlng = TAU / self.nlng() as f64;
        let minlng = -PI + self.ilng as f64 * dlng;
        (minlng, minlng + dlng)
    }

    /// Unit vector through the tile centre in the planet frame.
    pub fn center_dir(self) -> DVec3 {
        let (minlat, maxlat) = self.lat_range();
        let (minlng, maxlng) = self.lng_range();
        sphere_dir(0.5 * (minlat + maxlat), 0.5 * (minlng + maxlng))
    }

    /// The point `(lat, lng)` falls inside the tile's extents.
    pub fn contains(self, lat: f64, lng: f64) -> bool {
        let (minlat, maxlat) = self.lat_range();
        let (minlng, maxlng) = self.lng_range();
        lat >= minlat && lat <= maxlat && lng >= minlng && lng <= maxlng
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}/{}/{}", self.lvl, self.ilat, self.ilng)
    }
}

/// Unit vector for planetocentric latitude and longitude.
///
/// The y axis points to the north pole; longitude 0 lies on +x and
/// longitude +90° on +z.
pub fn sphere_dir(lat: f64, lng: f64) -> DVec3 {
    let (slat, clat) = lat.sin_cos();
    let (slng, clng) = lng.sin_cos();
    DVec3::new(clat * clng, slat, clat * slng)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_parent_roundtrip() {
        let key = TileKey::new(5, 11, 40);
        for q in 0..4 {
            let child = key.child(q);
            assert_eq!(child.parent(), Some(key));
            assert_eq!(child.quadrant(), q);
        }
        assert_eq!(TileKey::root(1).parent(), None);
    }

    #[test]
    fn test_children_tile_parent_extents() {
        let key = TileKey::new(3, 2, 9);
        let (minlat, maxlat) = key.lat_range();
        let (minlng, maxlng) = key.lng_range();
        let sw = key.child(2);
        let ne = key.child(1);
        assert!(sw.is_south() && !sw.is_east());
        assert!(!ne.is_south() && ne.is_east());
        assert!((sw.lat_range().0 - minlat).abs() < 1e-12);
        assert!((sw.lng_range().0 - minlng).abs() < 1e-12);
        assert!((ne.lat_range().1 - maxlat).abs() < 1e-12);
        assert!((ne.lng_range().1 - maxlng).abs() < 1e-12);
    }

    #[test]
    fn test_roots_are_hemispheres() {
        let west = TileKey::root(0);
        assert_eq!(west.lat_range(), (-FRAC_PI_2, FRAC_PI_2));
        assert_eq!(west.lng_range(), (-PI, 0.0));
        let east = TileKey::root(1);
        assert_eq!(east.lng_range(), (0.0, PI));
        assert!((east.center_dir() - DVec3::Z).length() < 1e-12);
    }

    #[test]
    fn test_contains() {
        let key = TileKey::new(2, 1, 5);
        let (minlat, maxlat) = key.lat_range();
        let (minlng, maxlng) = key.lng_range();
        assert!(key.contains(0.5 * (minlat + maxlat), 0.5 * (minlng + maxlng)));
        assert!(!key.contains(maxlat + 0.01, minlng));
    }
}
