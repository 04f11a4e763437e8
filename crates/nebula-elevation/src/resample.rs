//! 2x upsampling of one parent quadrant into a full child grid.
//!
//! A child tile without its own elevation file covers one quarter of its
//! parent's footprint, i.e. `4 * PATCH_RES + 1` parent samples per side.
//! Doubling the density restores the full `8 * PATCH_RES + 1` interior plus
//! padding. Even child samples copy parent samples; odd ones are
//! interpolated.

use crate::grid::ElevationGrid;
use crate::{ELEV_SAMPLES, ELEV_STRIDE, PATCH_RES};

/// How derived samples between parent samples are estimated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Interpolation {
    /// Elevation disabled: tiles render on the bare sphere.
    Flat,
    /// Integer average of the 2 or 4 enclosing parent samples.
    Linear,
    /// 4-point cubic estimate along rows, columns and diagonals, linear in
    /// the padding border.
    #[default]
    Cubic,
}

const HALF: isize = (PATCH_RES * 4) as isize;
const STRIDE: isize = ELEV_STRIDE as isize;

/// Cubic midpoint estimate between `a0` and `ap1`.
fn cubic(am1: f64, a0: f64, ap1: f64, ap2: f64) -> f64 {
    0.5 * (2.0 * a0
        + 0.5 * (-am1 + ap1)
        + 0.25 * (2.0 * am1 - 5.0 * a0 + 4.0 * ap1 - ap2)
        + 0.125 * (-am1 + 3.0 * a0 - 3.0 * ap1 + ap2))
}

fn round(v: f64) -> i16 {
    (v + 0.5) as i16
}

struct Quadrant<'a> {
    parent: &'a [i16],
    base: isize,
}

impl Quadrant<'_> {
    fn get(&self, i: isize, j: isize) -> i32 {
        self.parent[(self.base + i * STRIDE + j) as usize] as i32
    }

    fn getf(&self, i: isize, j: isize) -> f64 {
        self.get(i, j) as f64
    }

    fn row_cubic(&self, i: isize, j: isize) -> f64 {
        cubic(
            self.getf(i, j - 1),
            self.getf(i, j),
            self.getf(i, j + 1),
            self.getf(i, j + 2),
        )
    }
}

struct Target<'a> {
    samples: &'a mut [i16],
}

impl Target<'_> {
    const BASE: isize = STRIDE + 1;

    fn set(&mut self, i: isize, j: isize, v: i32) {
        self.samples[(Self::BASE + i * STRIDE + j) as usize] = v as i16;
    }

    fn set_raw(&mut self, i: isize, j: isize, v: i16) {
        self.samples[(Self::BASE + i * STRIDE + j) as usize] = v;
    }

    fn get(&self, i: isize, j: isize) -> f64 {
        self.samples[(Self::BASE + i * STRIDE + j) as usize] as f64
    }
}

/// Derive a child grid from the quadrant of `parent` it covers.
///
/// `south` selects the southern half (odd latitude index), `east` the
/// eastern half (odd longitude index). Returns `None` for
/// [`Interpolation::Flat`]. The child's mean is the mean of the copied
/// parent samples.
pub fn derive_quadrant(
    parent: &ElevationGrid,
    south: bool,
    east: bool,
    mode: Interpolation,
) -> Option<ElevationGrid> {
    if mode == Interpolation::Flat {
        return None;
    }

    let lat_ofs = if south { 0 } else { HALF };
    let lng_ofs = if east { HALF } else { 0 };
    let p = Quadrant {
        parent: parent.samples(),
        base: lat_ofs * STRIDE + lng_ofs + STRIDE + 1,
    };

    let mut child = ElevationGrid::flat(0);
    let mut c = Target {
        samples: child.samples_mut(),
    };
    debug_assert_eq!(c.samples.len(), ELEV_SAMPLES);

    let mut mean = 0.0;
    for i in 0..=HALF {
        for j in 0..=HALF {
            let v = p.get(i, j);
            c.set(2 * i, 2 * j, v);
            mean += v as f64;
        }
    }

    match mode {
        Interpolation::Flat => unreachable!("handled above"),
        Interpolation::Linear => {
            for i in 0..=HALF {
                for j in -1..=HALF {
                    c.set(2 * i, 2 * j + 1, (p.get(i, j) + p.get(i, j + 1)) / 2);
                }
            }
            for i in -1..=HALF {
                for j in 0..=HALF {
                    c.set(2 * i + 1, 2 * j, (p.get(i, j) + p.get(i + 1, j)) / 2);
                }
            }
            for i in -1..=HALF {
                for j in -1..=HALF {
                    let sum = p.get(i, j) + p.get(i, j + 1) + p.get(i + 1, j) + p.get(i + 1, j + 1);
                    c.set(2 * i + 1, 2 * j + 1, sum / 4);
                }
            }
        }
        Interpolation::Cubic => {
            for i in 0..=HALF {
                for j in 0..HALF {
                    c.set_raw(2 * i, 2 * j + 1, round(p.row_cubic(i, j)));
                }
            }
            for i in 0..HALF {
                for j in 0..=HALF {
                    let v = cubic(p.getf(i - 1, j), p.getf(i, j), p.getf(i + 1, j), p.getf(i + 2, j));
                    c.set_raw(2 * i + 1, 2 * j, round(v));
                }
            }
            // centre points: column-wise cubic over the row midpoints
            for i in 0..HALF {
                for j in 0..HALF {
                    let b_m1 = if i > 0 {
                        c.get(2 * i - 2, 2 * j + 1)
                    } else {
                        p.row_cubic(i - 1, j)
                    };
                    let b_0 = c.get(2 * i, 2 * j + 1);
                    let b_p1 = c.get(2 * i + 2, 2 * j + 1);
                    let b_p2 = if i < HALF - 1 {
                        c.get(2 * i + 4, 2 * j + 1)
                    } else {
                        p.row_cubic(i + 2, j)
                    };
                    c.set_raw(2 * i + 1, 2 * j + 1, round(cubic(b_m1, b_0, b_p1, b_p2)));
                }
            }
            // padding border: linear
            let edge = 2 * HALF + 1;
            for i in 0..=HALF {
                c.set(2 * i, -1, (p.get(i, -1) + p.get(i, 0)) / 2);
                c.set(2 * i, edge, (p.get(i, HALF) + p.get(i, HALF + 1)) / 2);
            }
            for j in 0..=HALF {
                c.set(-1, 2 * j, (p.get(-1, j) + p.get(0, j)) / 2);
                c.set(edge, 2 * j, (p.get(HALF, j) + p.get(HALF + 1, j)) / 2);
            }
            for i in -1..=HALF {
                let west = p.get(i, -1) + p.get(i, 0) + p.get(i + 1, -1) + p.get(i + 1, 0);
                c.set(2 * i + 1, -1, west / 4);
                let east = p.get(i, HALF) + p.get(i, HALF + 1) + p.get(i + 1, HALF) + p.get(i + 1, HALF + 1);
                c.set(2 * i + 1, edge, east / 4);
            }
            for j in 0..HALF {
                let south = p.get(-1, j) + p.get(-1, j + 1) + p.get(0, j) + p.get(0, j + 1);
                c.set(-1, 2 * j + 1, south / 4);
                let north = p.get(HALF, j) + p.get(HALF, j + 1) + p.get(HALF + 1, j) + p.get(HALF + 1, j + 1);
                c.set(edge, 2 * j + 1, north / 4);
            }
        }
    }

    let count = ((HALF + 1) * (HALF + 1)) as f64;
    Some(child.with_mean(mean / count))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Parent plane with even slopes so every midpoint is an integer.
    fn plane(row: usize, col: usize) -> i16 {
        (2 * row + 4 * col + 100) as i16
    }

    /// The plane evaluated at the parent position a child sample maps to,
    /// in padded child coordinates.
    fn expected(row: usize, col: usize, south: bool, east: bool) -> i16 {
        let lat_ofs = if south { 0 } else { PATCH_RES * 4 };
        let lng_ofs = if east { PATCH_RES * 4 } else { 0 };
        // twice the (fractional) padded parent row and column
        let prow2 = 2 * lat_ofs + 1 + row;
        let pcol2 = 2 * lng_ofs + 1 + col;
        (prow2 + 2 * pcol2 + 100) as i16
    }

    fn check_plane(mode: Interpolation) {
        let parent = ElevationGrid::from_fn(plane);
        for (south, east) in [(false, false), (false, true), (true, false), (true, true)] {
            let child = derive_quadrant(&parent, south, east, mode).unwrap();
            for row in 0..ELEV_STRIDE {
                for col in 0..ELEV_STRIDE {
                    assert_eq!(
                        child.at(row, col),
                        expected(row, col, south, east),
                        "{mode:?} mismatch at ({row}, {col}) quadrant south={south} east={east}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_linear_reproduces_plane() {
        check_plane(Interpolation::Linear);
    }

    #[test]
    fn test_cubic_reproduces_plane() {
        check_plane(Interpolation::Cubic);
    }

    #[test]
    fn test_flat_mode_derives_nothing() {
        let parent = ElevationGrid::flat(10);
        assert!(derive_quadrant(&parent, true, true, Interpolation::Flat).is_none());
    }

    #[test]
    fn test_even_samples_copy_parent() {
        let parent = ElevationGrid::from_fn(|row, col| ((row * 7 + col * 13) % 500) as i16);
        let child = derive_quadrant(&parent, false, true, Interpolation::Cubic).unwrap();
        let half = PATCH_RES * 4;
        for i in 0..=half {
            for j in 0..=half {
                assert_eq!(child.at(2 * i + 1, 2 * j + 1), parent.at(half + i + 1, half + j + 1));
            }
        }
    }

    #[test]
    fn test_linear_midpoint_truncates_like_integer_division() {
        // Alternating 0 / 1 columns: midpoints are (0 + 1) / 2 == 0.
        let parent = ElevationGrid::from_fn(|_, col| (col % 2) as i16);
        let child = derive_quadrant(&parent, true, false, Interpolation::Linear).unwrap();
        assert_eq!(child.at(1, 2), 0);
        // Negative sums truncate toward zero as well.
        let parent = ElevationGrid::from_fn(|_, col| -((col % 2) as i16));
        let child = derive_quadrant(&parent, true, false, Interpolation::Linear).unwrap();
        assert_eq!(child.at(1, 2), 0);
    }

    #[test]
    fn test_cubic_overshoots_at_a_step() {
        // A step from 0 to 100 along columns: the cubic estimate next to the
        // step overshoots the linear average.
        let parent = ElevationGrid::from_fn(|_, col| if col < 60 { 0 } else { 100 });
        let linear = derive_quadrant(&parent, true, false, Interpolation::Linear).unwrap();
        let cubic = derive_quadrant(&parent, true, false, Interpolation::Cubic).unwrap();
        // padded parent cols 58 and 59 are both 0, col 60 is 100; child
        // padded col 116 lies halfway between parent cols 58 and 59
        let row = 11;
        assert_eq!(linear.at(row, 116), 0);
        assert!(cubic.at(row, 116) < 0, "cubic should undershoot before the step");
    }

    #[test]
    fn test_derived_mean_covers_copied_samples() {
        let parent = ElevationGrid::flat(37);
        let child = derive_quadrant(&parent, false, false, Interpolation::Linear).unwrap();
        assert_eq!(child.mean(), 37.0);
    }
}
