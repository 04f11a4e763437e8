//! Padded elevation sample grids and windows into them.

use std::sync::Arc;

use crate::error::ElevationError;
use crate::{ELEV_SAMPLES, ELEV_STRIDE, PATCH_RES};

/// A square grid of `ELEV_STRIDE x ELEV_STRIDE` signed 16-bit elevation
/// samples in meters.
///
/// Row 0 is the southern edge and column 0 the western edge. The outermost
/// row and column on each side are padding used for normals and cubic
/// interpolation; the interior `8 * PATCH_RES + 1` samples span the tile.
#[derive(Clone, Debug, PartialEq)]
pub struct ElevationGrid {
    samples: Box<[i16]>,
    min: f64,
    max: f64,
    mean: f64,
}

impl ElevationGrid {
    /// A grid where every sample has the same value.
    pub fn flat(value: i16) -> Self {
        let v = value as f64;
        Self {
            samples: vec![value; ELEV_SAMPLES].into_boxed_slice(),
            min: v,
            max: v,
            mean: v,
        }
    }

    /// Wrap a full sample block, computing min/max/mean over the interior.
    pub fn from_samples(samples: Vec<i16>) -> Result<Self, ElevationError> {
        if samples.len() != ELEV_SAMPLES {
            return Err(ElevationError::Truncated {
                needed: ELEV_SAMPLES,
                actual: samples.len(),
            });
        }
        let mut grid = Self {
            samples: samples.into_boxed_slice(),
            min: 0.0,
            max: 0.0,
            mean: 0.0,
        };
        grid.recompute_stats();
        Ok(grid)
    }

    /// Build a grid by evaluating `f(row, col)` over padded coordinates
    /// `0..ELEV_STRIDE`.
    pub fn from_fn(mut f: impl FnMut(usize, usize) -> i16) -> Self {
        let mut samples = Vec::with_capacity(ELEV_SAMPLES);
        for row in 0..ELEV_STRIDE {
            for col in 0..ELEV_STRIDE {
                samples.push(f(row, col));
            }
        }
        let mut grid = Self {
            samples: samples.into_boxed_slice(),
            min: 0.0,
            max: 0.0,
            mean: 0.0,
        };
        grid.recompute_stats();
        grid
    }

    /// Override the summary statistics (e.g. with values from a file header).
    #[must_use]
    pub fn with_stats(mut self, min: f64, max: f64, mean: f64) -> Self {
        self.min = min;
        self.max = max;
        self.mean = mean;
        self
    }

    /// Override only the mean elevation.
    #[must_use]
    pub fn with_mean(mut self, mean: f64) -> Self {
        self.mean = mean;
        self
    }

    fn recompute_stats(&mut self) {
        let mut min = i16::MAX;
        let mut max = i16::MIN;
        let mut sum = 0.0;
        let mut n = 0usize;
        for row in 1..ELEV_STRIDE - 1 {
            for &s in &self.samples[row * ELEV_STRIDE + 1..(row + 1) * ELEV_STRIDE - 1] {
                min = min.min(s);
                max = max.max(s);
                sum += s as f64;
                n += 1;
            }
        }
        self.min = min as f64;
        self.max = max as f64;
        self.mean = sum / n as f64;
    }

    /// All samples, row-major, including padding.
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub(crate) fn samples_mut(&mut self) -> &mut [i16] {
        &mut self.samples
    }

    /// Sample at padded coordinates.
    pub fn at(&self, row: usize, col: usize) -> i16 {
        self.samples[row * ELEV_STRIDE + col]
    }

    /// Lowest interior elevation.
    pub fn min(&self) -> f64 {
        self.min
    }

    /// Highest interior elevation.
    pub fn max(&self) -> f64 {
        self.max
    }

    /// Mean elevation over the grid footprint.
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Approximate heap footprint in bytes.
    pub fn byte_size(&self) -> usize {
        self.samples.len() * std::mem::size_of::<i16>()
    }
}

/// A `PATCH_RES + 3` square window into an ancestor's grid, covering the
/// footprint of one tile three levels below the grid's owner.
///
/// The view keeps the ancestor grid alive through its `Arc`, so evicting the
/// ancestor tile never invalidates a descendant's samples.
#[derive(Clone, Debug)]
pub struct ElevationView {
    grid: Arc<ElevationGrid>,
    origin: usize,
}

impl ElevationView {
    /// View for the tile at `(ilat, ilng)` inside the grid of its
    /// great-grandparent.
    pub fn for_descendant(grid: Arc<ElevationGrid>, ilat: i32, ilng: i32) -> Self {
        let row = ((7 - ilat) & 7) as usize;
        let col = (ilng & 7) as usize;
        Self {
            grid,
            origin: (row * ELEV_STRIDE + col) * PATCH_RES,
        }
    }

    /// Sample at vertex coordinates `0..=PATCH_RES`, row 0 = south.
    pub fn sample(&self, row: usize, col: usize) -> i16 {
        self.grid.samples[self.origin + (row + 1) * ELEV_STRIDE + col + 1]
    }

    /// Sample at vertex coordinates extended by one into the padding
    /// (`-1..=PATCH_RES + 1`).
    pub fn sample_padded(&self, row: isize, col: isize) -> i16 {
        let idx = self.origin as isize + (row + 1) * ELEV_STRIDE as isize + col + 1;
        self.grid.samples[idx as usize]
    }

    /// Mean elevation of the whole ancestor grid.
    pub fn mean(&self) -> f64 {
        self.grid.mean
    }

    /// The shared ancestor grid.
    pub fn grid(&self) -> &Arc<ElevationGrid> {
        &self.grid
    }

    /// Offset of the window's padded origin within the ancestor grid.
    pub fn origin(&self) -> usize {
        self.origin
    }
}
