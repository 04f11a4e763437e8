//! Elevation data for planetary surface tiles: the on-disk header format,
//! padded 16-bit sample grids, views into ancestor grids, and 2x
//! resampling used when a tile inherits its heights from a coarser level.
//!
//! Every grid covers its own tile and the three finer levels beneath it at
//! 8x linear oversampling, so a tile three levels down reads a disjoint
//! `PATCH_RES`-sized window of its great-grandparent's grid.

mod archive;
mod error;
mod grid;
mod header;
mod resample;

pub use archive::ElevationArchive;
pub use error::ElevationError;
pub use grid::{ElevationGrid, ElevationView};
pub use header::{
    ELEV_FILE_ID, ELEV_HEADER_SIZE, ElevDataType, ElevFileHeader, encode_elevation_file,
    parse_elevation_file,
};
pub use resample::{Interpolation, derive_quadrant};

/// Number of mesh cells along each side of a tile patch.
pub const PATCH_RES: usize = 32;

/// Side length of an elevation grid: 8x oversampled patch plus one row of
/// padding on each side.
pub const ELEV_STRIDE: usize = PATCH_RES * 8 + 3;

/// Total number of samples in an elevation grid.
pub const ELEV_SAMPLES: usize = ELEV_STRIDE * ELEV_STRIDE;
