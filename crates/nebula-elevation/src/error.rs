//! Elevation loading error types.

/// Errors raised while reading or decoding an elevation file.
///
/// A missing file is not an error: [`crate::ElevationArchive::read`] reports
/// it as `Ok(None)` so the caller can fall back to ancestor data.
#[derive(Debug, thiserror::Error)]
pub enum ElevationError {
    /// The file exists but could not be read.
    #[error("failed to read elevation file: {0}")]
    Io(#[source] std::io::Error),

    /// The header does not start with the `ELE` identifier.
    #[error("bad elevation file id {0:?}")]
    BadMagic([u8; 4]),

    /// The file ends before the header or sample block is complete.
    #[error("elevation file truncated: need {needed} bytes, have {actual}")]
    Truncated {
        /// Bytes required by the header and data type.
        needed: usize,
        /// Bytes actually present.
        actual: usize,
    },

    /// The header names a sample encoding this reader does not know.
    #[error("unsupported elevation data type {0}")]
    UnsupportedType(i32),

    /// The grid dimensions do not match the fixed tile grid.
    #[error("elevation grid is {width}x{height}, expected {expected}x{expected}")]
    GridSize {
        /// Grid width from the header.
        width: i32,
        /// Grid height from the header.
        height: i32,
        /// Required side length.
        expected: usize,
    },
}
