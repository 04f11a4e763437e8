//! Elevation file header and sample block decoding.
//!
//! Layout (little-endian, packed, 100 bytes):
//!   - `id`       `[u8; 4]`: `b"ELE"` followed by the format version (1)
//!   - `hdrsize`  `i32`: byte offset of the sample block
//!   - `dtype`    `i32`: sample encoding, see [`ElevDataType`]
//!   - `xgrd, ygrd` `i32`: grid size (259 x 259)
//!   - `xpad, ypad` `i32`: padding width (1, 1)
//!   - `scale, offset` `f64`: elevation = raw * scale + offset
//!   - `latmin, latmax, lngmin, lngmax` `f64`: coverage in radians
//!   - `emin, emax, emean` `f64`: summary statistics in meters

use crate::error::ElevationError;
use crate::grid::ElevationGrid;
use crate::{ELEV_SAMPLES, ELEV_STRIDE};

/// Identifier at the start of every elevation file (`'E','L','E',1`).
pub const ELEV_FILE_ID: [u8; 4] = [b'E', b'L', b'E', 1];

/// Size of [`ElevFileHeader`] on disk.
pub const ELEV_HEADER_SIZE: usize = 100;

/// Packed on-disk header of a tile elevation file.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ElevFileHeader {
    pub id: [u8; 4],
    pub hdrsize: i32,
    pub dtype: i32,
    pub xgrd: i32,
    pub ygrd: i32,
    pub xpad: i32,
    pub ypad: i32,
    pub scale: f64,
    pub offset: f64,
    pub latmin: f64,
    pub latmax: f64,
    pub lngmin: f64,
    pub lngmax: f64,
    pub emin: f64,
    pub emax: f64,
    pub emean: f64,
}

static_assertions::assert_eq_size!(ElevFileHeader, [u8; ELEV_HEADER_SIZE]);

fn f64_le(v: f64) -> f64 {
    f64::from_bits(u64::from_le(v.to_bits()))
}

impl ElevFileHeader {
    /// Header for a full-size grid in the given encoding.
    pub fn new(dtype: ElevDataType, offset: f64, emin: f64, emax: f64, emean: f64) -> Self {
        Self {
            id: ELEV_FILE_ID,
            hdrsize: ELEV_HEADER_SIZE as i32,
            dtype: dtype as i32,
            xgrd: ELEV_STRIDE as i32,
            ygrd: ELEV_STRIDE as i32,
            xpad: 1,
            ypad: 1,
            scale: 1.0,
            offset,
            latmin: 0.0,
            latmax: 0.0,
            lngmin: 0.0,
            lngmax: 0.0,
            emin,
            emax,
            emean,
        }
    }

    /// Convert every field between little-endian file order and host order.
    /// The conversion is its own inverse.
    pub fn swap_le(self) -> Self {
        Self {
            id: self.id,
            hdrsize: i32::from_le(self.hdrsize),
            dtype: i32::from_le(self.dtype),
            xgrd: i32::from_le(self.xgrd),
            ygrd: i32::from_le(self.ygrd),
            xpad: i32::from_le(self.xpad),
            ypad: i32::from_le(self.ypad),
            scale: f64_le(self.scale),
            offset: f64_le(self.offset),
            latmin: f64_le(self.latmin),
            latmax: f64_le(self.latmax),
            lngmin: f64_le(self.lngmin),
            lngmax: f64_le(self.lngmax),
            emin: f64_le(self.emin),
            emax: f64_le(self.emax),
            emean: f64_le(self.emean),
        }
    }
}

/// Encoding of the sample block following the header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum ElevDataType {
    /// No sample block; every sample equals the header offset.
    Flat = 0,
    /// Unsigned 8-bit samples.
    U8 = 8,
    /// Signed 8-bit samples.
    I8 = -8,
    /// Unsigned 16-bit samples.
    U16 = 16,
    /// Signed 16-bit samples.
    I16 = -16,
}

impl ElevDataType {
    /// Bytes per encoded sample.
    pub fn sample_size(self) -> usize {
        match self {
            ElevDataType::Flat => 0,
            ElevDataType::U8 | ElevDataType::I8 => 1,
            ElevDataType::U16 | ElevDataType::I16 => 2,
        }
    }
}

impl TryFrom<i32> for ElevDataType {
    type Error = ElevationError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ElevDataType::Flat),
            8 => Ok(ElevDataType::U8),
            -8 => Ok(ElevDataType::I8),
            16 => Ok(ElevDataType::U16),
            -16 => Ok(ElevDataType::I16),
            other => Err(ElevationError::UnsupportedType(other)),
        }
    }
}

/// Decode a complete elevation file into a grid.
///
/// Samples are converted with `raw * scale + offset`, clamped to the i16
/// range and truncated.
/// The grid's mean elevation is taken from the header.
pub fn parse_elevation_file(bytes: &[u8]) -> Result<ElevationGrid, ElevationError> {
    if bytes.len() < ELEV_HEADER_SIZE {
        return Err(ElevationError::Truncated {
            needed: ELEV_HEADER_SIZE,
            actual: bytes.len(),
        });
    }
    let hdr: ElevFileHeader =
        bytemuck::pod_read_unaligned::<ElevFileHeader>(&bytes[..ELEV_HEADER_SIZE]).swap_le();

    let id = hdr.id;
    if id[..3] != ELEV_FILE_ID[..3] {
        return Err(ElevationError::BadMagic(id));
    }
    let dtype = ElevDataType::try_from(hdr.dtype)?;
    let (scale, offset) = (hdr.scale, hdr.offset);
    let (emin, emax, emean) = (hdr.emin, hdr.emax, hdr.emean);

    if dtype == ElevDataType::Flat {
        return Ok(ElevationGrid::flat(offset as i16).with_stats(emin, emax, emean));
    }

    let (xgrd, ygrd) = (hdr.xgrd, hdr.ygrd);
    if xgrd as usize != ELEV_STRIDE || ygrd as usize != ELEV_STRIDE {
        return Err(ElevationError::GridSize {
            width: xgrd,
            height: ygrd,
            expected: ELEV_STRIDE,
        });
    }

    let start = usize::try_from(hdr.hdrsize).unwrap_or(ELEV_HEADER_SIZE);
    let needed = start + ELEV_SAMPLES * dtype.sample_size();
    if bytes.len() < needed {
        return Err(ElevationError::Truncated {
            needed,
            actual: bytes.len(),
        });
    }
    let data = &bytes[start..needed];

    // heights outside the i16 range clamp rather than wrap
    let convert = |raw: f64| (raw * scale + offset).clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16;
    let samples: Vec<i16> = match dtype {
        ElevDataType::Flat => unreachable!("flat tiles return early"),
        ElevDataType::U8 => data.iter().map(|&b| convert(b as f64)).collect(),
        ElevDataType::I8 => data.iter().map(|&b| convert(b as i8 as f64)).collect(),
        ElevDataType::U16 => data
            .chunks_exact(2)
            .map(|c| convert(u16::from_le_bytes([c[0], c[1]]) as f64))
            .collect(),
        ElevDataType::I16 => data
            .chunks_exact(2)
            .map(|c| convert(i16::from_le_bytes([c[0], c[1]]) as f64))
            .collect(),
    };

    Ok(ElevationGrid::from_samples(samples)?.with_stats(emin, emax, emean))
}

/// Encode a grid as a signed 16-bit elevation file.
pub fn encode_elevation_file(grid: &ElevationGrid) -> Vec<u8> {
    let hdr = ElevFileHeader::new(ElevDataType::I16, 0.0, grid.min(), grid.max(), grid.mean());
    let mut out = Vec::with_capacity(ELEV_HEADER_SIZE + ELEV_SAMPLES * 2);
    out.extend_from_slice(bytemuck::bytes_of(&hdr.swap_le()));
    for &s in grid.samples() {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(hdr: ElevFileHeader) -> Vec<u8> {
        bytemuck::bytes_of(&hdr.swap_le()).to_vec()
    }

    #[test]
    fn test_flat_tile_fills_offset() {
        let bytes = header_bytes(ElevFileHeader::new(ElevDataType::Flat, 250.0, 250.0, 250.0, 250.0));
        let grid = parse_elevation_file(&bytes).unwrap();
        assert!(grid.samples().iter().all(|&s| s == 250));
        assert_eq!(grid.mean(), 250.0);
    }

    #[test]
    fn test_u8_tile_applies_offset() {
        let mut bytes = header_bytes(ElevFileHeader::new(ElevDataType::U8, -100.0, -100.0, 155.0, 0.0));
        bytes.extend((0..ELEV_SAMPLES).map(|i| (i % 256) as u8));
        let grid = parse_elevation_file(&bytes).unwrap();
        assert_eq!(grid.samples()[0], -100);
        assert_eq!(grid.samples()[255], 155);
        assert_eq!(grid.samples()[256], -100);
    }

    #[test]
    fn test_out_of_range_heights_clamp() {
        let mut hdr = ElevFileHeader::new(ElevDataType::U16, 0.0, 0.0, 0.0, 0.0);
        hdr.scale = 2.0;
        let mut bytes = header_bytes(hdr);
        for i in 0..ELEV_SAMPLES {
            let raw: u16 = if i % 2 == 0 { 20_000 } else { 100 };
            bytes.extend_from_slice(&raw.to_le_bytes());
        }
        let grid = parse_elevation_file(&bytes).unwrap();
        assert_eq!(grid.samples()[0], i16::MAX);
        assert_eq!(grid.samples()[1], 200);

        let hdr = ElevFileHeader::new(ElevDataType::I16, -40_000.0, 0.0, 0.0, 0.0);
        let mut bytes = header_bytes(hdr);
        bytes.extend(std::iter::repeat_n(0u8, ELEV_SAMPLES * 2));
        let grid = parse_elevation_file(&bytes).unwrap();
        assert!(grid.samples().iter().all(|&s| s == i16::MIN));
    }

    #[test]
    fn test_i16_roundtrip_through_encoder() {
        let grid = ElevationGrid::from_fn(|row, col| (row as i16 - 100) * 3 + col as i16);
        let decoded = parse_elevation_file(&encode_elevation_file(&grid)).unwrap();
        assert_eq!(decoded.samples(), grid.samples());
    }

    #[test]
    fn test_larger_header_size_is_skipped() {
        let mut hdr = ElevFileHeader::new(ElevDataType::I8, 0.0, -1.0, 1.0, 0.0);
        hdr.hdrsize = 108;
        let mut bytes = header_bytes(hdr);
        bytes.extend_from_slice(&[0xAA; 8]);
        bytes.extend(std::iter::repeat_n(0xFFu8, ELEV_SAMPLES));
        let grid = parse_elevation_file(&bytes).unwrap();
        assert!(grid.samples().iter().all(|&s| s == -1));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut hdr = ElevFileHeader::new(ElevDataType::Flat, 0.0, 0.0, 0.0, 0.0);
        hdr.id = *b"DDS ";
        let err = parse_elevation_file(&header_bytes(hdr)).unwrap_err();
        assert!(matches!(err, ElevationError::BadMagic(_)));
    }

    #[test]
    fn test_truncated_block_rejected() {
        let mut bytes = header_bytes(ElevFileHeader::new(ElevDataType::I16, 0.0, 0.0, 0.0, 0.0));
        bytes.extend_from_slice(&[0u8; 64]);
        let err = parse_elevation_file(&bytes).unwrap_err();
        assert!(matches!(err, ElevationError::Truncated { .. }));
    }

    #[test]
    fn test_unknown_dtype_rejected() {
        let mut hdr = ElevFileHeader::new(ElevDataType::Flat, 0.0, 0.0, 0.0, 0.0);
        hdr.dtype = 32;
        let err = parse_elevation_file(&header_bytes(hdr)).unwrap_err();
        assert!(matches!(err, ElevationError::UnsupportedType(32)));
    }

    #[test]
    fn test_wrong_grid_size_rejected() {
        let mut hdr = ElevFileHeader::new(ElevDataType::U8, 0.0, 0.0, 0.0, 0.0);
        hdr.xgrd = 129;
        let err = parse_elevation_file(&header_bytes(hdr)).unwrap_err();
        assert!(matches!(err, ElevationError::GridSize { width: 129, .. }));
    }
}
