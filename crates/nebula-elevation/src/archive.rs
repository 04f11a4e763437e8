//! On-disk tile elevation archive.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::ElevationError;
use crate::grid::ElevationGrid;
use crate::header::{encode_elevation_file, parse_elevation_file};

/// Directory tree of per-tile elevation files for one celestial body,
/// laid out as `<root>/<body>/Elev/<lvl+4:02>/<ilat:06>/<ilng:06>.elv`.
#[derive(Clone, Debug)]
pub struct ElevationArchive {
    root: PathBuf,
    body: String,
}

impl ElevationArchive {
    pub fn new(root: impl Into<PathBuf>, body: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            body: body.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// File path of the tile at `(lvl, ilat, ilng)`. Tree level 0 is stored
    /// as directory `04`.
    pub fn path(&self, lvl: u32, ilat: i32, ilng: i32) -> PathBuf {
        self.root
            .join(&self.body)
            .join("Elev")
            .join(format!("{:02}", lvl + 4))
            .join(format!("{ilat:06}"))
            .join(format!("{ilng:06}.elv"))
    }

    /// Read and decode one tile's elevation file.
    ///
    /// Returns `Ok(None)` when the file does not exist.
    pub fn read(&self, lvl: u32, ilat: i32, ilng: i32) -> Result<Option<ElevationGrid>, ElevationError> {
        let path = self.path(lvl, ilat, ilng);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ElevationError::Io(e)),
        };
        let grid = parse_elevation_file(&bytes)?;
        tracing::trace!(lvl, ilat, ilng, path = %path.display(), "elevation tile read");
        Ok(Some(grid))
    }

    /// Write `grid` as the tile's elevation file, creating directories as
    /// needed.
    pub fn write(&self, lvl: u32, ilat: i32, ilng: i32, grid: &ElevationGrid) -> Result<(), ElevationError> {
        let path = self.path(lvl, ilat, ilng);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(ElevationError::Io)?;
        }
        std::fs::write(&path, encode_elevation_file(grid)).map_err(ElevationError::Io)
    }
}
