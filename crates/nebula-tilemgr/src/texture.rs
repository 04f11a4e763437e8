//! Surface and mask texture lookup.
//!
//! Textures are opaque to the tile manager: it only locates the files,
//! shares the loaded blobs between a tile and the descendants that inherit
//! them, and hands them to the renderer.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::key::TileKey;

/// Which texture tree a lookup targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureKind {
    /// Diffuse surface colour (`Surf/`).
    Surface,
    /// Water-specular and night-light mask (`Mask/`).
    Mask,
}

impl TextureKind {
    fn dir(self) -> &'static str {
        match self {
            TextureKind::Surface => "Surf",
            TextureKind::Mask => "Mask",
        }
    }
}

/// An undecoded texture file.
#[derive(Debug)]
pub struct Texture {
    pub path: PathBuf,
    pub data: Vec<u8>,
}

/// Shared handle to a loaded texture.
pub type TextureHandle = Arc<Texture>;

/// Sub-rectangle of a texture in normalized coordinates. `v` runs from the
/// northern edge (0) to the southern edge (1).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TexCrdRange {
    pub tumin: f32,
    pub tumax: f32,
    pub tvmin: f32,
    pub tvmax: f32,
}

impl Default for TexCrdRange {
    fn default() -> Self {
        Self::FULL
    }
}

impl TexCrdRange {
    pub const FULL: Self = Self {
        tumin: 0.0,
        tumax: 1.0,
        tvmin: 0.0,
        tvmax: 1.0,
    };

    /// The quarter of `self` covered by `child`.
    pub fn sub_range(&self, child: TileKey) -> Self {
        let umid = 0.5 * (self.tumin + self.tumax);
        let vmid = 0.5 * (self.tvmin + self.tvmax);
        let (tumin, tumax) = if child.is_east() {
            (umid, self.tumax)
        } else {
            (self.tumin, umid)
        };
        let (tvmin, tvmax) = if child.is_south() {
            (vmid, self.tvmax)
        } else {
            (self.tvmin, vmid)
        };
        Self {
            tumin,
            tumax,
            tvmin,
            tvmax,
        }
    }
}

/// A texture assigned to a tile, either loaded for the tile itself or
/// borrowed from an ancestor.
#[derive(Clone, Debug)]
pub struct TextureRef {
    pub handle: TextureHandle,
    pub owned: bool,
}

/// Source of tile textures.
pub trait TextureSource: Send + Sync {
    /// Load the texture of `kind` for `key`. `None` when the tile has no
    /// texture of its own.
    fn load(&self, kind: TextureKind, key: TileKey) -> Option<TextureHandle>;
}

/// Texture files under `<root>/<body>/{Surf,Mask}/<lvl+4:02>/<ilat:06>/<ilng:06>.dds`.
#[derive(Clone, Debug)]
pub struct FileTextureSource {
    root: PathBuf,
    body: String,
}

impl FileTextureSource {
    pub fn new(root: impl Into<PathBuf>, body: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            body: body.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, kind: TextureKind, key: TileKey) -> PathBuf {
        self.root
            .join(&self.body)
            .join(kind.dir())
            .join(format!("{:02}", key.lvl + 4))
            .join(format!("{:06}", key.ilat))
            .join(format!("{:06}.dds", key.ilng))
    }
}

impl TextureSource for FileTextureSource {
    fn load(&self, kind: TextureKind, key: TileKey) -> Option<TextureHandle> {
        let path = self.path(kind, key);
        match std::fs::read(&path) {
            Ok(data) => Some(Arc::new(Texture { path, data })),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(tile = %key, path = %path.display(), "texture unreadable: {e}");
                None
            }
        }
    }
}

/// Source that never finds a texture; every tile renders untextured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoTextures;

impl TextureSource for NoTextures {
    fn load(&self, _kind: TextureKind, _key: TileKey) -> Option<TextureHandle> {
        None
    }
}
