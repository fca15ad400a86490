//! Legacy raw pixel buffer.
//!
//! The legacy binary repository stores each image as one file of packed,
//! big-endian samples. Planes are laid out in XYZCT order: plane
//! `(z, c, t)` starts at `((t * size_c + c) * size_z + z) * plane_size`
//! bytes, and rows within a plane are contiguous.
//!
//! Reads seek to each row of the requested region and fetch only that row's
//! bytes. The file handle is shared by all readers of the buffer, so reads on
//! one buffer are serialized.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::{OpenError, ReadError};
use crate::meta::ImageMeta;

use super::tile::{ByteOrder, PixelData, Region, Tile};
use super::{BackendFactory, BackendKind, Dimensions, PixelBuffer};

/// Suffix of the lock file a writer places next to a pixels file.
pub const LOCK_SUFFIX: &str = ".lock";

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(LOCK_SUFFIX);
    PathBuf::from(name)
}

// =============================================================================
// RawPixelBuffer
// =============================================================================

/// Pixel buffer over a legacy raw pixels file.
pub struct RawPixelBuffer {
    path: PathBuf,
    dims: Dimensions,
    file: Mutex<Option<File>>,
}

impl RawPixelBuffer {
    /// Open the pixels file at `path` for `meta`.
    ///
    /// Fails with [`OpenError::Locked`] while a writer's lock file exists and
    /// with [`OpenError::Corrupt`] when the file is shorter than the extents
    /// require.
    pub fn open(path: &Path, meta: &ImageMeta) -> Result<Self, OpenError> {
        let lock = lock_path(path);
        if lock.exists() {
            return Err(OpenError::Locked(lock.display().to_string()));
        }

        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => OpenError::NotFound(path.display().to_string()),
            _ => OpenError::from(e),
        })?;

        let dims = Dimensions::from_meta(meta);
        let expected = plane_bytes(&dims)
            * dims.size_z as u64
            * dims.size_c as u64
            * dims.size_t as u64;
        let actual = file.metadata()?.len();
        if actual < expected {
            return Err(OpenError::Corrupt(format!(
                "{} holds {} bytes, expected {}",
                path.display(),
                actual,
                expected
            )));
        }

        debug!(path = %path.display(), size = actual, "Opened raw pixels file");

        Ok(Self {
            path: path.to_path_buf(),
            dims,
            file: Mutex::new(Some(file)),
        })
    }

    fn plane_offset(&self, z: u32, t: u32, c: u32) -> u64 {
        let d = &self.dims;
        let plane_index =
            (t as u64 * d.size_c as u64 + c as u64) * d.size_z as u64 + z as u64;
        plane_index * plane_bytes(d)
    }
}

fn plane_bytes(dims: &Dimensions) -> u64 {
    dims.size_x as u64 * dims.size_y as u64 * dims.pixel_type.bytes_per_sample() as u64
}

impl PixelBuffer for RawPixelBuffer {
    fn kind(&self) -> BackendKind {
        BackendKind::Legacy
    }

    fn dimensions(&self) -> Dimensions {
        self.dims
    }

    fn read_tile(&self, region: Region, z: u32, t: u32, c: u32) -> Result<Tile, ReadError> {
        self.dims.check_plane(z, t, c)?;
        let region = self.dims.clip(region)?;

        let bps = self.dims.pixel_type.bytes_per_sample();
        let row_bytes = region.width as usize * bps;
        let plane_offset = self.plane_offset(z, t, c);
        let mut bytes = vec![0u8; row_bytes * region.height as usize];

        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        let file = guard.as_mut().ok_or(ReadError::Closed)?;

        for (row, out) in bytes.chunks_exact_mut(row_bytes).enumerate() {
            let y = region.y as u64 + row as u64;
            let offset =
                plane_offset + (y * self.dims.size_x as u64 + region.x as u64) * bps as u64;
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(out)?;
        }
        drop(guard);

        Ok(Tile::new(
            region,
            PixelData::decode(self.dims.pixel_type, &bytes, ByteOrder::Big),
        ))
    }

    fn close(&self) {
        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if guard.take().is_some() {
            debug!(path = %self.path.display(), "Closed raw pixels file");
        }
    }
}

// =============================================================================
// LegacyFactory
// =============================================================================

/// Opens [`RawPixelBuffer`]s for images that carry a pixels path.
#[derive(Debug, Clone, Default)]
pub struct LegacyFactory;

impl LegacyFactory {
    pub fn new() -> Self {
        Self
    }
}

impl BackendFactory for LegacyFactory {
    fn kind(&self) -> BackendKind {
        BackendKind::Legacy
    }

    fn probe(&self, meta: &ImageMeta) -> bool {
        meta.storage.pixels_path.is_some()
    }

    fn open(&self, meta: &ImageMeta) -> Result<Arc<dyn PixelBuffer>, OpenError> {
        let path = meta
            .storage
            .pixels_path
            .as_deref()
            .ok_or_else(|| OpenError::NotFound(format!("image {} has no pixels path", meta.image_id)))?;
        Ok(Arc::new(RawPixelBuffer::open(path, meta)?))
    }
}
