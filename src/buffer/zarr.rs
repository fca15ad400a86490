//! Zarr (v2) pixel buffer.
//!
//! Images are read from OME-NGFF datasets at
//! `<ngff_root>/<fileset_id>.zarr/<series>/0`, the full-resolution array of
//! the series. The array must be 5-D in `[t, c, z, y, x]` order.
//!
//! Chunk I/O and decoding go through [`zarrs`], so any compressor it was
//! built with (blosc, zlib, gzip, zstd) is readable. A region read retrieves
//! only the array subset it needs; chunks that were never written read as
//! the array's fill value.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;
use zarrs::array::{Array, ArrayError, DataType, ElementOwned};
use zarrs::array_subset::ArraySubset;
use zarrs::filesystem::FilesystemStore;

use crate::error::{OpenError, ReadError};
use crate::meta::{ImageMeta, PixelType};

use super::tile::{PixelData, Region, Tile};
use super::{BackendFactory, BackendKind, Dimensions, PixelBuffer};

/// Pixel type stored by a Zarr data type, if the image model has one.
fn pixel_type_of(data_type: &DataType) -> Option<PixelType> {
    match data_type {
        DataType::Int8 => Some(PixelType::Int8),
        DataType::UInt8 => Some(PixelType::Uint8),
        DataType::Int16 => Some(PixelType::Int16),
        DataType::UInt16 => Some(PixelType::Uint16),
        DataType::Int32 => Some(PixelType::Int32),
        DataType::UInt32 => Some(PixelType::Uint32),
        DataType::Float32 => Some(PixelType::Float),
        DataType::Float64 => Some(PixelType::Double),
        _ => None,
    }
}

fn read_error(err: ArrayError) -> ReadError {
    match err {
        ArrayError::StorageError(e) => ReadError::Io(e.to_string()),
        other => ReadError::Corrupt(other.to_string()),
    }
}

// =============================================================================
// ZarrPixelBuffer
// =============================================================================

/// Pixel buffer over a Zarr v2 array on the local filesystem.
pub struct ZarrPixelBuffer {
    array: Array<FilesystemStore>,
    path: PathBuf,
    dims: Dimensions,
    closed: AtomicBool,
}

impl ZarrPixelBuffer {
    /// Open the array at `array_dir` and check it against `meta`.
    pub fn open(array_dir: &Path, meta: &ImageMeta) -> Result<Self, OpenError> {
        if !array_dir.join(".zarray").is_file() {
            return Err(OpenError::NotFound(format!(
                "{} is not a zarr array",
                array_dir.display()
            )));
        }

        let store = FilesystemStore::new(array_dir)
            .map_err(|e| OpenError::Io(format!("{}: {}", array_dir.display(), e)))?;
        let array = Array::open(Arc::new(store), "/")
            .map_err(|e| OpenError::Corrupt(format!("{}: {}", array_dir.display(), e)))?;

        match pixel_type_of(array.data_type()) {
            Some(pixel_type) if pixel_type == meta.pixel_type => {}
            Some(_) => {
                return Err(OpenError::Corrupt(format!(
                    "data type {:?} does not match pixel type {:?}",
                    array.data_type(),
                    meta.pixel_type
                )))
            }
            None => {
                return Err(OpenError::Corrupt(format!(
                    "unsupported data type {:?}",
                    array.data_type()
                )))
            }
        }

        let expected = [
            meta.size_t as u64,
            meta.size_c as u64,
            meta.size_z as u64,
            meta.size_y as u64,
            meta.size_x as u64,
        ];
        if array.shape() != expected {
            return Err(OpenError::Corrupt(format!(
                "shape {:?} does not match [t, c, z, y, x] = {:?}",
                array.shape(),
                expected
            )));
        }

        debug!(
            path = %array_dir.display(),
            shape = ?array.shape(),
            data_type = ?array.data_type(),
            "Opened zarr array"
        );

        Ok(Self {
            array,
            path: array_dir.to_path_buf(),
            dims: Dimensions::from_meta(meta),
            closed: AtomicBool::new(false),
        })
    }

    fn retrieve<T: ElementOwned>(&self, subset: &ArraySubset) -> Result<Vec<T>, ReadError> {
        self.array
            .retrieve_array_subset_elements::<T>(subset)
            .map_err(read_error)
    }
}

impl PixelBuffer for ZarrPixelBuffer {
    fn kind(&self) -> BackendKind {
        BackendKind::Zarr
    }

    fn dimensions(&self) -> Dimensions {
        self.dims
    }

    fn read_tile(&self, region: Region, z: u32, t: u32, c: u32) -> Result<Tile, ReadError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ReadError::Closed);
        }
        self.dims.check_plane(z, t, c)?;
        let region = self.dims.clip(region)?;

        let single = |i: u32| -> Range<u64> { i as u64..i as u64 + 1 };
        let subset = ArraySubset::new_with_ranges(&[
            single(t),
            single(c),
            single(z),
            region.y as u64..region.y as u64 + region.height as u64,
            region.x as u64..region.x as u64 + region.width as u64,
        ]);

        let data = match self.dims.pixel_type {
            PixelType::Int8 => PixelData::I8(self.retrieve(&subset)?),
            PixelType::Uint8 => PixelData::U8(self.retrieve(&subset)?),
            PixelType::Int16 => PixelData::I16(self.retrieve(&subset)?),
            PixelType::Uint16 => PixelData::U16(self.retrieve(&subset)?),
            PixelType::Int32 => PixelData::I32(self.retrieve(&subset)?),
            PixelType::Uint32 => PixelData::U32(self.retrieve(&subset)?),
            PixelType::Float => PixelData::F32(self.retrieve(&subset)?),
            PixelType::Double => PixelData::F64(self.retrieve(&subset)?),
        };
        Ok(Tile::new(region, data))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(path = %self.path.display(), "Closed zarr array");
        }
    }
}

// =============================================================================
// ZarrFactory
// =============================================================================

/// Opens [`ZarrPixelBuffer`]s for images whose series has an NGFF array.
#[derive(Debug, Clone, Default)]
pub struct ZarrFactory;

impl ZarrFactory {
    pub fn new() -> Self {
        Self
    }

    /// `<ngff_root>/<fileset_id>.zarr`, if the locator names both parts.
    pub fn dataset_dir(meta: &ImageMeta) -> Option<PathBuf> {
        let root = meta.storage.ngff_root.as_ref()?;
        let fileset = meta.storage.fileset_id?;
        Some(root.join(format!("{}.zarr", fileset)))
    }

    /// Full-resolution array of the image's series.
    pub fn array_dir(meta: &ImageMeta) -> Option<PathBuf> {
        Self::dataset_dir(meta).map(|dir| dir.join(meta.storage.series.to_string()).join("0"))
    }
}

impl BackendFactory for ZarrFactory {
    fn kind(&self) -> BackendKind {
        BackendKind::Zarr
    }

    fn probe(&self, meta: &ImageMeta) -> bool {
        Self::array_dir(meta).is_some_and(|dir| dir.join(".zarray").is_file())
    }

    fn open(&self, meta: &ImageMeta) -> Result<Arc<dyn PixelBuffer>, OpenError> {
        let dir = Self::array_dir(meta).ok_or_else(|| {
            OpenError::NotFound(format!("image {} has no NGFF dataset", meta.image_id))
        })?;
        Ok(Arc::new(ZarrPixelBuffer::open(&dir, meta)?))
    }
}
