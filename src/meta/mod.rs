//! Image metadata.
//!
//! The core never owns image metadata: it asks a [`MetadataSource`] for an
//! [`ImageMeta`] on every request and treats the result as read-only. The
//! metadata carries the 5-D extents, the pixel type and a [`StorageLocator`]
//! that backends use to find their files.

mod source;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::buffer::BackendKind;

pub use source::{DirectoryMetadataSource, MetadataSource};

// =============================================================================
// Pixel Type
// =============================================================================

/// Sample type of an image, named as in OME metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelType {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float,
    Double,
}

impl PixelType {
    /// Size of a single sample in bytes.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            PixelType::Int8 | PixelType::Uint8 => 1,
            PixelType::Int16 | PixelType::Uint16 => 2,
            PixelType::Int32 | PixelType::Uint32 | PixelType::Float => 4,
            PixelType::Double => 8,
        }
    }

    /// Bit depth of a sample.
    pub fn bit_depth(self) -> u32 {
        self.bytes_per_sample() as u32 * 8
    }

    /// Default display range for the type.
    ///
    /// Integer types map their full range; floating point data is assumed
    /// to be normalized to `[0, 1]`.
    pub fn default_window(self) -> (f64, f64) {
        match self {
            PixelType::Int8 => (i8::MIN as f64, i8::MAX as f64),
            PixelType::Uint8 => (0.0, u8::MAX as f64),
            PixelType::Int16 => (i16::MIN as f64, i16::MAX as f64),
            PixelType::Uint16 => (0.0, u16::MAX as f64),
            PixelType::Int32 => (i32::MIN as f64, i32::MAX as f64),
            PixelType::Uint32 => (0.0, u32::MAX as f64),
            PixelType::Float | PixelType::Double => (0.0, 1.0),
        }
    }
}

// =============================================================================
// Storage Locator
// =============================================================================

/// Where the pixel data of an image lives.
///
/// Every field is optional; a backend only probes the fields it needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLocator {
    /// Path of the raw pixels file of the legacy repository
    #[serde(default)]
    pub pixels_path: Option<PathBuf>,

    /// Root directory that holds `<fileset_id>.zarr` datasets
    #[serde(default)]
    pub ngff_root: Option<PathBuf>,

    /// Identifier of the fileset backing the image
    #[serde(default)]
    pub fileset_id: Option<u64>,

    /// Series (image index) within the fileset
    #[serde(default)]
    pub series: u32,
}

// =============================================================================
// Image Metadata
// =============================================================================

/// Dimensional and storage metadata for one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMeta {
    pub image_id: u64,
    pub size_x: u32,
    pub size_y: u32,
    pub size_z: u32,
    pub size_c: u32,
    pub size_t: u32,
    pub pixel_type: PixelType,

    /// Forces a backend when set; otherwise the resolver picks one
    #[serde(default)]
    pub backend: Option<BackendKind>,

    #[serde(default)]
    pub storage: StorageLocator,
}

impl ImageMeta {
    /// Check that every extent is non-zero.
    pub fn validate(&self) -> Result<(), String> {
        let sizes = [
            ("size_x", self.size_x),
            ("size_y", self.size_y),
            ("size_z", self.size_z),
            ("size_c", self.size_c),
            ("size_t", self.size_t),
        ];
        for (name, size) in sizes {
            if size == 0 {
                return Err(format!("{} must be greater than 0", name));
            }
        }
        Ok(())
    }
}
