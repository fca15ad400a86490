//! Pixel buffer abstraction.
//!
//! This module provides a uniform, tile-addressed read interface over the
//! storage formats pixel data can live in.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          PixelBufferResolver            │
//! │   (selects a backend, caches handles)   │
//! └────────────────────┬────────────────────┘
//!                      │ BackendFactory::open
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │           PixelBuffer Trait             │
//! │  (dimensions, read_tile, close)         │
//! └────────────────────┬────────────────────┘
//!                      │
//!          ┌───────────┴───────────┐
//!          ▼                       ▼
//! ┌─────────────────┐    ┌─────────────────────┐
//! │ RawPixelBuffer  │    │  ZarrPixelBuffer    │
//! │ (legacy planes) │    │  (chunked array)    │
//! └─────────────────┘    └─────────────────────┘
//! ```
//!
//! Every backend returns tiles in the same logical layout (row-major, origin
//! at the top-left), so rendering never needs to know where pixels came from.

mod raw;
mod tile;
mod zarr;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{OpenError, ReadError};
use crate::meta::{ImageMeta, PixelType};

pub use raw::{LegacyFactory, RawPixelBuffer, LOCK_SUFFIX};
pub use tile::{encode_sample, ByteOrder, PixelData, Region, Tile};
pub use zarr::{ZarrFactory, ZarrPixelBuffer};

// =============================================================================
// Backend Kind
// =============================================================================

/// Storage formats a pixel buffer can be backed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Raw planes in the legacy binary repository
    Legacy,
    /// Chunked N-dimensional array (Zarr)
    Zarr,
    /// Dedicated array-storage engine sharing the Zarr dataset directory
    ArrayEngine,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Legacy => write!(f, "legacy"),
            BackendKind::Zarr => write!(f, "zarr"),
            BackendKind::ArrayEngine => write!(f, "array_engine"),
        }
    }
}

// =============================================================================
// Dimensions
// =============================================================================

/// Extents and sample type of an opened buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub size_x: u32,
    pub size_y: u32,
    pub size_z: u32,
    pub size_c: u32,
    pub size_t: u32,
    pub pixel_type: PixelType,
}

impl Dimensions {
    pub fn from_meta(meta: &ImageMeta) -> Self {
        Self {
            size_x: meta.size_x,
            size_y: meta.size_y,
            size_z: meta.size_z,
            size_c: meta.size_c,
            size_t: meta.size_t,
            pixel_type: meta.pixel_type,
        }
    }

    pub fn bit_depth(&self) -> u32 {
        self.pixel_type.bit_depth()
    }

    /// Check `z`, `t` and `c` against the extents.
    pub fn check_plane(&self, z: u32, t: u32, c: u32) -> Result<(), ReadError> {
        let checks = [
            ("z", z, self.size_z),
            ("t", t, self.size_t),
            ("channel", c, self.size_c),
        ];
        for (axis, index, size) in checks {
            if index >= size {
                return Err(ReadError::OutOfRange { axis, index, size });
            }
        }
        Ok(())
    }

    /// Clip `region` to the plane.
    pub fn clip(&self, region: Region) -> Result<Region, ReadError> {
        region
            .clip(self.size_x, self.size_y)
            .ok_or(ReadError::EmptyRegion {
                width: self.size_x,
                height: self.size_y,
            })
    }
}

// =============================================================================
// PixelBuffer Trait
// =============================================================================

/// Uniform read access to the pixels of one image.
///
/// Calls may block on I/O; callers run them off the async executor.
pub trait PixelBuffer: Send + Sync {
    /// Backend this buffer reads from.
    fn kind(&self) -> BackendKind;

    /// Extents and sample type.
    fn dimensions(&self) -> Dimensions;

    /// Read `region` of channel `c` at (`z`, `t`).
    ///
    /// The region is clipped to the plane; the returned tile reports the
    /// clipped rectangle and is never padded.
    fn read_tile(&self, region: Region, z: u32, t: u32, c: u32) -> Result<Tile, ReadError>;

    /// Release backend resources. Idempotent.
    fn close(&self);
}

// =============================================================================
// BackendFactory Trait
// =============================================================================

/// Opens pixel buffers of one backend kind.
///
/// The resolver keeps an ordered list of factories and opens the image with
/// the first one whose [`probe`](BackendFactory::probe) accepts it.
pub trait BackendFactory: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Whether this backend's prerequisites are present for `meta`.
    ///
    /// Must be cheap: only checks locator fields and well-known paths.
    fn probe(&self, meta: &ImageMeta) -> bool;

    /// Open a buffer for `meta`. May block.
    fn open(&self, meta: &ImageMeta) -> Result<Arc<dyn PixelBuffer>, OpenError>;
}
