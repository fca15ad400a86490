//! Raster encoders.
//!
//! JPEG output drops the alpha channel, which the compositor always leaves
//! opaque. PNG output keeps RGBA.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};

use crate::error::EncodeError;
use crate::request::OutputFormat;

use super::engine::RenderedRaster;

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

/// Turns a rendered raster into encoded image bytes.
pub trait RasterEncoder: Send + Sync {
    /// Encode `raster` as `format`. `quality` only affects lossy formats.
    fn encode(
        &self,
        raster: &RenderedRaster,
        format: OutputFormat,
        quality: u8,
    ) -> Result<Bytes, EncodeError>;
}

/// Encoder backed by the `image` crate.
#[derive(Debug, Clone, Default)]
pub struct ImageRasterEncoder;

impl ImageRasterEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl RasterEncoder for ImageRasterEncoder {
    fn encode(
        &self,
        raster: &RenderedRaster,
        format: OutputFormat,
        quality: u8,
    ) -> Result<Bytes, EncodeError> {
        let expected = raster.width as usize * raster.height as usize;
        if expected == 0 || raster.pixels.len() != expected {
            return Err(EncodeError::Failed(format!(
                "{}x{} raster holds {} pixels",
                raster.width,
                raster.height,
                raster.pixels.len()
            )));
        }

        let mut output = Vec::new();
        match format {
            OutputFormat::Jpeg => {
                let encoder = JpegEncoder::new_with_quality(&mut output, clamp_quality(quality));
                encoder.write_image(
                    &raster.rgb_bytes(),
                    raster.width,
                    raster.height,
                    ExtendedColorType::Rgb8,
                )
            }
            OutputFormat::Png => {
                let rgba: Vec<u8> = raster.pixels.iter().flatten().copied().collect();
                PngEncoder::new(&mut output).write_image(
                    &rgba,
                    raster.width,
                    raster.height,
                    ExtendedColorType::Rgba8,
                )
            }
        }
        .map_err(|e| EncodeError::Failed(e.to_string()))?;

        Ok(Bytes::from(output))
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Validate JPEG quality parameter.
///
/// Returns `true` if quality is in the valid range (1-100).
#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&quality)
}

/// Clamp quality to valid range.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}
