//! Channel compositing.
//!
//! Each channel's samples are windowed to an 8-bit level, weighted by the
//! channel color and its alpha, and added into the output with saturation.
//! The integer arithmetic is exact, so identical inputs give identical
//! rasters on every platform.

use crate::buffer::Tile;
use crate::error::RenderError;
use crate::request::{ChannelSpec, Window};

use super::flip::flip;

/// `255 * 255`, the scale of `level * color * alpha` products.
const WEIGHT_SCALE: u32 = 65025;

/// Added before dividing by [`WEIGHT_SCALE`] to round half up.
const WEIGHT_ROUNDING: u32 = 32512;

/// An RGBA raster, row-major from the top-left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedRaster {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<[u8; 4]>,
}

impl RenderedRaster {
    /// Pixel at column `x`, row `y`.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.pixels[y as usize * self.width as usize + x as usize]
    }

    /// Packed RGBA bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.pixels.into_iter().flatten().collect()
    }

    /// Packed RGB bytes, alpha dropped.
    pub fn rgb_bytes(&self) -> Vec<u8> {
        self.pixels
            .iter()
            .flat_map(|&[r, g, b, _]| [r, g, b])
            .collect()
    }
}

/// Contribution of one color component at one level.
#[inline]
fn weigh(level: u8, component: u8, alpha: u8) -> u8 {
    ((level as u32 * component as u32 * alpha as u32 + WEIGHT_ROUNDING) / WEIGHT_SCALE) as u8
}

/// Composites per-channel tiles into a color raster.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderingEngine;

impl RenderingEngine {
    pub fn new() -> Self {
        Self
    }

    /// Blend `tiles` (one per entry of `specs`, same order) and apply flips.
    ///
    /// Channels without a window use the full range of their pixel type.
    pub fn render(
        &self,
        tiles: &[Tile],
        specs: &[ChannelSpec],
        flip_horizontal: bool,
        flip_vertical: bool,
    ) -> Result<RenderedRaster, RenderError> {
        let first = tiles
            .first()
            .ok_or_else(|| RenderError::InvalidArgument("no channels to render".to_string()))?;
        if tiles.len() != specs.len() {
            return Err(RenderError::InvalidArgument(format!(
                "{} tiles for {} channels",
                tiles.len(),
                specs.len()
            )));
        }

        let (width, height) = (first.width(), first.height());
        if let Some(tile) = tiles
            .iter()
            .find(|tile| tile.width() != width || tile.height() != height)
        {
            return Err(RenderError::InvalidArgument(format!(
                "tile of {}x{} does not match {}x{}",
                tile.width(),
                tile.height(),
                width,
                height
            )));
        }
        let area = width as usize * height as usize;
        if let Some(tile) = tiles.iter().find(|tile| tile.data.len() != area) {
            return Err(RenderError::InvalidArgument(format!(
                "tile holds {} samples, expected {}",
                tile.data.len(),
                area
            )));
        }

        let mut pixels = vec![[0u8, 0, 0, 255]; area];
        for (tile, spec) in tiles.iter().zip(specs) {
            let window = spec
                .window
                .unwrap_or_else(|| Window::for_pixel_type(tile.pixel_type()));
            let [r, g, b, alpha] = spec.color;

            for (i, pixel) in pixels.iter_mut().enumerate() {
                let level = window.level(tile.data.value(i));
                pixel[0] = pixel[0].saturating_add(weigh(level, r, alpha));
                pixel[1] = pixel[1].saturating_add(weigh(level, g, alpha));
                pixel[2] = pixel[2].saturating_add(weigh(level, b, alpha));
            }
        }

        if flip_horizontal || flip_vertical {
            pixels = flip(
                &pixels,
                width as usize,
                height as usize,
                flip_horizontal,
                flip_vertical,
            )?;
        }

        Ok(RenderedRaster {
            width,
            height,
            pixels,
        })
    }
}
