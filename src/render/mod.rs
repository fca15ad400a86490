//! Rendering pipeline.
//!
//! ```text
//! Tile per channel ──▶ RenderingEngine ──▶ RenderedRaster ──▶ RasterEncoder ──▶ bytes
//!                     (window, color,                        (JPEG / PNG)
//!                      blend, flip)
//! ```
//!
//! # Components
//!
//! - [`RenderingEngine`]: windows, colors and blends channels, then flips
//! - [`flip`]: mirror transform over any row-major raster
//! - [`RasterEncoder`] / [`ImageRasterEncoder`]: encodes the result

mod encoder;
mod engine;
mod flip;

pub use encoder::{
    clamp_quality, is_valid_quality, ImageRasterEncoder, RasterEncoder, DEFAULT_JPEG_QUALITY,
    MAX_JPEG_QUALITY, MIN_JPEG_QUALITY,
};
pub use engine::{RenderedRaster, RenderingEngine};
pub use flip::flip;
