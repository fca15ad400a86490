//! Channel selection, colors and display windows.
//!
//! The `c` parameter lists channels as comma-separated items of the form
//! `[-]index[|min:max][$color]`:
//!
//! - `index` is 1-based; a leading `-` keeps the channel listed but inactive
//! - `min:max` is the display window, mapped onto the 0-255 output range
//! - `color` is `RRGGBBAA` (or `RRGGBB`, taken as opaque)
//!
//! For example `1|0:4095$FF0000FF,-2|0:255$00FF00FF` renders channel one in
//! red and carries channel two as inactive.

use crate::error::ValidationError;
use crate::meta::PixelType;

/// Opaque white, the color of channels that do not name one.
pub const WHITE: [u8; 4] = [255, 255, 255, 255];

/// Intensity range mapped to the visible output range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    pub min: f64,
    pub max: f64,
}

impl Window {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Full range of `pixel_type`.
    pub fn for_pixel_type(pixel_type: PixelType) -> Self {
        let (min, max) = pixel_type.default_window();
        Self { min, max }
    }

    /// Map `value` to an 8-bit output level.
    ///
    /// Values at or below `min` map to 0 and values at or above `max` to 255.
    /// A degenerate window acts as a threshold at `max`.
    #[inline]
    pub fn level(&self, value: f64) -> u8 {
        if self.max <= self.min {
            return if value >= self.max { 255 } else { 0 };
        }
        let scaled = ((value - self.min) / (self.max - self.min)).clamp(0.0, 1.0);
        (scaled * 255.0).round() as u8
    }
}

/// One entry of the channel list.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSpec {
    /// 0-based channel index
    pub index: u32,
    pub active: bool,
    /// RGBA
    pub color: [u8; 4],
    /// `None` until resolved against the pixel type
    pub window: Option<Window>,
}

impl ChannelSpec {
    /// An active white channel with the default window.
    pub fn new(index: u32) -> Self {
        Self {
            index,
            active: true,
            color: WHITE,
            window: None,
        }
    }

    pub fn with_color(mut self, color: [u8; 4]) -> Self {
        self.color = color;
        self
    }

    pub fn with_window(mut self, min: f64, max: f64) -> Self {
        self.window = Some(Window::new(min, max));
        self
    }
}

/// Parse the `c` parameter.
pub fn parse_channels(value: &str) -> Result<Vec<ChannelSpec>, ValidationError> {
    value.split(',').map(|item| parse_channel(item.trim())).collect()
}

fn parse_channel(item: &str) -> Result<ChannelSpec, ValidationError> {
    let (rest, color) = match item.split_once('$') {
        Some((rest, color)) => (rest, Some(split_color(color)?)),
        None => (item, None),
    };
    let (index, window) = match rest.split_once('|') {
        Some((index, window)) => (index, Some(parse_window(window)?)),
        None => (rest, None),
    };

    let index: i64 = index
        .trim()
        .parse()
        .map_err(|_| ValidationError::invalid("c", format!("bad channel index {:?}", index)))?;
    if index == 0 || index.unsigned_abs() > u32::MAX as u64 {
        return Err(ValidationError::invalid(
            "c",
            format!("channel index {} out of range", index),
        ));
    }

    Ok(ChannelSpec {
        index: (index.unsigned_abs() - 1) as u32,
        active: index > 0,
        color: color.unwrap_or(WHITE),
        window,
    })
}

fn parse_window(value: &str) -> Result<Window, ValidationError> {
    let bad = || ValidationError::invalid("c", format!("bad window {:?}", value));
    let (min, max) = value.split_once(':').ok_or_else(bad)?;
    let min: f64 = min.trim().parse().map_err(|_| bad())?;
    let max: f64 = max.trim().parse().map_err(|_| bad())?;
    if !min.is_finite() || !max.is_finite() {
        return Err(bad());
    }
    Ok(Window::new(min, max))
}

/// Split a hex color into RGBA components.
///
/// `RRGGBBAA` puts red in the most significant byte and alpha in the least.
/// `RRGGBB` is opaque.
pub fn split_color(value: &str) -> Result<[u8; 4], ValidationError> {
    let bad = || ValidationError::BadColor(value.to_string());
    if !value.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(bad());
    }
    let packed = u32::from_str_radix(value, 16).map_err(|_| bad())?;
    match value.len() {
        8 => Ok(packed.to_be_bytes()),
        6 => {
            let [_, r, g, b] = packed.to_be_bytes();
            Ok([r, g, b, 255])
        }
        _ => Err(bad()),
    }
}
