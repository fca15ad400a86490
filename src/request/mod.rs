//! Render request parsing.
//!
//! Requests arrive as a flat map of string parameters (path segments and
//! query string merged). [`RenderRequest::parse`] validates what it can
//! without touching storage; [`RenderRequest::resolve_against`] finishes the
//! job once the image metadata is known.

mod channel;

use std::collections::HashMap;
use std::fmt;

use crate::buffer::Region;
use crate::error::ValidationError;
use crate::meta::ImageMeta;

pub use channel::{parse_channels, split_color, ChannelSpec, Window, WHITE};

/// Raw request parameters keyed by name.
pub type RawParams = HashMap<String, String>;

/// Edge length of a `tile=` request that does not give one.
pub const DEFAULT_TILE_SIZE: u32 = 512;

/// Quality used when `q` is absent, as a fraction.
pub const DEFAULT_QUALITY: f64 = 0.9;

// =============================================================================
// Enumerations
// =============================================================================

/// How channels are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderModel {
    /// Additive blend of every active channel in its color
    #[default]
    Color,
    /// First active channel only, in white
    Greyscale,
}

/// Encoded output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Jpeg,
    Png,
}

impl OutputFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Jpeg => write!(f, "jpeg"),
            OutputFormat::Png => write!(f, "png"),
        }
    }
}

// =============================================================================
// Defaults
// =============================================================================

/// Values used for parameters a request leaves out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestDefaults {
    /// JPEG quality, 1-100
    pub quality: u8,
}

impl Default for RequestDefaults {
    fn default() -> Self {
        Self {
            quality: scale_quality(DEFAULT_QUALITY),
        }
    }
}

// =============================================================================
// RenderRequest
// =============================================================================

/// A validated request to render one region of one plane.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub image_id: u64,
    pub z: u32,
    pub t: u32,
    /// `None` renders the whole plane
    pub region: Option<Region>,
    /// Empty means every channel of the image
    pub channels: Vec<ChannelSpec>,
    pub model: RenderModel,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
    pub format: OutputFormat,
    /// JPEG quality, 1-100
    pub quality: u8,
}

impl RenderRequest {
    /// Parse raw parameters.
    ///
    /// Regions are kept as given; bounds are checked in
    /// [`resolve_against`](Self::resolve_against).
    pub fn parse(params: &RawParams) -> Result<Self, ValidationError> {
        Self::parse_with(params, &RequestDefaults::default())
    }

    /// Parse raw parameters, filling omitted ones from `defaults`.
    pub fn parse_with(
        params: &RawParams,
        defaults: &RequestDefaults,
    ) -> Result<Self, ValidationError> {
        let image_id = parse_id::<u64>(params, "imageId")?;
        let z = parse_id::<u32>(params, "theZ")?;
        let t = parse_id::<u32>(params, "theT")?;

        let region = match (get(params, "region"), get(params, "tile")) {
            (Some(region), _) => Some(parse_region(region)?),
            (None, Some(tile)) => Some(parse_tile(tile)?),
            (None, None) => None,
        };

        let channels = match get(params, "c") {
            Some(c) => parse_channels(c)?,
            None => Vec::new(),
        };

        let model = match get(params, "m").map(|m| m.to_ascii_lowercase()) {
            None => RenderModel::Color,
            Some(m) if m == "c" => RenderModel::Color,
            Some(m) if m == "g" => RenderModel::Greyscale,
            Some(m) => return Err(ValidationError::invalid("m", format!("unknown model {:?}", m))),
        };

        let flip = get(params, "flip").unwrap_or_default().to_ascii_lowercase();

        let format = match get(params, "format").map(|f| f.to_ascii_lowercase()) {
            None => OutputFormat::Jpeg,
            Some(f) if f == "jpeg" || f == "jpg" => OutputFormat::Jpeg,
            Some(f) if f == "png" => OutputFormat::Png,
            Some(f) => {
                return Err(ValidationError::invalid(
                    "format",
                    format!("unsupported format {:?}", f),
                ))
            }
        };

        let quality = match get(params, "q") {
            Some(q) => parse_quality(q)?,
            None => defaults.quality,
        };

        Ok(Self {
            image_id,
            z,
            t,
            region,
            channels,
            model,
            flip_horizontal: flip.contains('h'),
            flip_vertical: flip.contains('v'),
            format,
            quality,
        })
    }

    /// Check the request against `meta` and fill in defaults.
    ///
    /// The returned request has a region, a window on every channel, and only
    /// the channels that will be rendered, in request order.
    pub fn resolve_against(&self, meta: &ImageMeta) -> Result<RenderRequest, ValidationError> {
        if self.z >= meta.size_z {
            return Err(ValidationError::OutOfRange(format!(
                "theZ {} outside 0..{}",
                self.z, meta.size_z
            )));
        }
        if self.t >= meta.size_t {
            return Err(ValidationError::OutOfRange(format!(
                "theT {} outside 0..{}",
                self.t, meta.size_t
            )));
        }

        let region = match self.region {
            Some(region) if region.x >= meta.size_x || region.y >= meta.size_y => {
                return Err(ValidationError::OutOfRange(format!(
                    "region origin {},{} outside the {}x{} plane",
                    region.x, region.y, meta.size_x, meta.size_y
                )));
            }
            Some(region) => region,
            None => Region::full(meta.size_x, meta.size_y),
        };

        let requested = if self.channels.is_empty() {
            (0..meta.size_c).map(ChannelSpec::new).collect()
        } else {
            self.channels.clone()
        };
        if let Some(spec) = requested.iter().find(|spec| spec.index >= meta.size_c) {
            return Err(ValidationError::OutOfRange(format!(
                "channel {} outside 1..={}",
                spec.index + 1,
                meta.size_c
            )));
        }

        let default_window = Window::for_pixel_type(meta.pixel_type);
        let mut channels: Vec<ChannelSpec> = requested
            .into_iter()
            .filter(|spec| spec.active)
            .map(|spec| ChannelSpec {
                window: Some(spec.window.unwrap_or(default_window)),
                ..spec
            })
            .collect();

        if self.model == RenderModel::Greyscale {
            channels.truncate(1);
            if let Some(first) = channels.first_mut() {
                first.color = WHITE;
            }
        }

        if channels.is_empty() {
            return Err(ValidationError::invalid("c", "no active channels"));
        }

        Ok(RenderRequest {
            region: Some(region),
            channels,
            ..self.clone()
        })
    }
}

// =============================================================================
// Field Parsers
// =============================================================================

fn get<'a>(params: &'a RawParams, key: &str) -> Option<&'a str> {
    params.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

/// Identifiers must be present and numeric.
fn parse_id<T: std::str::FromStr>(
    params: &RawParams,
    key: &'static str,
) -> Result<T, ValidationError> {
    let value = get(params, key).ok_or(ValidationError::MissingField(key))?;
    if value.starts_with('-') {
        return Err(ValidationError::invalid(key, "must not be negative"));
    }
    value.parse().map_err(|_| ValidationError::MissingField(key))
}

fn parse_numbers(field: &'static str, value: &str) -> Result<Vec<u32>, ValidationError> {
    value
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<u32>()
                .map_err(|_| ValidationError::invalid(field, format!("bad number {:?}", part)))
        })
        .collect()
}

/// `x,y,width,height`
fn parse_region(value: &str) -> Result<Region, ValidationError> {
    match parse_numbers("region", value)?.as_slice() {
        [_, _, 0, _] | [_, _, _, 0] => Err(ValidationError::invalid(
            "region",
            "width and height must be positive",
        )),
        &[x, y, width, height] => Ok(Region::new(x, y, width, height)),
        _ => Err(ValidationError::invalid(
            "region",
            "expected x,y,width,height",
        )),
    }
}

/// `level,column,row[,width,height]`, addressing a grid of tiles.
fn parse_tile(value: &str) -> Result<Region, ValidationError> {
    let numbers = parse_numbers("tile", value)?;
    let (level, column, row, width, height) = match numbers.as_slice() {
        &[level, column, row] => (level, column, row, DEFAULT_TILE_SIZE, DEFAULT_TILE_SIZE),
        &[level, column, row, width, height] => (level, column, row, width, height),
        _ => {
            return Err(ValidationError::invalid(
                "tile",
                "expected level,x,y or level,x,y,width,height",
            ))
        }
    };
    if level != 0 {
        return Err(ValidationError::invalid(
            "tile",
            "only resolution level 0 is available",
        ));
    }
    if width == 0 || height == 0 {
        return Err(ValidationError::invalid(
            "tile",
            "width and height must be positive",
        ));
    }
    let x = column
        .checked_mul(width)
        .ok_or_else(|| ValidationError::invalid("tile", "tile origin overflows"))?;
    let y = row
        .checked_mul(height)
        .ok_or_else(|| ValidationError::invalid("tile", "tile origin overflows"))?;
    Ok(Region::new(x, y, width, height))
}

fn parse_quality(value: &str) -> Result<u8, ValidationError> {
    let q: f64 = value
        .parse()
        .map_err(|_| ValidationError::invalid("q", format!("bad quality {:?}", value)))?;
    if !(q > 0.0 && q <= 1.0) {
        return Err(ValidationError::invalid("q", "quality must be in (0, 1]"));
    }
    Ok(scale_quality(q))
}

fn scale_quality(q: f64) -> u8 {
    (q * 100.0).round().clamp(1.0, 100.0) as u8
}
