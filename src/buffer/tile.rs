//! Regions, tiles and typed sample storage.

use crate::meta::PixelType;

// =============================================================================
// Region
// =============================================================================

/// A rectangle on an image plane, in pixels, origin at top-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The whole `size_x` by `size_y` plane.
    pub fn full(size_x: u32, size_y: u32) -> Self {
        Self::new(0, 0, size_x, size_y)
    }

    /// Number of pixels covered.
    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Intersect with `[0, size_x) x [0, size_y)`.
    ///
    /// Returns `None` when the intersection is empty.
    pub fn clip(&self, size_x: u32, size_y: u32) -> Option<Region> {
        if self.x >= size_x || self.y >= size_y || self.width == 0 || self.height == 0 {
            return None;
        }
        let x_end = (self.x as u64 + self.width as u64).min(size_x as u64);
        let y_end = (self.y as u64 + self.height as u64).min(size_y as u64);
        Some(Region {
            x: self.x,
            y: self.y,
            width: (x_end - self.x as u64) as u32,
            height: (y_end - self.y as u64) as u32,
        })
    }
}

// =============================================================================
// Byte Order
// =============================================================================

/// Byte order of stored samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

// =============================================================================
// Pixel Data
// =============================================================================

/// Typed, row-major samples of a tile.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelData {
    I8(Vec<i8>),
    U8(Vec<u8>),
    I16(Vec<i16>),
    U16(Vec<u16>),
    I32(Vec<i32>),
    U32(Vec<u32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

macro_rules! decode_samples {
    ($ty:ty, $bytes:expr, $order:expr) => {{
        const N: usize = std::mem::size_of::<$ty>();
        $bytes
            .chunks_exact(N)
            .map(|chunk| {
                let mut raw = [0u8; N];
                raw.copy_from_slice(chunk);
                match $order {
                    ByteOrder::Little => <$ty>::from_le_bytes(raw),
                    ByteOrder::Big => <$ty>::from_be_bytes(raw),
                }
            })
            .collect::<Vec<$ty>>()
    }};
}

impl PixelData {
    /// Decode packed samples of `pixel_type` stored in `order`.
    ///
    /// Trailing bytes that do not form a whole sample are ignored.
    pub fn decode(pixel_type: PixelType, bytes: &[u8], order: ByteOrder) -> Self {
        match pixel_type {
            PixelType::Int8 => PixelData::I8(decode_samples!(i8, bytes, order)),
            PixelType::Uint8 => PixelData::U8(bytes.to_vec()),
            PixelType::Int16 => PixelData::I16(decode_samples!(i16, bytes, order)),
            PixelType::Uint16 => PixelData::U16(decode_samples!(u16, bytes, order)),
            PixelType::Int32 => PixelData::I32(decode_samples!(i32, bytes, order)),
            PixelType::Uint32 => PixelData::U32(decode_samples!(u32, bytes, order)),
            PixelType::Float => PixelData::F32(decode_samples!(f32, bytes, order)),
            PixelType::Double => PixelData::F64(decode_samples!(f64, bytes, order)),
        }
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        match self {
            PixelData::I8(v) => v.len(),
            PixelData::U8(v) => v.len(),
            PixelData::I16(v) => v.len(),
            PixelData::U16(v) => v.len(),
            PixelData::I32(v) => v.len(),
            PixelData::U32(v) => v.len(),
            PixelData::F32(v) => v.len(),
            PixelData::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sample `index` widened to `f64`.
    #[inline]
    pub fn value(&self, index: usize) -> f64 {
        match self {
            PixelData::I8(v) => v[index] as f64,
            PixelData::U8(v) => v[index] as f64,
            PixelData::I16(v) => v[index] as f64,
            PixelData::U16(v) => v[index] as f64,
            PixelData::I32(v) => v[index] as f64,
            PixelData::U32(v) => v[index] as f64,
            PixelData::F32(v) => v[index] as f64,
            PixelData::F64(v) => v[index],
        }
    }

    pub fn pixel_type(&self) -> PixelType {
        match self {
            PixelData::I8(_) => PixelType::Int8,
            PixelData::U8(_) => PixelType::Uint8,
            PixelData::I16(_) => PixelType::Int16,
            PixelData::U16(_) => PixelType::Uint16,
            PixelData::I32(_) => PixelType::Int32,
            PixelData::U32(_) => PixelType::Uint32,
            PixelData::F32(_) => PixelType::Float,
            PixelData::F64(_) => PixelType::Double,
        }
    }
}

/// Encode a single sample value as `pixel_type` bytes in `order`.
///
/// Values are saturated into the range of integer types.
pub fn encode_sample(pixel_type: PixelType, value: f64, order: ByteOrder) -> Vec<u8> {
    macro_rules! bytes_of {
        ($v:expr) => {
            match order {
                ByteOrder::Little => $v.to_le_bytes().to_vec(),
                ByteOrder::Big => $v.to_be_bytes().to_vec(),
            }
        };
    }
    match pixel_type {
        PixelType::Int8 => bytes_of!(value as i8),
        PixelType::Uint8 => bytes_of!(value as u8),
        PixelType::Int16 => bytes_of!(value as i16),
        PixelType::Uint16 => bytes_of!(value as u16),
        PixelType::Int32 => bytes_of!(value as i32),
        PixelType::Uint32 => bytes_of!(value as u32),
        PixelType::Float => bytes_of!(value as f32),
        PixelType::Double => bytes_of!(value),
    }
}

// =============================================================================
// Tile
// =============================================================================

/// Raw pixels of one channel at one (Z, T), row-major from the top-left.
///
/// `region` is the rectangle actually read, which may be smaller than the
/// one requested when the request crossed the plane edge.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    pub region: Region,
    pub data: PixelData,
}

impl Tile {
    pub fn new(region: Region, data: PixelData) -> Self {
        Self { region, data }
    }

    pub fn width(&self) -> u32 {
        self.region.width
    }

    pub fn height(&self) -> u32 {
        self.region.height
    }

    pub fn pixel_type(&self) -> PixelType {
        self.data.pixel_type()
    }

    pub fn bit_depth(&self) -> u32 {
        self.pixel_type().bit_depth()
    }

    /// Sample at column `col`, row `row` of the tile.
    #[inline]
    pub fn value(&self, col: u32, row: u32) -> f64 {
        self.data
            .value(row as usize * self.region.width as usize + col as usize)
    }
}
