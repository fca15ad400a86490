//! Mirror transforms over row-major rasters.

use crate::error::RenderError;

/// Mirror a row-major `size_x` by `size_y` raster.
///
/// With `horizontal`, output column `size_x - 1 - c` takes source column `c`;
/// with `vertical`, output row `size_y - 1 - r` takes source row `r`. With
/// neither, the source is copied unchanged.
pub fn flip<T: Copy>(
    src: &[T],
    size_x: usize,
    size_y: usize,
    horizontal: bool,
    vertical: bool,
) -> Result<Vec<T>, RenderError> {
    if src.is_empty() {
        return Err(RenderError::InvalidArgument(
            "cannot flip an empty raster".to_string(),
        ));
    }
    if size_x == 0 || size_y == 0 {
        return Err(RenderError::InvalidArgument(format!(
            "cannot flip a {}x{} raster",
            size_x, size_y
        )));
    }
    if size_x.checked_mul(size_y) != Some(src.len()) {
        return Err(RenderError::InvalidArgument(format!(
            "{}x{} raster needs {} samples, got {}",
            size_x,
            size_y,
            size_x.saturating_mul(size_y),
            src.len()
        )));
    }

    let mut out = Vec::with_capacity(src.len());
    for row in 0..size_y {
        let src_row = if vertical { size_y - 1 - row } else { row };
        let line = &src[src_row * size_x..(src_row + 1) * size_x];
        if horizontal {
            out.extend(line.iter().rev());
        } else {
            out.extend_from_slice(line);
        }
    }
    Ok(out)
}
