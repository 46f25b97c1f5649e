//! Interpolator trait for sampling values at continuous indices.

use crate::image::ImageGrid;

/// Samples a scalar buffer laid out on `grid` at a continuous index.
///
/// Indices outside the grid are clamped to the border; callers that need
/// a different boundary policy check [`is_inside`] first.
pub trait Interpolator: Send + Sync {
    fn evaluate<const D: usize>(&self, values: &[f32], grid: &ImageGrid<D>, index: &[f64; D]) -> f32;
}

/// Whether a continuous index lies within the sampled extent of `grid`.
pub fn is_inside<const D: usize>(grid: &ImageGrid<D>, index: &[f64; D]) -> bool {
    let size = grid.size();
    (0..D).all(|axis| index[axis] >= -1e-6 && index[axis] <= (size[axis] as f64 - 1.0) + 1e-6)
}
