//! Subsampling by integer shrink factors.

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};

use crate::image::Image;

/// Keeps every `factors[axis]`-th sample starting at index 0.
///
/// The physical position of the first sample, and therefore the origin,
/// is unchanged; spacing is multiplied by the factor.
#[derive(Debug, Clone)]
pub struct DownsampleFilter<const D: usize> {
    factors: [usize; D],
}

impl<const D: usize> DownsampleFilter<D> {
    pub fn new(factors: [usize; D]) -> Self {
        Self { factors }
    }

    pub fn factors(&self) -> &[usize; D] {
        &self.factors
    }

    pub fn apply<B: Backend>(&self, image: &Image<B, D>) -> Image<B, D> {
        let mut data = image.data().clone();
        let device = data.device();
        let dims: [usize; D] = data.dims();

        for axis in 0..D {
            let factor = self.factors[axis];
            if factor <= 1 {
                continue;
            }
            let dim = D - 1 - axis;
            let kept: Vec<i64> = (0..dims[dim]).step_by(factor).map(|i| i as i64).collect();
            let count = kept.len();
            let indices =
                Tensor::<B, 1, Int>::from_data(TensorData::new(kept, [count]), &device);
            data = data.select(dim, indices);
        }

        let grid = image.grid().shrink(&self.factors);
        Image::new(data, *grid.origin(), *grid.spacing(), *grid.direction())
    }
}
