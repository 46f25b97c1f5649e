//! Image warper: resamples an image through a displacement field.
//!
//! The output lies on the field grid; the value at `x` is the input
//! sampled at the physical point `x + u(x)`.

use burn::tensor::backend::Backend;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::field::{FieldBuffer, VectorField};
use crate::image::{Image, ImageBuffer};
use crate::interpolation::{is_inside, Interpolator, LinearInterpolator};

/// Value used for points mapped outside the input image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum BoundaryPolicy {
    /// Nearest border value (continuous extension).
    #[default]
    Clamp,
    /// A fixed padding value.
    Constant(f32),
}

#[derive(Debug, Clone, Default)]
pub struct WarpImageFilter {
    boundary: BoundaryPolicy,
    interpolator: LinearInterpolator,
}

impl WarpImageFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_boundary(mut self, boundary: BoundaryPolicy) -> Self {
        self.boundary = boundary;
        self
    }

    pub fn boundary(&self) -> BoundaryPolicy {
        self.boundary
    }

    pub fn warp<const D: usize>(&self, input: &ImageBuffer<D>, field: &FieldBuffer<D>) -> ImageBuffer<D> {
        let out_grid = field.grid();
        let in_grid = input.grid();
        let values: Vec<f32> = (0..out_grid.num_voxels())
            .into_par_iter()
            .map(|linear| {
                let index = out_grid.multi_index(linear).map(|i| i as f64);
                let mut point = out_grid.index_to_physical(&index);
                let u = field.vector_at(linear);
                for k in 0..D {
                    point[k] += u[k];
                }
                let source = in_grid.physical_to_index(&point);
                match self.boundary {
                    BoundaryPolicy::Constant(pad) if !is_inside(in_grid, &source) => pad,
                    _ => self.interpolator.evaluate(input.values(), in_grid, &source),
                }
            })
            .collect();
        let mut out = ImageBuffer::filled(out_grid.clone(), 0.0);
        out.values_mut().copy_from_slice(&values);
        out
    }

    /// Tensor-level convenience around [`WarpImageFilter::warp`].
    pub fn warp_image<B: Backend, const D: usize>(
        &self,
        input: &Image<B, D>,
        field: &VectorField<B, D>,
    ) -> Result<Image<B, D>> {
        let warped = self.warp(&input.to_buffer()?, &field.to_buffer()?);
        Ok(Image::from_buffer(&warped, &input.device()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageGrid;

    fn ramp() -> ImageBuffer<2> {
        let grid = ImageGrid::<2>::with_size([6, 4]);
        let values = (0..grid.num_voxels())
            .map(|i| grid.multi_index(i)[0] as f32)
            .collect();
        ImageBuffer::new(grid, values).unwrap()
    }

    #[test]
    fn test_zero_field_is_identity() {
        let image = ramp();
        let field = FieldBuffer::zeros(image.grid().clone());
        assert_eq!(WarpImageFilter::new().warp(&image, &field), image);
    }

    #[test]
    fn test_shift_and_boundaries() {
        let image = ramp();
        let field = FieldBuffer::uniform(image.grid().clone(), [1.5, 0.0]);

        let clamped = WarpImageFilter::new().warp(&image, &field);
        assert!((clamped.get(&[0, 0]) - 1.5).abs() < 1e-6);
        assert_eq!(clamped.get(&[5, 2]), 5.0);

        let padded = WarpImageFilter::new()
            .with_boundary(BoundaryPolicy::Constant(-1.0))
            .warp(&image, &field);
        assert!((padded.get(&[2, 1]) - 3.5).abs() < 1e-6);
        assert_eq!(padded.get(&[5, 2]), -1.0);
    }
}
