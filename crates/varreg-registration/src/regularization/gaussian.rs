//! Gaussian field smoothing.

use rayon::prelude::*;
use varreg_core::filter::GaussianFilter;
use varreg_core::FieldBuffer;

use super::trait_::Regularizer;
use crate::error::Result;

/// Separable Gaussian applied to every component independently.
#[derive(Debug, Clone)]
pub struct GaussianRegularizer {
    filter: GaussianFilter,
}

impl GaussianRegularizer {
    /// `sigmas` per axis, or one value for every axis.
    pub fn new(sigmas: Vec<f64>) -> Self {
        Self {
            filter: GaussianFilter::new(sigmas)
                .with_maximum_error(0.1)
                .with_max_kernel_width(30),
        }
    }

    pub fn with_maximum_error(mut self, maximum_error: f64) -> Self {
        self.filter = self.filter.with_maximum_error(maximum_error);
        self
    }

    pub fn with_max_kernel_width(mut self, width: usize) -> Self {
        self.filter = self.filter.with_max_kernel_width(width);
        self
    }

    /// With spacing disabled the sigmas are in voxels.
    pub fn with_image_spacing(mut self, use_image_spacing: bool) -> Self {
        self.filter = self.filter.with_image_spacing(use_image_spacing);
        self
    }

    pub fn filter(&self) -> &GaussianFilter {
        &self.filter
    }
}

impl<const D: usize> Regularizer<D> for GaussianRegularizer {
    fn regularize(&self, field: &FieldBuffer<D>) -> Result<FieldBuffer<D>> {
        let mut out = field.clone();
        let grid = field.grid().clone();
        out.components_mut()
            .as_mut_slice()
            .par_iter_mut()
            .for_each(|component| self.filter.apply_buffer(component, &grid));
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "gaussian"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use varreg_core::image::ImageGrid;

    #[test]
    fn test_uniform_field_is_unchanged() {
        let grid = ImageGrid::<2>::with_size([7, 5]);
        let field = FieldBuffer::uniform(grid, [0.3, -1.2]);
        let smoothed = Regularizer::<2>::regularize(&GaussianRegularizer::new(vec![1.5]), &field).unwrap();
        assert!(smoothed.max_abs_diff(&field).unwrap() < 1e-5);
    }

    #[test]
    fn test_impulse_spreads_and_keeps_mass() {
        let grid = ImageGrid::<2>::with_size([11, 11]);
        let mut field = FieldBuffer::zeros(grid.clone());
        let center = grid.linear_index(&[5, 5]);
        field.set_vector(center, [1.0, 0.0]);

        let smoothed = GaussianRegularizer::new(vec![1.0]).regularize(&field).unwrap();
        let peak = smoothed.component(0)[center];
        assert!(peak < 1.0 && peak > 0.0);
        assert!(smoothed.component(0)[grid.linear_index(&[6, 5])] > 0.0);
        let mass: f32 = smoothed.component(0).iter().sum();
        assert!((mass - 1.0).abs() < 1e-4);
        assert!(smoothed.component(1).iter().all(|v| *v == 0.0));
    }
}
