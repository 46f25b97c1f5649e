//! Host-side vector field, one contiguous buffer per component.
//!
//! Component `k` holds the displacement along physical axis `k`, in
//! physical units. Values are laid out like [`ImageBuffer`] (x fastest).
//!
//! [`ImageBuffer`]: crate::image::ImageBuffer

use rayon::prelude::*;

use crate::error::{CoreError, Result};
use crate::image::{ImageBuffer, ImageGrid};
use crate::interpolation::{Interpolator, LinearInterpolator};

#[derive(Debug, Clone, PartialEq)]
pub struct FieldBuffer<const D: usize> {
    grid: ImageGrid<D>,
    components: [Vec<f32>; D],
}

impl<const D: usize> FieldBuffer<D> {
    pub fn new(grid: ImageGrid<D>, components: [Vec<f32>; D]) -> Result<Self> {
        let expected = grid.num_voxels();
        if let Some(bad) = components.iter().find(|c| c.len() != expected) {
            return Err(CoreError::ShapeMismatch {
                expected: vec![expected],
                actual: vec![bad.len()],
            });
        }
        Ok(Self { grid, components })
    }

    pub fn zeros(grid: ImageGrid<D>) -> Self {
        let n = grid.num_voxels();
        let components = std::array::from_fn(|_| vec![0.0f32; n]);
        Self { grid, components }
    }

    /// Field holding the same vector at every voxel.
    pub fn uniform(grid: ImageGrid<D>, vector: [f64; D]) -> Self {
        let n = grid.num_voxels();
        let components = std::array::from_fn(|k| vec![vector[k] as f32; n]);
        Self { grid, components }
    }

    pub fn grid(&self) -> &ImageGrid<D> {
        &self.grid
    }

    pub fn len(&self) -> usize {
        self.grid.num_voxels()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn component(&self, k: usize) -> &[f32] {
        &self.components[k]
    }

    pub fn component_mut(&mut self, k: usize) -> &mut [f32] {
        &mut self.components[k]
    }

    pub fn components(&self) -> &[Vec<f32>; D] {
        &self.components
    }

    pub fn components_mut(&mut self) -> &mut [Vec<f32>; D] {
        &mut self.components
    }

    pub fn vector_at(&self, linear: usize) -> [f64; D] {
        std::array::from_fn(|k| self.components[k][linear] as f64)
    }

    pub fn set_vector(&mut self, linear: usize, vector: [f64; D]) {
        for k in 0..D {
            self.components[k][linear] = vector[k] as f32;
        }
    }

    /// Component `k` as a scalar image buffer on the same grid.
    pub fn component_image(&self, k: usize) -> ImageBuffer<D> {
        let mut image = ImageBuffer::filled(self.grid.clone(), 0.0);
        image.values_mut().copy_from_slice(&self.components[k]);
        image
    }

    fn check_domain(&self, other: &Self) -> Result<()> {
        if !self.grid.same_domain(&other.grid) {
            return Err(CoreError::domain_mismatch(format!(
                "field grids differ: {} vs {}",
                self.grid.describe(),
                other.grid.describe()
            )));
        }
        Ok(())
    }

    /// `self += scale * other`
    pub fn add_scaled(&mut self, other: &Self, scale: f64) -> Result<()> {
        self.check_domain(other)?;
        let scale = scale as f32;
        for (dst, src) in self.components.iter_mut().zip(other.components.iter()) {
            dst.par_iter_mut()
                .zip(src.par_iter())
                .for_each(|(d, s)| *d += scale * s);
        }
        Ok(())
    }

    pub fn scale(&mut self, factor: f64) {
        let factor = factor as f32;
        for component in self.components.iter_mut() {
            component.par_iter_mut().for_each(|v| *v *= factor);
        }
    }

    pub fn scaled(&self, factor: f64) -> Self {
        let mut out = self.clone();
        out.scale(factor);
        out
    }

    /// Largest vector length measured in voxels of this grid.
    pub fn max_norm_in_voxels(&self) -> f64 {
        let spacing = *self.grid.spacing();
        (0..self.len())
            .into_par_iter()
            .map(|i| {
                (0..D)
                    .map(|k| {
                        let v = self.components[k][i] as f64 / spacing[k];
                        v * v
                    })
                    .sum::<f64>()
            })
            .reduce(|| 0.0, f64::max)
            .sqrt()
    }

    /// Largest absolute component difference to `other`.
    pub fn max_abs_diff(&self, other: &Self) -> Result<f64> {
        self.check_domain(other)?;
        let diff = self
            .components
            .iter()
            .zip(other.components.iter())
            .flat_map(|(a, b)| a.iter().zip(b.iter()))
            .map(|(a, b)| (a - b).abs() as f64)
            .fold(0.0, f64::max);
        Ok(diff)
    }

    pub fn is_zero(&self) -> bool {
        self.components.iter().all(|c| c.iter().all(|v| *v == 0.0))
    }

    /// Linear interpolation of the field at a continuous index; indices
    /// outside the grid are clamped to the border.
    pub fn sample(&self, index: &[f64; D]) -> [f64; D] {
        let interpolator = LinearInterpolator;
        std::array::from_fn(|k| {
            interpolator.evaluate(&self.components[k], &self.grid, index) as f64
        })
    }
}
