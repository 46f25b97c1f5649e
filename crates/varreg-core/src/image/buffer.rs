//! Host-side copy of a scalar image used by the per-voxel passes.

use crate::error::{CoreError, Result};
use crate::image::ImageGrid;

#[derive(Debug, Clone, PartialEq)]
pub struct ImageBuffer<const D: usize> {
    grid: ImageGrid<D>,
    values: Vec<f32>,
}

impl<const D: usize> ImageBuffer<D> {
    pub fn new(grid: ImageGrid<D>, values: Vec<f32>) -> Result<Self> {
        if values.len() != grid.num_voxels() {
            return Err(CoreError::ShapeMismatch {
                expected: vec![grid.num_voxels()],
                actual: vec![values.len()],
            });
        }
        Ok(Self { grid, values })
    }

    pub fn filled(grid: ImageGrid<D>, value: f32) -> Self {
        let values = vec![value; grid.num_voxels()];
        Self { grid, values }
    }

    pub fn grid(&self) -> &ImageGrid<D> {
        &self.grid
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f32] {
        &mut self.values
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }

    pub fn get(&self, index: &[usize; D]) -> f32 {
        self.values[self.grid.linear_index(index)]
    }

    pub fn max_value(&self) -> f32 {
        self.values.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }
}
