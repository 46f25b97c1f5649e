//! Tensor-backed vector field with physical metadata.
//!
//! Stored as one tensor per component so the per-axis filters can treat
//! each component like a scalar image.

use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};

use crate::error::{CoreError, Result};
use crate::field::FieldBuffer;
use crate::image::ImageGrid;
use crate::spatial::{Direction, Point, Spacing};

#[derive(Debug, Clone)]
pub struct VectorField<B: Backend, const D: usize> {
    components: Vec<Tensor<B, D>>,
    origin: Point<D>,
    spacing: Spacing<D>,
    direction: Direction<D>,
}

impl<B: Backend, const D: usize> VectorField<B, D> {
    pub fn new(
        components: Vec<Tensor<B, D>>,
        origin: Point<D>,
        spacing: Spacing<D>,
        direction: Direction<D>,
    ) -> Result<Self> {
        if components.len() != D {
            return Err(CoreError::ShapeMismatch {
                expected: vec![D],
                actual: vec![components.len()],
            });
        }
        let dims = components[0].dims();
        if let Some(bad) = components.iter().find(|c| c.dims() != dims) {
            return Err(CoreError::ShapeMismatch {
                expected: dims.to_vec(),
                actual: bad.dims().to_vec(),
            });
        }
        Ok(Self {
            components,
            origin,
            spacing,
            direction,
        })
    }

    pub fn zeros(grid: &ImageGrid<D>, device: &B::Device) -> Self {
        let components = (0..D)
            .map(|_| Tensor::<B, D>::zeros(grid.tensor_shape(), device))
            .collect();
        Self {
            components,
            origin: *grid.origin(),
            spacing: *grid.spacing(),
            direction: *grid.direction(),
        }
    }

    pub fn from_buffer(buffer: &FieldBuffer<D>, device: &B::Device) -> Self {
        let grid = buffer.grid();
        let components = buffer
            .components()
            .iter()
            .map(|values| {
                Tensor::<B, D>::from_data(
                    TensorData::new(values.clone(), grid.tensor_shape().to_vec()),
                    device,
                )
            })
            .collect();
        Self {
            components,
            origin: *grid.origin(),
            spacing: *grid.spacing(),
            direction: *grid.direction(),
        }
    }

    pub fn to_buffer(&self) -> Result<FieldBuffer<D>> {
        let grid = self.grid();
        let mut components: [Vec<f32>; D] = std::array::from_fn(|_| Vec::new());
        for (k, tensor) in self.components.iter().enumerate() {
            components[k] = tensor
                .clone()
                .into_data()
                .to_vec::<f32>()
                .map_err(|e| CoreError::tensor_data(format!("{e:?}")))?;
        }
        FieldBuffer::new(grid, components)
    }

    pub fn components(&self) -> &[Tensor<B, D>] {
        &self.components
    }

    pub fn component(&self, k: usize) -> &Tensor<B, D> {
        &self.components[k]
    }

    pub fn origin(&self) -> &Point<D> {
        &self.origin
    }

    pub fn spacing(&self) -> &Spacing<D> {
        &self.spacing
    }

    pub fn direction(&self) -> &Direction<D> {
        &self.direction
    }

    pub fn grid(&self) -> ImageGrid<D> {
        ImageGrid::from_tensor_shape(
            self.components[0].dims(),
            self.origin,
            self.spacing,
            self.direction,
        )
    }

    /// Multiply every component by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        let components = self
            .components
            .iter()
            .map(|c| c.clone().mul_scalar(factor))
            .collect();
        Self {
            components,
            ..self.clone()
        }
    }

    /// `self + scale * other`, evaluated on the tensor backend.
    pub fn add_scaled(&self, other: &Self, scale: f64) -> Result<Self> {
        if !self.grid().same_domain(&other.grid()) {
            return Err(CoreError::domain_mismatch(format!(
                "field grids differ: {} vs {}",
                self.grid().describe(),
                other.grid().describe()
            )));
        }
        let components = self
            .components
            .iter()
            .zip(other.components.iter())
            .map(|(a, b)| a.clone() + b.clone().mul_scalar(scale))
            .collect();
        Ok(Self {
            components,
            ..self.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type Backend = NdArray<f32>;

    #[test]
    fn test_component_count_is_checked() {
        let device = Default::default();
        let comp = Tensor::<Backend, 2>::zeros([4, 4], &device);
        let result = VectorField::new(
            vec![comp],
            Point::origin(),
            Spacing::uniform(1.0),
            Direction::identity(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_buffer_roundtrip_and_arithmetic() {
        let device = Default::default();
        let grid = ImageGrid::<2>::with_size([3, 2]);
        let buffer = FieldBuffer::uniform(grid.clone(), [1.0, -2.0]);
        let field = VectorField::<Backend, 2>::from_buffer(&buffer, &device);
        assert!(field.grid().same_domain(&grid));

        let sum = field.add_scaled(&field.scaled(2.0), 0.5).unwrap();
        let host = sum.to_buffer().unwrap();
        assert_eq!(host.vector_at(5), [2.0, -4.0]);
    }
}
