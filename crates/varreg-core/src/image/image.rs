//! Scalar image with physical metadata.
//!
//! The tensor holds samples with dims in reverse axis order (`[H, W]` in
//! 2-D, `[D, H, W]` in 3-D) while origin, spacing and direction are given
//! in axis order (x first).

use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Tensor, TensorData};

use crate::error::{CoreError, Result};
use crate::image::{ImageBuffer, ImageGrid};
use crate::spatial::{Direction, Point, Spacing};

/// Image with tensor data and physical space metadata.
///
/// # Examples
/// ```rust
/// use varreg_core::Image;
/// use varreg_core::spatial::{Direction, Point, Spacing};
/// use burn::tensor::Tensor;
/// use burn_ndarray::NdArray;
///
/// type Backend = NdArray<f32>;
///
/// let device = Default::default();
/// let data = Tensor::<Backend, 3>::zeros([4, 8, 16], &device);
/// let image = Image::new(data, Point::origin(), Spacing::uniform(1.0), Direction::identity());
/// assert_eq!(image.size(), [16, 8, 4]);
/// ```
#[derive(Debug, Clone)]
pub struct Image<B: Backend, const D: usize> {
    data: Tensor<B, D>,
    origin: Point<D>,
    spacing: Spacing<D>,
    direction: Direction<D>,
}

impl<B: Backend, const D: usize> Image<B, D> {
    pub fn new(
        data: Tensor<B, D>,
        origin: Point<D>,
        spacing: Spacing<D>,
        direction: Direction<D>,
    ) -> Self {
        Self {
            data,
            origin,
            spacing,
            direction,
        }
    }

    /// Build an image from host samples laid out x fastest on `grid`.
    pub fn from_buffer(buffer: &ImageBuffer<D>, device: &B::Device) -> Self {
        let grid = buffer.grid();
        let data = Tensor::<B, D>::from_data(
            TensorData::new(buffer.values().to_vec(), grid.tensor_shape().to_vec()),
            device,
        );
        Self::new(data, *grid.origin(), *grid.spacing(), *grid.direction())
    }

    pub fn data(&self) -> &Tensor<B, D> {
        &self.data
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

    /// Tensor dims (reverse axis order).
    pub fn shape(&self) -> [usize; D] {
        self.data.dims()
    }

    /// Number of samples per axis (x first).
    pub fn size(&self) -> [usize; D] {
        let mut size = self.shape();
        size.reverse();
        size
    }

    pub fn grid(&self) -> ImageGrid<D> {
        ImageGrid::from_tensor_shape(self.shape(), self.origin, self.spacing, self.direction)
    }

    pub fn device(&self) -> B::Device {
        self.data.device()
    }

    /// Copy the samples to the host.
    pub fn to_buffer(&self) -> Result<ImageBuffer<D>> {
        let values = self
            .data
            .clone()
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| CoreError::tensor_data(format!("{e:?}")))?;
        ImageBuffer::new(self.grid(), values)
    }

    pub fn max_value(&self) -> f64 {
        self.data.clone().max().into_scalar().elem::<f64>()
    }

    /// Same metadata, new samples.
    pub fn with_data(&self, data: Tensor<B, D>) -> Self {
        Self::new(data, self.origin, self.spacing, self.direction)
    }
}
