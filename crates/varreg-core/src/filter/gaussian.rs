//! Separable discrete Gaussian smoothing.
//!
//! The same kernel drives two execution paths: a tensor path (burn
//! `conv1d`) for images on the backend, and a host path over flat buffers
//! for field components inside the registration loop. Both extend the
//! signal by replicating the border sample.

use burn::tensor::backend::Backend;
use burn::tensor::module::conv1d;
use burn::tensor::ops::ConvOptions;
use burn::tensor::{Shape, Tensor, TensorData};
use rayon::prelude::*;

use crate::image::{Image, ImageGrid};

/// Normalized symmetric Gaussian kernel for a standard deviation given in
/// voxels.
///
/// The radius is the smallest one whose truncated tail carries less than
/// `maximum_error` of the total mass, bounded so the width never exceeds
/// `max_kernel_width`.
pub fn gaussian_kernel(sigma: f64, maximum_error: f64, max_kernel_width: usize) -> Vec<f64> {
    if sigma <= 1e-6 {
        return vec![1.0];
    }
    let max_radius = max_kernel_width.max(1).saturating_sub(1) / 2;
    let full_radius = max_radius.max((6.0 * sigma).ceil() as usize);
    let two_sigma2 = 2.0 * sigma * sigma;
    let half: Vec<f64> = (0..=full_radius)
        .map(|i| (-((i * i) as f64) / two_sigma2).exp())
        .collect();
    let total: f64 = half[0] + 2.0 * half[1..].iter().sum::<f64>();

    let mut radius = 0;
    let mut mass = half[0];
    while radius < max_radius && mass < (1.0 - maximum_error) * total {
        radius += 1;
        mass += 2.0 * half[radius];
    }

    let mut kernel = Vec::with_capacity(2 * radius + 1);
    for i in (1..=radius).rev() {
        kernel.push(half[i]);
    }
    kernel.extend_from_slice(&half[..=radius]);
    let sum: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|w| *w /= sum);
    kernel
}

#[derive(Debug, Clone)]
pub struct GaussianFilter {
    sigmas: Vec<f64>,
    maximum_error: f64,
    max_kernel_width: usize,
    use_image_spacing: bool,
}

impl GaussianFilter {
    /// Standard deviations per axis (a single value applies to every axis),
    /// in physical units unless image spacing is disabled.
    pub fn new(sigmas: Vec<f64>) -> Self {
        Self {
            sigmas,
            maximum_error: 0.01,
            max_kernel_width: 32,
            use_image_spacing: true,
        }
    }

    pub fn with_maximum_error(mut self, maximum_error: f64) -> Self {
        self.maximum_error = maximum_error;
        self
    }

    pub fn with_max_kernel_width(mut self, width: usize) -> Self {
        self.max_kernel_width = width;
        self
    }

    /// When disabled, sigmas are interpreted in voxels.
    pub fn with_image_spacing(mut self, use_image_spacing: bool) -> Self {
        self.use_image_spacing = use_image_spacing;
        self
    }

    pub fn sigmas(&self) -> &[f64] {
        &self.sigmas
    }

    fn sigma(&self, axis: usize) -> f64 {
        match self.sigmas.get(axis) {
            Some(s) => *s,
            None => self.sigmas.first().copied().unwrap_or(0.0),
        }
    }

    /// Kernel for `axis` of a grid with the given spacing.
    pub fn kernel_for_axis(&self, axis: usize, spacing: f64) -> Vec<f64> {
        let sigma = if self.use_image_spacing {
            self.sigma(axis) / spacing
        } else {
            self.sigma(axis)
        };
        gaussian_kernel(sigma, self.maximum_error, self.max_kernel_width)
    }

    pub fn apply<B: Backend, const D: usize>(&self, image: &Image<B, D>) -> Image<B, D> {
        let mut data = image.data().clone();
        let device = data.device();
        for axis in 0..D {
            let kernel = self.kernel_for_axis(axis, image.spacing()[axis]);
            if kernel.len() == 1 {
                continue;
            }
            let weights: Vec<f32> = kernel.iter().map(|w| *w as f32).collect();
            let len = weights.len();
            let kernel_tensor = Tensor::<B, 1>::from_data(TensorData::new(weights, [len]), &device);
            // tensor dims are in reverse axis order
            data = convolve_tensor_dim(data, kernel_tensor, D - 1 - axis);
        }
        image.with_data(data)
    }

    /// Smooth a host buffer laid out on `grid` in place.
    pub fn apply_buffer<const D: usize>(&self, values: &mut [f32], grid: &ImageGrid<D>) {
        let mut scratch = vec![0.0f32; values.len()];
        for axis in 0..D {
            let kernel = self.kernel_for_axis(axis, grid.spacing()[axis]);
            if kernel.len() == 1 {
                continue;
            }
            convolve_buffer_axis(values, &mut scratch, grid, axis, &kernel);
            values.copy_from_slice(&scratch);
        }
    }
}

/// Convolve every line along `axis` of `input` with `kernel` into `output`.
pub(crate) fn convolve_buffer_axis<const D: usize>(
    input: &[f32],
    output: &mut [f32],
    grid: &ImageGrid<D>,
    axis: usize,
    kernel: &[f64],
) {
    let radius = (kernel.len() / 2) as isize;
    output.par_iter_mut().enumerate().for_each(|(linear, out)| {
        let index = grid.multi_index(linear);
        let mut acc = 0.0f64;
        for (j, w) in kernel.iter().enumerate() {
            let neighbor = grid.neighbor(&index, axis, j as isize - radius);
            acc += w * input[neighbor] as f64;
        }
        *out = acc as f32;
    });
}

fn convolve_tensor_dim<B: Backend, const D: usize>(
    input: Tensor<B, D>,
    kernel: Tensor<B, 1>,
    dim: usize,
) -> Tensor<B, D> {
    let dims: [usize; D] = input.dims();

    // move `dim` last and fold the remaining dims into the batch
    let mut permutation = [0isize; D];
    let mut next = 0;
    for i in 0..D {
        if i != dim {
            permutation[next] = i as isize;
            next += 1;
        }
    }
    permutation[D - 1] = dim as isize;

    let length = dims[dim];
    let batch = dims.iter().product::<usize>() / length.max(1);
    let lines = input.permute(permutation).reshape([batch, 1, length]);

    let kernel_size = kernel.dims()[0];
    let radius = kernel_size / 2;
    let first = lines.clone().narrow(2, 0, 1);
    let last = lines.clone().narrow(2, length - 1, 1);
    let mut parts = Vec::with_capacity(2 * radius + 1);
    parts.extend(std::iter::repeat(first).take(radius));
    parts.push(lines);
    parts.extend(std::iter::repeat(last).take(radius));
    let padded = Tensor::cat(parts, 2);

    let options = ConvOptions::new([1], [0], [1], 1);
    let smoothed = conv1d(padded, kernel.reshape([1, 1, kernel_size]), None, options);

    let mut permuted_shape = [0usize; D];
    for (pos, &src) in permutation.iter().enumerate() {
        permuted_shape[pos] = dims[src as usize];
    }
    let mut inverse = [0isize; D];
    for (pos, &src) in permutation.iter().enumerate() {
        inverse[src as usize] = pos as isize;
    }
    smoothed.reshape(Shape::new(permuted_shape)).permute(inverse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageBuffer;
    use crate::spatial::{Direction, Point, Spacing};
    use burn_ndarray::NdArray;

    type Backend = NdArray<f32>;

    #[test]
    fn test_kernel_is_normalized_and_symmetric() {
        let kernel = gaussian_kernel(1.5, 0.01, 32);
        let sum: f64 = kernel.iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
        assert_eq!(kernel.len() % 2, 1);
        let n = kernel.len();
        for i in 0..n / 2 {
            assert!((kernel[i] - kernel[n - 1 - i]).abs() < 1e-15);
        }
    }

    #[test]
    fn test_kernel_width_bounds() {
        assert_eq!(gaussian_kernel(0.0, 0.01, 32), vec![1.0]);
        assert!(gaussian_kernel(20.0, 0.001, 9).len() <= 9);
        // a looser error bound never needs a wider kernel
        assert!(gaussian_kernel(2.0, 0.1, 64).len() <= gaussian_kernel(2.0, 0.001, 64).len());
    }

    #[test]
    fn test_constant_buffer_is_preserved() {
        let grid = ImageGrid::<2>::with_size([6, 5]);
        let mut values = vec![3.0f32; grid.num_voxels()];
        GaussianFilter::new(vec![1.0]).apply_buffer(&mut values, &grid);
        assert!(values.iter().all(|v| (v - 3.0).abs() < 1e-5));
    }

    #[test]
    fn test_tensor_and_buffer_paths_agree() {
        let device = Default::default();
        let grid = ImageGrid::<2>::new(
            [7, 5],
            Point::origin(),
            Spacing::new([1.0, 2.0]),
            Direction::identity(),
        );
        let values: Vec<f32> = (0..grid.num_voxels())
            .map(|i| ((i * 7919) % 13) as f32)
            .collect();
        let buffer = ImageBuffer::new(grid.clone(), values.clone()).unwrap();
        let filter = GaussianFilter::new(vec![1.5]);

        let image = Image::<Backend, 2>::from_buffer(&buffer, &device);
        let from_tensor = filter.apply(&image).to_buffer().unwrap();

        let mut from_host = values;
        filter.apply_buffer(&mut from_host, &grid);

        for (a, b) in from_tensor.values().iter().zip(from_host.iter()) {
            assert!((a - b).abs() < 1e-4, "{a} vs {b}");
        }
    }
}
