//! Smoothed and subsampled image copies, coarsest level first.

use burn::tensor::backend::Backend;
use tracing::debug;

use super::downsample::DownsampleFilter;
use super::gaussian::GaussianFilter;
use crate::image::Image;

pub struct MultiResolutionPyramid<B: Backend, const D: usize> {
    images: Vec<Image<B, D>>,
    shrink_factors: Vec<[usize; D]>,
}

impl<B: Backend, const D: usize> MultiResolutionPyramid<B, D> {
    /// Build one level per entry of `shrink_factors`. Each level is
    /// smoothed with a standard deviation of `0.5 * factor` voxels before
    /// subsampling; unit factors leave the input untouched.
    pub fn new(input: &Image<B, D>, shrink_factors: &[[usize; D]]) -> Self {
        let mut images = Vec::with_capacity(shrink_factors.len());

        for factors in shrink_factors {
            if factors.iter().all(|&f| f <= 1) {
                images.push(input.clone());
                continue;
            }

            let sigmas = factors
                .iter()
                .map(|&f| if f > 1 { 0.5 * f as f64 } else { 0.0 })
                .collect();
            let smoothed = GaussianFilter::new(sigmas)
                .with_image_spacing(false)
                .apply(input);
            let level = DownsampleFilter::new(*factors).apply(&smoothed);
            debug!("pyramid level {:?}: size {:?}", factors, level.size());
            images.push(level);
        }

        Self {
            images,
            shrink_factors: shrink_factors.to_vec(),
        }
    }

    pub fn get_level(&self, level: usize) -> Option<&Image<B, D>> {
        self.images.get(level)
    }

    pub fn shrink_factors(&self, level: usize) -> Option<&[usize; D]> {
        self.shrink_factors.get(level)
    }

    pub fn levels(&self) -> usize {
        self.images.len()
    }

    pub fn default_schedule(levels: usize) -> Vec<[usize; D]> {
        default_shrink_factors(levels)
    }
}

/// Power-of-two factors, `2^(levels - 1 - i)` on every axis for level `i`.
pub fn default_shrink_factors<const D: usize>(levels: usize) -> Vec<[usize; D]> {
    (0..levels)
        .map(|i| [2usize.pow((levels - 1 - i) as u32); D])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{ImageBuffer, ImageGrid};
    use burn_ndarray::NdArray;

    type Backend = NdArray<f32>;

    #[test]
    fn test_default_schedule() {
        let schedule = MultiResolutionPyramid::<Backend, 2>::default_schedule(3);
        assert_eq!(schedule, vec![[4, 4], [2, 2], [1, 1]]);
    }

    #[test]
    fn test_pyramid_levels() {
        let device = Default::default();
        let grid = ImageGrid::<2>::with_size([16, 12]);
        let image = Image::<Backend, 2>::from_buffer(&ImageBuffer::filled(grid, 2.0), &device);
        let schedule = MultiResolutionPyramid::<Backend, 2>::default_schedule(3);
        let pyramid = MultiResolutionPyramid::new(&image, &schedule);

        assert_eq!(pyramid.levels(), 3);
        assert_eq!(pyramid.get_level(0).map(|l| l.size()), Some([4, 3]));
        assert_eq!(pyramid.get_level(2).map(|l| l.size()), Some([16, 12]));
        assert_eq!(pyramid.shrink_factors(1), Some(&[2, 2]));
        assert!(pyramid.get_level(3).is_none());

        // smoothing a constant image keeps it constant
        let coarse = pyramid.get_level(0).map(|l| l.to_buffer().unwrap()).unwrap();
        assert!(coarse.values().iter().all(|v| (v - 2.0).abs() < 1e-5));
    }
}
