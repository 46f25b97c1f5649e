//! Binary mask operations for per-level mask preparation.

use rayon::prelude::*;

use crate::image::ImageBuffer;

/// 1 where `value >= threshold`, 0 elsewhere.
pub fn threshold_mask<const D: usize>(mask: &ImageBuffer<D>, threshold: f32) -> ImageBuffer<D> {
    let mut out = mask.clone();
    out.values_mut()
        .par_iter_mut()
        .for_each(|v| *v = if *v >= threshold { 1.0 } else { 0.0 });
    out
}

/// Binary dilation with a box of half-width `radius` on every axis.
///
/// A box is separable, so the dilation runs as one running-maximum pass
/// per axis.
pub fn binary_dilate<const D: usize>(mask: &ImageBuffer<D>, radius: usize) -> ImageBuffer<D> {
    let grid = mask.grid().clone();
    let mut current = mask.values().to_vec();
    let mut next = vec![0.0f32; current.len()];
    let r = radius as isize;
    for axis in 0..D {
        next.par_iter_mut().enumerate().for_each(|(linear, out)| {
            let index = grid.multi_index(linear);
            *out = (-r..=r)
                .map(|offset| current[grid.neighbor(&index, axis, offset)])
                .fold(0.0, f32::max);
        });
        std::mem::swap(&mut current, &mut next);
    }
    let mut out = ImageBuffer::filled(grid, 0.0);
    out.values_mut().copy_from_slice(&current);
    out
}

/// Binarize a smoothed, subsampled mask at half its maximum and dilate it
/// by one voxel to undo the shrinkage caused by pyramid smoothing. A mask
/// without any positive value stays all background.
pub fn prepare_level_mask<const D: usize>(mask: &ImageBuffer<D>) -> ImageBuffer<D> {
    let max = mask.max_value();
    if max.is_nan() || max <= 0.0 {
        return ImageBuffer::filled(mask.grid().clone(), 0.0);
    }
    binary_dilate(&threshold_mask(mask, 0.5 * max), 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageGrid;

    #[test]
    fn test_dilate_single_pixel_to_box() {
        let grid = ImageGrid::<2>::with_size([5, 5]);
        let mut mask = ImageBuffer::filled(grid.clone(), 0.0);
        let center = grid.linear_index(&[2, 2]);
        mask.values_mut()[center] = 1.0;

        let dilated = binary_dilate(&mask, 1);
        let count = dilated.values().iter().filter(|v| **v > 0.0).count();
        assert_eq!(count, 9);
        assert_eq!(dilated.get(&[1, 1]), 1.0);
        assert_eq!(dilated.get(&[3, 3]), 1.0);
        assert_eq!(dilated.get(&[0, 2]), 0.0);
    }

    #[test]
    fn test_prepare_level_mask() {
        let grid = ImageGrid::<2>::with_size([6, 1]);
        let mask = ImageBuffer::new(grid, vec![0.0, 0.1, 0.3, 0.8, 0.2, 0.0]).unwrap();
        let prepared = prepare_level_mask(&mask);
        assert_eq!(prepared.values(), &[0.0, 0.0, 1.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_empty_mask_stays_empty() {
        let grid = ImageGrid::<3>::with_size([3, 3, 3]);
        let mask = ImageBuffer::filled(grid, 0.0);
        assert!(prepare_level_mask(&mask).values().iter().all(|v| *v == 0.0));
    }
}
