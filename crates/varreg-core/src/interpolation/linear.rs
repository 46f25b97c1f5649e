//! N-linear interpolation over the `2^D` corners of the enclosing cell.

use super::trait_::Interpolator;
use crate::image::ImageGrid;

#[derive(Debug, Clone, Copy, Default)]
pub struct LinearInterpolator;

impl LinearInterpolator {
    pub fn new() -> Self {
        Self
    }
}

impl Interpolator for LinearInterpolator {
    fn evaluate<const D: usize>(&self, values: &[f32], grid: &ImageGrid<D>, index: &[f64; D]) -> f32 {
        let size = grid.size();
        let strides = grid.strides();

        let mut base = [0usize; D];
        let mut frac = [0f64; D];
        for axis in 0..D {
            let last = size[axis].saturating_sub(1);
            let clamped = index[axis].clamp(0.0, last as f64);
            let floor = (clamped.floor() as usize).min(last);
            base[axis] = floor;
            frac[axis] = if floor == last { 0.0 } else { clamped - floor as f64 };
        }

        let mut acc = 0.0f64;
        for corner in 0..(1usize << D) {
            let mut weight = 1.0f64;
            let mut linear = 0usize;
            for axis in 0..D {
                let upper = (corner >> axis) & 1 == 1;
                let (w, i) = if upper {
                    (frac[axis], base[axis] + 1)
                } else {
                    (1.0 - frac[axis], base[axis])
                };
                if w == 0.0 {
                    weight = 0.0;
                    break;
                }
                weight *= w;
                linear += i * strides[axis];
            }
            if weight != 0.0 {
                acc += weight * values[linear] as f64;
            }
        }
        acc as f32
    }
}
