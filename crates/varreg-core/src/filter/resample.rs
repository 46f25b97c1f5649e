//! Field expander: resamples a vector field onto another grid.
//!
//! Vectors are interpolated component-wise in physical space. Their
//! magnitudes are not rescaled, since displacements are stored in physical
//! units and a new grid only changes the sampling density.

use rayon::prelude::*;

use crate::field::FieldBuffer;
use crate::image::ImageGrid;
use crate::interpolation::{Interpolator, LinearInterpolator};

#[derive(Debug, Clone, Default)]
pub struct FieldExpander {
    interpolator: LinearInterpolator,
}

impl FieldExpander {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resample `field` onto `target`. Target points outside the source
    /// grid take the nearest border value.
    pub fn expand<const D: usize>(&self, field: &FieldBuffer<D>, target: &ImageGrid<D>) -> FieldBuffer<D> {
        if field.grid().same_domain(target) {
            return field.clone();
        }
        let source = field.grid();
        let mut out = FieldBuffer::zeros(target.clone());
        let samples: Vec<[f64; D]> = (0..target.num_voxels())
            .into_par_iter()
            .map(|linear| {
                let index = target.multi_index(linear).map(|i| i as f64);
                let point = target.index_to_physical(&index);
                let source_index = source.physical_to_index(&point);
                std::array::from_fn(|k| {
                    self.interpolator
                        .evaluate(field.component(k), source, &source_index) as f64
                })
            })
            .collect();
        for (linear, vector) in samples.into_iter().enumerate() {
            out.set_vector(linear, vector);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::{Direction, Point, Spacing};

    fn smooth_field(grid: &ImageGrid<2>) -> FieldBuffer<2> {
        let mut field = FieldBuffer::zeros(grid.clone());
        for linear in 0..grid.num_voxels() {
            let p = grid.index_to_physical(&grid.multi_index(linear).map(|i| i as f64));
            field.set_vector(linear, [0.1 * p[0], -0.05 * p[1] + 0.3]);
        }
        field
    }

    #[test]
    fn test_expand_to_same_grid_is_identity() {
        let grid = ImageGrid::<2>::with_size([5, 4]);
        let field = smooth_field(&grid);
        assert_eq!(FieldExpander::new().expand(&field, &grid), field);
    }

    #[test]
    fn test_shared_grid_points_keep_their_values() {
        let fine = ImageGrid::<2>::new(
            [9, 7],
            Point::new([1.0, -1.0]),
            Spacing::new([0.5, 0.5]),
            Direction::identity(),
        );
        let coarse = fine.shrink(&[2, 2]);
        let field = smooth_field(&coarse);
        let expanded = FieldExpander::new().expand(&field, &fine);

        // every coarse sample sits on an even fine index
        for linear in 0..coarse.num_voxels() {
            let [x, y] = coarse.multi_index(linear);
            let fine_linear = fine.linear_index(&[2 * x, 2 * y]);
            let a = field.vector_at(linear);
            let b = expanded.vector_at(fine_linear);
            assert!((a[0] - b[0]).abs() < 1e-5 && (a[1] - b[1]).abs() < 1e-5);
        }

        // a linear field is reproduced exactly between samples too
        let mid = fine.linear_index(&[3, 3]);
        let p = fine.index_to_physical(&[3.0, 3.0]);
        let v = expanded.vector_at(mid);
        assert!((v[0] - 0.1 * p[0]).abs() < 1e-5);
    }
}
