//! Exponential map of a stationary velocity field by scaling and squaring.
//!
//! `exp(v) ≈ (Id + v / 2^n)^(2^n)`: the field is scaled down by `2^n` and
//! then composed with itself `n` times, `u(x) <- u(x) + u(x + u(x))`.

use rayon::prelude::*;
use tracing::trace;

use crate::field::FieldBuffer;

#[derive(Debug, Clone)]
pub struct ExponentialFieldFilter {
    maximum_iterations: usize,
    fixed_iterations: Option<usize>,
}

impl Default for ExponentialFieldFilter {
    fn default() -> Self {
        Self {
            maximum_iterations: 20,
            fixed_iterations: None,
        }
    }
}

impl ExponentialFieldFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upper bound for the automatically chosen number of squarings.
    pub fn with_maximum_iterations(mut self, maximum_iterations: usize) -> Self {
        self.maximum_iterations = maximum_iterations;
        self
    }

    /// Use exactly `iterations` squarings instead of deriving the count
    /// from the field magnitude.
    pub fn with_fixed_iterations(mut self, iterations: Option<usize>) -> Self {
        self.fixed_iterations = iterations;
        self
    }

    /// Number of squarings for `velocity`: `ceil(2 + log2(max |v| / h))`,
    /// clamped to `[0, maximum_iterations]`. A zero field needs none.
    pub fn iterations_for<const D: usize>(&self, velocity: &FieldBuffer<D>) -> usize {
        self.iterations_for_norm(velocity.max_norm_in_voxels())
    }

    fn iterations_for_norm(&self, max_norm: f64) -> usize {
        if let Some(n) = self.fixed_iterations {
            return n;
        }
        if max_norm <= 0.0 {
            return 0;
        }
        let n = (2.0 + max_norm.log2()).ceil();
        if n <= 0.0 {
            0
        } else {
            (n as usize).min(self.maximum_iterations)
        }
    }

    /// Returns `exp(velocity)` as a new displacement field; `velocity` is
    /// left untouched.
    pub fn compute<const D: usize>(&self, velocity: &FieldBuffer<D>) -> FieldBuffer<D> {
        let iterations = self.iterations_for(velocity);
        trace!("exponential map with {} squarings", iterations);
        if iterations == 0 {
            return velocity.clone();
        }

        let mut field = velocity.scaled(1.0 / 2f64.powi(iterations as i32));
        for _ in 0..iterations {
            field = compose_with_self(&field);
        }
        field
    }
}

/// `u(x) + u(x + u(x))`, with `u` interpolated linearly and clamped at
/// the border.
fn compose_with_self<const D: usize>(field: &FieldBuffer<D>) -> FieldBuffer<D> {
    let grid = field.grid();
    let composed: Vec<[f64; D]> = (0..grid.num_voxels())
        .into_par_iter()
        .map(|linear| {
            let u = field.vector_at(linear);
            let base = grid.multi_index(linear).map(|i| i as f64);
            let mut point = grid.index_to_physical(&base);
            for k in 0..D {
                point[k] += u[k];
            }
            let index = grid.physical_to_index(&point);
            let shifted = field.sample(&index);
            std::array::from_fn(|k| u[k] + shifted[k])
        })
        .collect();
    let mut out = FieldBuffer::zeros(grid.clone());
    for (linear, vector) in composed.into_iter().enumerate() {
        out.set_vector(linear, vector);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageGrid;

    #[test]
    fn test_zero_velocity_gives_zero_displacement() {
        let grid = ImageGrid::<2>::with_size([5, 5]);
        let v = FieldBuffer::zeros(grid);
        let exp = ExponentialFieldFilter::new();
        assert_eq!(exp.iterations_for_norm(0.0), 0);
        assert!(exp.compute(&v).is_zero());
    }

    #[test]
    fn test_uniform_velocity_is_exact_translation() {
        let grid = ImageGrid::<2>::with_size([8, 8]);
        let v = FieldBuffer::uniform(grid, [0.75, -0.5]);
        let u = ExponentialFieldFilter::new().compute(&v);
        for linear in 0..u.len() {
            let vec = u.vector_at(linear);
            assert!((vec[0] - 0.75).abs() < 1e-5);
            assert!((vec[1] + 0.5).abs() < 1e-5);
        }
    }

    #[test]
    fn test_velocity_is_not_mutated() {
        let grid = ImageGrid::<2>::with_size([6, 6]);
        let mut v = FieldBuffer::zeros(grid.clone());
        for linear in 0..grid.num_voxels() {
            let [x, y] = grid.multi_index(linear);
            v.set_vector(linear, [0.2 * y as f64, -0.1 * x as f64]);
        }
        let snapshot = v.clone();
        let _ = ExponentialFieldFilter::new().compute(&v);
        assert_eq!(v, snapshot);
    }

    #[test]
    fn test_iteration_count() {
        let exp = ExponentialFieldFilter::new().with_maximum_iterations(6);
        assert_eq!(exp.iterations_for_norm(1.0), 2);
        assert_eq!(exp.iterations_for_norm(3.0), 4);
        assert_eq!(exp.iterations_for_norm(1e6), 6);
        assert_eq!(exp.iterations_for_norm(0.1), 0);
        let fixed = exp.with_fixed_iterations(Some(3));
        assert_eq!(fixed.iterations_for_norm(1e6), 3);
    }
}
