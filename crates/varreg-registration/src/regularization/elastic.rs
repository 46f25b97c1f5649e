//! Linear-elastic regularizer.
//!
//! Solves the Navier-Lame system
//!
//! `(Id - tau (mu Lap + (mu + lambda) grad div)) u = f`
//!
//! with damped Jacobi sweeps on a finite-difference discretization.
//! Neighbors outside the grid are clamped to the border voxel.

use rayon::prelude::*;
use tracing::{debug, trace};
use varreg_core::image::ImageGrid;
use varreg_core::FieldBuffer;

use super::trait_::Regularizer;
use crate::error::{RegistrationError, Result};

const JACOBI_DAMPING: f64 = 2.0 / 3.0;

#[derive(Debug, Clone)]
pub struct ElasticRegularizer {
    mu: f64,
    lambda: f64,
    time_step: f64,
    maximum_iterations: usize,
    tolerance: f64,
    use_image_spacing: bool,
}

impl ElasticRegularizer {
    pub fn new(mu: f64, lambda: f64, time_step: f64) -> Self {
        Self {
            mu,
            lambda,
            time_step,
            maximum_iterations: 40,
            tolerance: 1e-5,
            use_image_spacing: true,
        }
    }

    pub fn with_maximum_iterations(mut self, iterations: usize) -> Self {
        self.maximum_iterations = iterations;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_image_spacing(mut self, use_image_spacing: bool) -> Self {
        self.use_image_spacing = use_image_spacing;
        self
    }

    fn spacing<const D: usize>(&self, grid: &ImageGrid<D>) -> [f64; D] {
        std::array::from_fn(|k| if self.use_image_spacing { grid.spacing()[k] } else { 1.0 })
    }

    /// Apply the operator to `u` at one voxel.
    fn apply_operator<const D: usize>(
        &self,
        grid: &ImageGrid<D>,
        h: &[f64; D],
        u: &[[f64; D]],
        linear: usize,
    ) -> [f64; D] {
        let index = grid.multi_index(linear);
        let center = u[linear];
        let mut laplacian = [0.0; D];
        for j in 0..D {
            let lo = u[grid.neighbor(&index, j, -1)];
            let hi = u[grid.neighbor(&index, j, 1)];
            for k in 0..D {
                laplacian[k] += (lo[k] - 2.0 * center[k] + hi[k]) / (h[j] * h[j]);
            }
        }

        let mut grad_div = [0.0; D];
        for k in 0..D {
            for j in 0..D {
                grad_div[k] += if j == k {
                    let lo = u[grid.neighbor(&index, k, -1)][k];
                    let hi = u[grid.neighbor(&index, k, 1)][k];
                    (lo - 2.0 * center[k] + hi) / (h[k] * h[k])
                } else {
                    let pp = u[diagonal_neighbor(grid, &index, k, 1, j, 1)][j];
                    let pm = u[diagonal_neighbor(grid, &index, k, 1, j, -1)][j];
                    let mp = u[diagonal_neighbor(grid, &index, k, -1, j, 1)][j];
                    let mm = u[diagonal_neighbor(grid, &index, k, -1, j, -1)][j];
                    (pp - pm - mp + mm) / (4.0 * h[k] * h[j])
                };
            }
        }

        std::array::from_fn(|k| {
            center[k] - self.time_step * (self.mu * laplacian[k] + (self.mu + self.lambda) * grad_div[k])
        })
    }
}

fn diagonal_neighbor<const D: usize>(
    grid: &ImageGrid<D>,
    index: &[usize; D],
    a: usize,
    offset_a: isize,
    b: usize,
    offset_b: isize,
) -> usize {
    let size = grid.size();
    let mut moved = *index;
    moved[a] = (index[a] as isize + offset_a).clamp(0, size[a] as isize - 1) as usize;
    moved[b] = (index[b] as isize + offset_b).clamp(0, size[b] as isize - 1) as usize;
    grid.linear_index(&moved)
}

impl<const D: usize> Regularizer<D> for ElasticRegularizer {
    fn initialize(&mut self, grid: &ImageGrid<D>) -> Result<()> {
        debug!(
            mu = self.mu,
            lambda = self.lambda,
            grid = %grid.describe(),
            "elastic regularizer initialized"
        );
        Ok(())
    }

    fn regularize(&self, field: &FieldBuffer<D>) -> Result<FieldBuffer<D>> {
        let grid = field.grid();
        let h = self.spacing(grid);
        let n = field.len();
        let rhs: Vec<[f64; D]> = (0..n).map(|i| field.vector_at(i)).collect();

        let inverse_h_sq: f64 = h.iter().map(|v| 2.0 / (v * v)).sum();
        let diagonal: [f64; D] = std::array::from_fn(|k| {
            1.0 + self.time_step
                * (self.mu * inverse_h_sq + (self.mu + self.lambda) * 2.0 / (h[k] * h[k]))
        });

        let mut u = rhs.clone();
        for sweep in 0..self.maximum_iterations {
            let next: Vec<([f64; D], f64)> = (0..n)
                .into_par_iter()
                .map(|linear| {
                    let applied = self.apply_operator(grid, &h, &u, linear);
                    let mut max_change = 0.0f64;
                    let updated = std::array::from_fn(|k| {
                        let delta = JACOBI_DAMPING * (rhs[linear][k] - applied[k]) / diagonal[k];
                        max_change = max_change.max(delta.abs());
                        u[linear][k] + delta
                    });
                    (updated, max_change)
                })
                .collect();

            let max_change = next.iter().map(|(_, c)| *c).fold(0.0, f64::max);
            if !max_change.is_finite() {
                return Err(RegistrationError::numerical_instability(
                    "elastic solve diverged",
                ));
            }
            u = next.into_iter().map(|(v, _)| v).collect();
            trace!(sweep, max_change, "elastic Jacobi sweep");
            if max_change < self.tolerance {
                break;
            }
        }

        let mut out = FieldBuffer::zeros(grid.clone());
        for (linear, vector) in u.into_iter().enumerate() {
            out.set_vector(linear, vector);
        }
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "elastic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_field_is_fixed_point() {
        let grid = ImageGrid::<3>::with_size([4, 3, 3]);
        let field = FieldBuffer::uniform(grid, [0.5, -0.25, 1.0]);
        let out = ElasticRegularizer::new(0.5, 0.5, 1.0).regularize(&field).unwrap();
        assert!(out.max_abs_diff(&field).unwrap() < 1e-6);
    }

    #[test]
    fn test_impulse_is_smoothed_and_solution_is_converged() {
        let grid = ImageGrid::<2>::with_size([9, 9]);
        let mut field = FieldBuffer::zeros(grid.clone());
        let center = grid.linear_index(&[4, 4]);
        field.set_vector(center, [1.0, 0.0]);

        let reg = ElasticRegularizer::new(0.5, 0.5, 1.0)
            .with_maximum_iterations(500)
            .with_tolerance(1e-9);
        let out = reg.regularize(&field).unwrap();
        let peak = out.component(0)[center];
        assert!(peak > 0.0 && peak < 1.0);
        assert!(out.component(0)[grid.linear_index(&[5, 4])] > 0.0);

        let h = [1.0, 1.0];
        let u: Vec<[f64; 2]> = (0..out.len()).map(|i| out.vector_at(i)).collect();
        let applied = reg.apply_operator(&grid, &h, &u, center);
        assert!((applied[0] - 1.0).abs() < 1e-4);
        assert!(applied[1].abs() < 1e-4);
    }
}
