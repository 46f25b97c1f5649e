//! Semi-implicit diffusion regularizer.
//!
//! Each axis `k` solves `(Id - tau alpha d2/dx_k^2) u = u_prev` along every
//! grid line with the Thomas algorithm. Axes run one after another on the
//! output of the previous axis (additive operator splitting without the
//! averaging). Reflecting boundaries put `1 + r` on the first and last
//! diagonal entries.

use rayon::prelude::*;
use tracing::debug;
use varreg_core::image::ImageGrid;
use varreg_core::FieldBuffer;

use super::trait_::Regularizer;
use crate::error::{RegistrationError, Result};

#[derive(Debug, Clone)]
pub struct DiffusionRegularizer {
    alpha: f64,
    time_step: f64,
    use_image_spacing: bool,
    /// `tau alpha / h_k^2` per axis, set by `initialize`.
    weights: Vec<f64>,
}

impl DiffusionRegularizer {
    pub fn new(alpha: f64, time_step: f64) -> Self {
        Self {
            alpha,
            time_step,
            use_image_spacing: true,
            weights: Vec::new(),
        }
    }

    pub fn with_image_spacing(mut self, use_image_spacing: bool) -> Self {
        self.use_image_spacing = use_image_spacing;
        self
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    fn axis_weights<const D: usize>(&self, grid: &ImageGrid<D>) -> Vec<f64> {
        (0..D)
            .map(|axis| {
                let h = if self.use_image_spacing { grid.spacing()[axis] } else { 1.0 };
                self.time_step * self.alpha / (h * h)
            })
            .collect()
    }
}

impl<const D: usize> Regularizer<D> for DiffusionRegularizer {
    fn initialize(&mut self, grid: &ImageGrid<D>) -> Result<()> {
        self.weights = self.axis_weights(grid);
        debug!(weights = ?self.weights, "diffusion regularizer initialized");
        Ok(())
    }

    fn regularize(&self, field: &FieldBuffer<D>) -> Result<FieldBuffer<D>> {
        let grid = field.grid();
        let weights = if self.weights.len() == D {
            self.weights.clone()
        } else {
            self.axis_weights(grid)
        };

        let mut out = field.clone();
        for axis in 0..D {
            let r = weights[axis];
            let length = grid.size()[axis];
            if r == 0.0 || length < 2 {
                continue;
            }
            let stride = grid.strides()[axis];
            let starts = grid.line_starts(axis);
            for component in out.components_mut().iter_mut() {
                let solved: Vec<Vec<f64>> = starts
                    .par_iter()
                    .map(|&start| {
                        let rhs: Vec<f64> = (0..length)
                            .map(|i| component[start + i * stride] as f64)
                            .collect();
                        solve_neumann_line(&rhs, r)
                    })
                    .collect::<Result<_>>()?;
                for (start, line) in starts.iter().zip(solved) {
                    for (i, value) in line.into_iter().enumerate() {
                        component[start + i * stride] = value as f32;
                    }
                }
            }
        }
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "diffusion"
    }
}

/// Solve `-r x[i-1] + (1 + 2r) x[i] - r x[i+1] = b[i]` with reflecting ends.
pub fn solve_neumann_line(rhs: &[f64], r: f64) -> Result<Vec<f64>> {
    let n = rhs.len();
    if n < 2 {
        return Ok(rhs.to_vec());
    }
    let off = -r;
    let diagonal = |i: usize| if i == 0 || i + 1 == n { 1.0 + r } else { 1.0 + 2.0 * r };

    let mut c_prime = vec![0.0; n];
    let mut d_prime = vec![0.0; n];
    let mut denom = diagonal(0);
    c_prime[0] = off / denom;
    d_prime[0] = rhs[0] / denom;
    for i in 1..n {
        denom = diagonal(i) - off * c_prime[i - 1];
        if denom.abs() < f64::EPSILON {
            return Err(RegistrationError::numerical_instability(format!(
                "singular diffusion system at row {}",
                i
            )));
        }
        c_prime[i] = off / denom;
        d_prime[i] = (rhs[i] - off * d_prime[i - 1]) / denom;
    }

    let mut x = vec![0.0; n];
    x[n - 1] = d_prime[n - 1];
    for i in (0..n - 1).rev() {
        x[i] = d_prime[i] - c_prime[i] * x[i + 1];
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use varreg_core::spatial::{Direction, Point, Spacing};

    #[test]
    fn test_line_solution_satisfies_system() {
        let rhs = [1.0, 4.0, -2.0, 0.5, 3.0];
        let r = 0.7;
        let x = solve_neumann_line(&rhs, r).unwrap();
        let n = rhs.len();
        for i in 0..n {
            let left = if i > 0 { x[i - 1] } else { x[i] };
            let right = if i + 1 < n { x[i + 1] } else { x[i] };
            let lhs = x[i] - r * (left - 2.0 * x[i] + right);
            assert!((lhs - rhs[i]).abs() < 1e-10);
        }
    }

    #[test]
    fn test_constant_field_is_fixed_point_and_mean_preserved() {
        let grid = ImageGrid::new([6, 4], Point::origin(), Spacing::new([1.0, 2.0]), Direction::identity());
        let mut reg = DiffusionRegularizer::new(0.5, 1.0);
        Regularizer::<2>::initialize(&mut reg, &grid).unwrap();

        let uniform = FieldBuffer::uniform(grid.clone(), [1.0, 2.0]);
        let out = reg.regularize(&uniform).unwrap();
        assert!(out.max_abs_diff(&uniform).unwrap() < 1e-5);

        let mut impulse = FieldBuffer::zeros(grid.clone());
        impulse.set_vector(grid.linear_index(&[2, 1]), [4.0, 0.0]);
        let smoothed = reg.regularize(&impulse).unwrap();
        let sum: f32 = smoothed.component(0).iter().sum();
        assert!((sum - 4.0).abs() < 1e-4);
        assert!(smoothed.component(0)[grid.linear_index(&[2, 1])] < 4.0);
    }

    #[test]
    fn test_zero_alpha_is_identity() {
        let grid = ImageGrid::<2>::with_size([3, 3]);
        let mut field = FieldBuffer::zeros(grid);
        field.set_vector(4, [1.0, -1.0]);
        let out = DiffusionRegularizer::new(0.0, 1.0).regularize(&field).unwrap();
        assert_eq!(out, field);
    }
}
