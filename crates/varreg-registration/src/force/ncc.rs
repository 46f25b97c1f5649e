//! Local normalized cross-correlation force.
//!
//! Window statistics over a `(2r + 1)^D` box (replicate boundary) give
//! `sff`, `smm` and `sfm`, the centered sums of squares and cross products.
//! With `cc = sfm^2 / (sff * smm)` the force is
//!
//! `f = 2 sfm / (sff smm) * [(F - mean_f) - sfm / smm * (M - mean_m)] * g`
//!
//! and each voxel contributes `-cc` to the metric, so a perfect match
//! drives the metric towards -1.

use rayon::prelude::*;
use varreg_core::image::ImageGrid;

use super::accumulator::GlobalAccumulator;
use super::images::IterationImages;
use super::trait_::{ForceInputs, ForceSettings, RegistrationFunction};
use crate::error::Result;

const VARIANCE_EPSILON: f64 = 1e-5;

#[derive(Debug, Clone, Copy, Default)]
struct WindowStats {
    mean_fixed: f64,
    mean_moving: f64,
    sff: f64,
    smm: f64,
    sfm: f64,
}

#[derive(Debug, Clone)]
pub struct NccForce<const D: usize> {
    settings: ForceSettings,
    radius: usize,
    images: Option<IterationImages<D>>,
    stats: Vec<WindowStats>,
}

impl<const D: usize> NccForce<D> {
    pub fn new(settings: ForceSettings, radius: usize) -> Self {
        Self {
            settings,
            radius,
            images: None,
            stats: Vec::new(),
        }
    }

    pub fn settings(&self) -> &ForceSettings {
        &self.settings
    }

    pub fn radius(&self) -> usize {
        self.radius
    }

    fn window_stats(&self, images: &IterationImages<D>) -> Vec<WindowStats> {
        let grid = images.grid();
        let fixed: Vec<f64> = images.fixed().iter().map(|v| *v as f64).collect();
        let moving: Vec<f64> = images.warped_moving().iter().map(|v| *v as f64).collect();

        let mean_f = box_mean(&fixed, grid, self.radius);
        let mean_m = box_mean(&moving, grid, self.radius);
        let mean_ff = box_mean(&fixed.iter().map(|f| f * f).collect::<Vec<_>>(), grid, self.radius);
        let mean_mm = box_mean(&moving.iter().map(|m| m * m).collect::<Vec<_>>(), grid, self.radius);
        let mean_fm = box_mean(
            &fixed.iter().zip(&moving).map(|(f, m)| f * m).collect::<Vec<_>>(),
            grid,
            self.radius,
        );

        let n = ((2 * self.radius + 1) as f64).powi(D as i32);
        (0..fixed.len())
            .into_par_iter()
            .map(|i| WindowStats {
                mean_fixed: mean_f[i],
                mean_moving: mean_m[i],
                sff: (n * (mean_ff[i] - mean_f[i] * mean_f[i])).max(0.0),
                smm: (n * (mean_mm[i] - mean_m[i] * mean_m[i])).max(0.0),
                sfm: n * (mean_fm[i] - mean_f[i] * mean_m[i]),
            })
            .collect()
    }
}

/// Separable box average with half-width `radius` and replicate boundary.
fn box_mean<const D: usize>(values: &[f64], grid: &ImageGrid<D>, radius: usize) -> Vec<f64> {
    let r = radius as isize;
    let width = (2 * radius + 1) as f64;
    let mut current = values.to_vec();
    let mut next = vec![0.0; current.len()];
    for axis in 0..D {
        next.par_iter_mut().enumerate().for_each(|(linear, out)| {
            let index = grid.multi_index(linear);
            *out = (-r..=r)
                .map(|offset| current[grid.neighbor(&index, axis, offset)])
                .sum::<f64>()
                / width;
        });
        std::mem::swap(&mut current, &mut next);
    }
    current
}

impl<const D: usize> RegistrationFunction<D> for NccForce<D> {
    fn initialize_iteration(&mut self, inputs: &ForceInputs<'_, D>) -> Result<()> {
        let images = IterationImages::prepare(inputs, &self.settings)?;
        self.stats = self.window_stats(&images);
        self.images = Some(images);
        Ok(())
    }

    fn compute_update(&self, linear: usize, accumulator: &mut GlobalAccumulator) -> [f64; D] {
        let zero = [0.0; D];
        let Some(images) = &self.images else {
            return zero;
        };
        if !images.is_foreground(linear) {
            return zero;
        }

        let stats = self.stats[linear];
        let variance = stats.sff * stats.smm;
        if variance < VARIANCE_EPSILON {
            accumulator.add_metric(0.0);
            return zero;
        }
        let cc = stats.sfm * stats.sfm / variance;
        accumulator.add_metric(-cc);

        if images.difference(linear).abs() < self.settings.intensity_difference_threshold {
            return zero;
        }

        let fixed = images.fixed()[linear] as f64 - stats.mean_fixed;
        let moving = images.warped_moving()[linear] as f64 - stats.mean_moving;
        let factor = 2.0 * stats.sfm / variance * (fixed - stats.sfm / stats.smm * moving);
        let gradient = images.gradient(linear);
        let update: [f64; D] = std::array::from_fn(|k| factor * gradient[k]);
        let tau = self.settings.time_step;
        accumulator.add_change(tau * tau * update.iter().map(|v| v * v).sum::<f64>());
        update
    }

    fn time_step(&self) -> f64 {
        self.settings.time_step
    }

    fn name(&self) -> &'static str {
        "ncc"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use varreg_core::{FieldBuffer, ImageBuffer};

    fn pattern(grid: &ImageGrid<2>, scale: f32, shift: f32) -> ImageBuffer<2> {
        let values = (0..grid.num_voxels())
            .map(|i| {
                let [x, y] = grid.multi_index(i);
                scale * ((x * x + 3 * y) % 7) as f32 + shift
            })
            .collect();
        ImageBuffer::new(grid.clone(), values).unwrap()
    }

    fn evaluate(fixed: &ImageBuffer<2>, moving: &ImageBuffer<2>) -> (Vec<[f64; 2]>, GlobalAccumulator) {
        let field = FieldBuffer::zeros(fixed.grid().clone());
        let mut force = NccForce::new(ForceSettings::default(), 1);
        force
            .initialize_iteration(&ForceInputs {
                fixed,
                moving,
                mask: None,
                displacement: &field,
                fixed_displacement: None,
            })
            .unwrap();
        let mut acc = GlobalAccumulator::new();
        let updates = (0..field.len()).map(|i| force.compute_update(i, &mut acc)).collect();
        (updates, acc)
    }

    #[test]
    fn test_box_mean_of_constant_is_constant() {
        let grid = ImageGrid::<2>::with_size([4, 3]);
        let mean = box_mean(&vec![2.5; 12], &grid, 2);
        assert!(mean.iter().all(|m| (m - 2.5).abs() < 1e-12));
    }

    #[test]
    fn test_affine_intensity_change_is_perfect_correlation() {
        let grid = ImageGrid::<2>::with_size([8, 8]);
        let fixed = pattern(&grid, 1.0, 0.0);
        let moving = pattern(&grid, 2.0, 5.0);
        let (updates, acc) = evaluate(&fixed, &moving);

        // cc = 1 in every textured window, so the force vanishes.
        assert!(acc.metric() < -0.9);
        for u in &updates {
            assert!(u[0].abs() < 1e-6 && u[1].abs() < 1e-6);
        }
    }

    #[test]
    fn test_flat_windows_contribute_nothing() {
        let grid = ImageGrid::<2>::with_size([5, 5]);
        let fixed = ImageBuffer::filled(grid.clone(), 1.0);
        let moving = ImageBuffer::filled(grid, 3.0);
        let (updates, acc) = evaluate(&fixed, &moving);
        assert_eq!(acc.metric(), 0.0);
        assert!(updates.iter().all(|u| *u == [0.0, 0.0]));
    }
}
