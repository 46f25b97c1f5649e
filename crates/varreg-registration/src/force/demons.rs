//! Demons force.
//!
//! For the intensity difference `d = F(x) - M(x + u(x))` and gradient `g`:
//!
//! `f = d / (|g|^2 + k d^2) * g`
//!
//! with `k` the inverse mean squared spacing. The update is zero when
//! `|d|` is below the intensity-difference threshold or the denominator is
//! below the denominator threshold. The metric is the mean squared
//! difference over processed voxels.

use tracing::trace;

use super::accumulator::GlobalAccumulator;
use super::images::IterationImages;
use super::trait_::{ForceInputs, ForceSettings, RegistrationFunction};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct DemonsForce<const D: usize> {
    settings: ForceSettings,
    images: Option<IterationImages<D>>,
}

impl<const D: usize> DemonsForce<D> {
    pub fn new(settings: ForceSettings) -> Self {
        Self {
            settings,
            images: None,
        }
    }

    pub fn settings(&self) -> &ForceSettings {
        &self.settings
    }
}

impl<const D: usize> Default for DemonsForce<D> {
    fn default() -> Self {
        Self::new(ForceSettings::default())
    }
}

impl<const D: usize> RegistrationFunction<D> for DemonsForce<D> {
    fn initialize_iteration(&mut self, inputs: &ForceInputs<'_, D>) -> Result<()> {
        self.images = Some(IterationImages::prepare(inputs, &self.settings)?);
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

        let diff = images.difference(linear);
        accumulator.add_metric(diff * diff);
        if diff.abs() < self.settings.intensity_difference_threshold {
            return zero;
        }

        let gradient = images.gradient(linear);
        let gradient_sq: f64 = gradient.iter().map(|g| g * g).sum();
        let denominator = gradient_sq + diff * diff * images.normalizer();
        if denominator < self.settings.denominator_threshold {
            trace!(linear, denominator, "demons denominator below threshold");
            return zero;
        }

        let factor = diff / denominator;
        let update: [f64; D] = std::array::from_fn(|k| factor * gradient[k]);
        let tau = self.settings.time_step;
        accumulator.add_change(tau * tau * update.iter().map(|v| v * v).sum::<f64>());
        update
    }

    fn time_step(&self) -> f64 {
        self.settings.time_step
    }

    fn name(&self) -> &'static str {
        "demons"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use varreg_core::image::ImageGrid;
    use varreg_core::{FieldBuffer, ImageBuffer};

    fn ramp(grid: &ImageGrid<2>, offset: f32) -> ImageBuffer<2> {
        let values = (0..grid.num_voxels())
            .map(|i| grid.multi_index(i)[0] as f32 * 2.0 + offset)
            .collect();
        ImageBuffer::new(grid.clone(), values).unwrap()
    }

    fn run(force: &mut DemonsForce<2>, fixed: &ImageBuffer<2>, moving: &ImageBuffer<2>) -> (Vec<[f64; 2]>, GlobalAccumulator) {
        let field = FieldBuffer::zeros(fixed.grid().clone());
        let inputs = ForceInputs {
            fixed,
            moving,
            mask: None,
            displacement: &field,
            fixed_displacement: None,
        };
        force.initialize_iteration(&inputs).unwrap();
        let mut acc = GlobalAccumulator::new();
        let updates = (0..field.len()).map(|i| force.compute_update(i, &mut acc)).collect();
        (updates, acc)
    }

    #[test]
    fn test_below_threshold_difference_gives_zero_update() {
        let grid = ImageGrid::<2>::with_size([6, 4]);
        let fixed = ramp(&grid, 0.0005);
        let moving = ramp(&grid, 0.0);
        let mut force = DemonsForce::default();
        let (updates, acc) = run(&mut force, &fixed, &moving);
        assert!(updates.iter().all(|u| *u == [0.0, 0.0]));
        assert_eq!(acc.rms_change(), 0.0);
        assert!(acc.metric() > 0.0);
    }

    #[test]
    fn test_constant_offset_follows_gradient() {
        let grid = ImageGrid::<2>::with_size([6, 4]);
        let fixed = ramp(&grid, 1.0);
        let moving = ramp(&grid, 0.0);
        let mut force = DemonsForce::default();
        let (updates, acc) = run(&mut force, &fixed, &moving);

        // d = 1, g = (2, 0): f = 1 / (4 + 1) * (2, 0)
        for u in &updates {
            assert!((u[0] - 0.4).abs() < 1e-5);
            assert_eq!(u[1], 0.0);
        }
        assert!((acc.metric() - 1.0).abs() < 1e-6);
        assert!((acc.rms_change() - 0.4).abs() < 1e-5);
    }

    #[test]
    fn test_flat_images_hit_denominator_guard() {
        let grid = ImageGrid::<2>::with_size([3, 3]);
        let fixed = ImageBuffer::filled(grid.clone(), 0.0);
        let moving = ImageBuffer::filled(grid, 0.0);
        let mut force = DemonsForce::default();
        let (updates, acc) = run(&mut force, &fixed, &moving);
        assert!(updates.iter().all(|u| *u == [0.0, 0.0]));
        assert_eq!(acc.metric(), 0.0);
    }
}
