//! Sum-of-squared-differences force, `f = (F(x) - M(x + u(x))) * g`.
//!
//! The step length scales with the squared intensity range, so the time
//! step has to be chosen accordingly.

use super::accumulator::GlobalAccumulator;
use super::images::IterationImages;
use super::trait_::{ForceInputs, ForceSettings, RegistrationFunction};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct SsdForce<const D: usize> {
    settings: ForceSettings,
    images: Option<IterationImages<D>>,
}

impl<const D: usize> SsdForce<D> {
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

impl<const D: usize> RegistrationFunction<D> for SsdForce<D> {
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
        let update: [f64; D] = std::array::from_fn(|k| diff * gradient[k]);
        let tau = self.settings.time_step;
        accumulator.add_change(tau * tau * update.iter().map(|v| v * v).sum::<f64>());
        update
    }

    fn time_step(&self) -> f64 {
        self.settings.time_step
    }

    fn name(&self) -> &'static str {
        "ssd"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use varreg_core::image::ImageGrid;
    use varreg_core::{FieldBuffer, ImageBuffer};

    #[test]
    fn test_ssd_update_is_difference_times_gradient() {
        let grid = ImageGrid::<2>::with_size([5, 3]);
        let fixed_values = (0..grid.num_voxels())
            .map(|i| grid.multi_index(i)[1] as f32 + 0.5)
            .collect();
        let moving_values = (0..grid.num_voxels())
            .map(|i| grid.multi_index(i)[1] as f32)
            .collect();
        let fixed = ImageBuffer::new(grid.clone(), fixed_values).unwrap();
        let moving = ImageBuffer::new(grid.clone(), moving_values).unwrap();
        let field = FieldBuffer::zeros(grid);

        let mut force = SsdForce::new(ForceSettings::default());
        force
            .initialize_iteration(&ForceInputs {
                fixed: &fixed,
                moving: &moving,
                mask: None,
                displacement: &field,
                fixed_displacement: None,
            })
            .unwrap();
        let mut acc = GlobalAccumulator::new();
        let update = force.compute_update(7, &mut acc);
        assert_eq!(update[0], 0.0);
        assert!((update[1] - 0.5).abs() < 1e-6);
        assert!((acc.metric() - 0.25).abs() < 1e-6);
    }
}
