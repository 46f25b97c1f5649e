//! Coarse-to-fine registration over an image pyramid.
//!
//! Each level runs a [`VariationalRegistrationFilter`] on smoothed and
//! subsampled copies of the inputs. The field of one level, resampled onto
//! the next grid, is the starting field of the next level. The field is
//! expanded to the full-resolution grid at the end only when the last
//! level ran on a subsampled grid.

use std::sync::Arc;

use burn::tensor::backend::Backend;
use tracing::{debug, info};
use varreg_core::filter::{
    default_shrink_factors, prepare_level_mask, ExponentialFieldFilter, FieldExpander, GaussianFilter,
    MultiResolutionPyramid, WarpImageFilter,
};
use varreg_core::image::ImageGrid;
use varreg_core::{FieldBuffer, Image, VectorField};

use crate::config::RegistrationConfig;
use crate::error::{RegistrationError, Result};
use crate::force::ForceFunction;
use crate::progress::{LevelInfo, RegistrationObserver, RegistrationObservers, StopHandle};
use crate::registration::VariationalRegistrationFilter;
use crate::regularization::FieldRegularizer;
use crate::validation::{validate_iterations, validate_same_domain, validate_shrink_factors};

/// Shrink factors and iteration budget per level, coarsest first.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationSchedule<const D: usize> {
    pub shrink_factors: Vec<[usize; D]>,
    pub iterations: Vec<usize>,
}

impl<const D: usize> RegistrationSchedule<D> {
    /// Power-of-two factors with 400 iterations on every level.
    pub fn new(levels: usize) -> Self {
        Self {
            shrink_factors: default_shrink_factors(levels),
            iterations: vec![400; levels],
        }
    }

    pub fn with_iterations(mut self, iterations: Vec<usize>) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_shrink_factors(mut self, shrink_factors: Vec<[usize; D]>) -> Self {
        self.shrink_factors = shrink_factors;
        self
    }

    pub fn levels(&self) -> usize {
        self.shrink_factors.len()
    }

    pub fn validate(&self) -> Result<()> {
        validate_iterations(self.levels(), &self.iterations)?;
        validate_shrink_factors(&self.shrink_factors)
    }
}

pub struct MultiResolutionRegistration<B: Backend, const D: usize> {
    config: RegistrationConfig,
    schedule: RegistrationSchedule<D>,
    force: Option<ForceFunction<D>>,
    regularizer: Option<FieldRegularizer>,
    fixed: Option<Image<B, D>>,
    moving: Option<Image<B, D>>,
    mask: Option<Image<B, D>>,
    initial_field: Option<FieldBuffer<D>>,
    arbitrary_initial_field: Option<FieldBuffer<D>>,
    observers: RegistrationObservers,
    run_stop: StopHandle,
    level_stop: StopHandle,
    /// Displacement, or velocity in the diffeomorphic search spaces.
    field: Option<FieldBuffer<D>>,
    displacement: Option<FieldBuffer<D>>,
    elapsed_levels: usize,
    metric: f64,
}

impl<B: Backend, const D: usize> MultiResolutionRegistration<B, D> {
    /// Driver without force function or regularizer.
    pub fn new(config: RegistrationConfig, schedule: RegistrationSchedule<D>) -> Self {
        Self {
            config,
            schedule,
            force: None,
            regularizer: None,
            fixed: None,
            moving: None,
            mask: None,
            initial_field: None,
            arbitrary_initial_field: None,
            observers: RegistrationObservers::new(),
            run_stop: StopHandle::new(),
            level_stop: StopHandle::new(),
            field: None,
            displacement: None,
            elapsed_levels: 0,
            metric: 0.0,
        }
    }

    /// Driver with force function and regularizer selected by `config`.
    pub fn from_config(config: RegistrationConfig, schedule: RegistrationSchedule<D>) -> Self {
        let force = ForceFunction::from_config(&config);
        let regularizer = FieldRegularizer::from_config(&config);
        Self::new(config, schedule)
            .with_force(force)
            .with_regularizer(regularizer)
    }

    pub fn with_force(mut self, force: ForceFunction<D>) -> Self {
        self.force = Some(force);
        self
    }

    pub fn with_regularizer(mut self, regularizer: FieldRegularizer) -> Self {
        self.regularizer = Some(regularizer);
        self
    }

    pub fn with_fixed_image(mut self, image: Image<B, D>) -> Self {
        self.fixed = Some(image);
        self
    }

    pub fn with_moving_image(mut self, image: Image<B, D>) -> Self {
        self.moving = Some(image);
        self
    }

    pub fn with_mask(mut self, mask: Image<B, D>) -> Self {
        self.mask = Some(mask);
        self
    }

    /// Starting field on the full-resolution fixed grid.
    pub fn with_initial_field(mut self, field: &VectorField<B, D>) -> Result<Self> {
        self.initial_field = Some(field.to_buffer()?);
        Ok(self)
    }

    /// Starting field on any grid. It is smoothed to the scale of the
    /// coarsest level before resampling.
    pub fn with_arbitrary_initial_field(mut self, field: &VectorField<B, D>) -> Result<Self> {
        self.arbitrary_initial_field = Some(field.to_buffer()?);
        Ok(self)
    }

    pub fn with_observer(mut self, observer: Arc<dyn RegistrationObserver>) -> Self {
        self.observers.add(observer);
        self
    }

    pub fn config(&self) -> &RegistrationConfig {
        &self.config
    }

    pub fn schedule(&self) -> &RegistrationSchedule<D> {
        &self.schedule
    }

    /// End the run: the current level stops before its next iteration and
    /// no further level starts. A request made before `execute` stops the
    /// next run before its first level.
    pub fn stop_registration(&self) {
        self.run_stop.request();
        self.level_stop.request();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.run_stop.clone()
    }

    pub fn elapsed_levels(&self) -> usize {
        self.elapsed_levels
    }

    /// Metric of the last iteration of the last executed level.
    pub fn metric(&self) -> f64 {
        self.metric
    }

    pub fn execute(&mut self) -> Result<()> {
        let force = self
            .force
            .clone()
            .ok_or_else(|| RegistrationError::invalid_configuration("no force function set"))?;
        let regularizer = self
            .regularizer
            .clone()
            .ok_or_else(|| RegistrationError::invalid_configuration("no regularizer set"))?;
        self.config.validate()?;
        self.schedule.validate()?;
        if self.initial_field.is_some() && self.arbitrary_initial_field.is_some() {
            return Err(RegistrationError::invalid_configuration(
                "initial field and arbitrary initial field are mutually exclusive",
            ));
        }
        let fixed = self
            .fixed
            .clone()
            .ok_or_else(|| RegistrationError::missing_input("fixed image"))?;
        let moving = self
            .moving
            .clone()
            .ok_or_else(|| RegistrationError::missing_input("moving image"))?;
        let fixed_grid = fixed.grid();
        if let Some(mask) = &self.mask {
            validate_same_domain("mask", &fixed_grid, &mask.grid())?;
        }
        if let Some(initial) = &self.initial_field {
            validate_same_domain("initial field", &fixed_grid, initial.grid())?;
        }

        let factors = &self.schedule.shrink_factors;
        let fixed_pyramid = MultiResolutionPyramid::new(&fixed, factors);
        let moving_pyramid = MultiResolutionPyramid::new(&moving, factors);
        let mask_pyramid = self
            .mask
            .as_ref()
            .map(|mask| MultiResolutionPyramid::new(mask, factors));
        let device = fixed.device();
        let levels = self.schedule.levels();

        self.elapsed_levels = 0;
        self.field = None;
        self.displacement = None;
        let expander = FieldExpander::new();
        let mut last_factors: Option<[usize; D]> = None;

        for level in 0..levels {
            if self.run_stop.is_requested() {
                info!(level, "multi-resolution run stopped before level");
                break;
            }
            let fixed_level = level_image(&fixed_pyramid, level)?;
            let moving_level = level_image(&moving_pyramid, level)?;
            let level_grid = fixed_level.grid();

            let start = match &self.field {
                Some(previous) => Some(expander.expand(previous, &level_grid)),
                None => self.initial_for_level(&fixed_grid, &level_grid, &factors[0]),
            };

            let info = LevelInfo {
                level,
                number_of_levels: levels,
                iterations: self.schedule.iterations[level],
            };
            info!(
                "Level {}/{}: shrink factors {:?}, grid {}",
                level + 1,
                levels,
                factors[level],
                level_grid.describe()
            );

            self.level_stop.reset();
            let mut filter = VariationalRegistrationFilter::<B, D>::new(self.config.clone())
                .with_force(force.clone())
                .with_regularizer(regularizer.clone())
                .with_fixed_image(fixed_level.clone())
                .with_moving_image(moving_level.clone())
                .with_number_of_iterations(info.iterations)
                .with_observers(self.observers.clone())
                .with_stop_handle(self.level_stop.clone())
                .with_level(info, Some(self.run_stop.clone()));
            if let Some(mask_pyramid) = &mask_pyramid {
                let mask = level_image(mask_pyramid, level)?.to_buffer()?;
                let prepared = prepare_level_mask(&mask);
                filter = filter.with_mask(Image::from_buffer(&prepared, &device));
            }
            if let Some(start) = start {
                filter = filter.with_initial_buffer(start);
            }

            if let Err(err) = filter.execute() {
                self.observers.notify_error(&err.to_string());
                self.finish(&fixed_grid, last_factors);
                return Err(err);
            }

            self.field = Some(if self.config.search_space.is_diffeomorphic() {
                filter.velocity_buffer()?.clone()
            } else {
                filter.displacement_buffer()?.clone()
            });
            self.metric = filter.metric();
            self.elapsed_levels += 1;
            last_factors = Some(factors[level]);
            self.observers
                .notify_level_completed(&info, filter.elapsed_iterations());
            debug!(level, iterations = filter.elapsed_iterations(), metric = self.metric, "level done");
        }

        self.finish(&fixed_grid, last_factors);
        Ok(())
    }

    fn initial_for_level(
        &self,
        fixed_grid: &ImageGrid<D>,
        level_grid: &ImageGrid<D>,
        coarsest_factors: &[usize; D],
    ) -> Option<FieldBuffer<D>> {
        let expander = FieldExpander::new();
        if let Some(initial) = &self.initial_field {
            return Some(expander.expand(initial, level_grid));
        }
        let arbitrary = self.arbitrary_initial_field.as_ref()?;
        let field_grid = arbitrary.grid();
        let sigmas: Vec<f64> = (0..D)
            .map(|k| 0.5 * coarsest_factors[k] as f64 * fixed_grid.spacing()[k] / field_grid.spacing()[k])
            .collect();
        let filter = GaussianFilter::new(sigmas).with_image_spacing(false);
        let mut smoothed = arbitrary.clone();
        for component in smoothed.components_mut().iter_mut() {
            filter.apply_buffer(component, field_grid);
        }
        Some(expander.expand(&smoothed, level_grid))
    }

    /// Expands the field of the last completed level and computes the
    /// displacement. Also runs when a level fails, so the accessors expose
    /// the result of the levels that did complete.
    fn finish(&mut self, fixed_grid: &ImageGrid<D>, last_factors: Option<[usize; D]>) {
        self.run_stop.reset();
        let Some(field) = self.field.take() else {
            return;
        };
        let subsampled = last_factors.is_some_and(|f| f.iter().any(|&v| v != 1));
        let field = if subsampled {
            FieldExpander::new().expand(&field, fixed_grid)
        } else {
            field
        };
        self.displacement = if self.config.search_space.is_diffeomorphic() {
            let exponential = ExponentialFieldFilter::new()
                .with_maximum_iterations(self.config.exponential_maximum_iterations)
                .with_fixed_iterations(self.config.exponential_fixed_iterations);
            Some(exponential.compute(&field))
        } else {
            None
        };
        self.field = Some(field);
    }

    /// Final displacement field (`exp(v)` in the diffeomorphic search spaces).
    pub fn displacement_buffer(&self) -> Result<&FieldBuffer<D>> {
        let displacement = if self.config.search_space.is_diffeomorphic() {
            self.displacement.as_ref()
        } else {
            self.field.as_ref()
        };
        displacement.ok_or_else(|| RegistrationError::missing_input("registration has not been executed"))
    }

    /// Final velocity field; diffeomorphic search spaces only.
    pub fn velocity_buffer(&self) -> Result<&FieldBuffer<D>> {
        if !self.config.search_space.is_diffeomorphic() {
            return Err(RegistrationError::invalid_configuration(
                "velocity field only exists in the diffeomorphic search spaces",
            ));
        }
        self.field
            .as_ref()
            .ok_or_else(|| RegistrationError::missing_input("registration has not been executed"))
    }

    pub fn displacement_field(&self) -> Result<VectorField<B, D>> {
        Ok(VectorField::from_buffer(self.displacement_buffer()?, &self.device()?))
    }

    pub fn velocity_field(&self) -> Result<VectorField<B, D>> {
        Ok(VectorField::from_buffer(self.velocity_buffer()?, &self.device()?))
    }

    /// Moving image resampled through the final displacement.
    pub fn warp_moving(&self) -> Result<Image<B, D>> {
        let moving = self
            .moving
            .as_ref()
            .ok_or_else(|| RegistrationError::missing_input("moving image"))?;
        let field = self.displacement_field()?;
        Ok(WarpImageFilter::new().warp_image(moving, &field)?)
    }

    fn device(&self) -> Result<B::Device> {
        self.fixed
            .as_ref()
            .map(|image| image.device())
            .ok_or_else(|| RegistrationError::missing_input("fixed image"))
    }
}

fn level_image<B: Backend, const D: usize>(
    pyramid: &MultiResolutionPyramid<B, D>,
    level: usize,
) -> Result<&Image<B, D>> {
    pyramid.get_level(level).ok_or_else(|| {
        RegistrationError::invalid_configuration(format!("pyramid has no level {}", level))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use burn_ndarray::NdArray;

    use crate::config::SearchSpace;

    type B = NdArray<f32>;

    #[test]
    fn test_failed_level_exposes_exponential_of_velocity() {
        let grid = ImageGrid::<2>::with_size([8, 8]);
        let config = RegistrationConfig::default().with_search_space(SearchSpace::Diffeomorphic);
        let mut registration = MultiResolutionRegistration::<B, 2>::from_config(
            config,
            RegistrationSchedule::new(2).with_iterations(vec![5, 5]),
        );
        let coarse = ImageGrid::<2>::with_size([4, 4]);
        let mut velocity = FieldBuffer::zeros(coarse.clone());
        for i in 0..coarse.num_voxels() {
            let [x, _] = coarse.multi_index(i);
            velocity.set_vector(i, [0.4 * x as f64, -0.1]);
        }

        // State left by a completed coarse level before the fine level fails.
        registration.field = Some(velocity);
        assert!(registration.displacement_buffer().is_err());

        registration.finish(&grid, Some([2, 2]));
        let velocity = registration.velocity_buffer().unwrap().clone();
        let displacement = registration.displacement_buffer().unwrap();
        assert!(velocity.grid().same_domain(&grid));
        let expected = ExponentialFieldFilter::new().compute(&velocity);
        assert!(displacement.max_abs_diff(&expected).unwrap() < 1e-9);
        assert!(displacement.max_abs_diff(&velocity).unwrap() > 1e-3);
    }

    #[test]
    fn test_default_schedule() {
        let schedule = RegistrationSchedule::<3>::new(3);
        assert_eq!(schedule.shrink_factors, vec![[4; 3], [2; 3], [1; 3]]);
        assert_eq!(schedule.iterations, vec![400; 3]);
        assert!(schedule.validate().is_ok());
    }

    #[test]
    fn test_schedule_validation() {
        let schedule = RegistrationSchedule::<2>::new(3).with_iterations(vec![10, 10]);
        assert!(matches!(
            schedule.validate(),
            Err(RegistrationError::InvalidConfiguration(_))
        ));
        let zero = RegistrationSchedule::<2>::new(1).with_shrink_factors(vec![[0, 1]]);
        assert!(zero.validate().is_err());
    }
}
