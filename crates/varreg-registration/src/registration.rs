//! Single-level variational registration filter.
//!
//! Each iteration evaluates the force function for every voxel of the
//! fixed grid, optionally regularizes the update, combines it with the
//! current field (`u + tau f`, or `v + tau f` followed by the exponential
//! map in the diffeomorphic search spaces) and optionally regularizes the
//! result. State is published only after an iteration completed, so a
//! failed iteration leaves the previous field and metric readable.

use burn::tensor::backend::Backend;
use rayon::prelude::*;
use tracing::{debug, info};
use varreg_core::filter::ExponentialFieldFilter;
use varreg_core::image::ImageGrid;
use varreg_core::{FieldBuffer, Image, ImageBuffer, VectorField};

use crate::config::{RegistrationConfig, SearchSpace};
use crate::error::{RegistrationError, Result};
use crate::force::{
    ForceFunction, ForceInputs, GlobalAccumulator, RegistrationFunction, SharedAccumulator,
};
use crate::progress::{
    IterationRecord, LevelInfo, LevelTimer, RegistrationObserver, RegistrationObservers,
    StopControl, StopHandle,
};
use crate::regularization::{FieldRegularizer, Regularizer};
use crate::validation::{validate_grid, validate_same_domain};

/// Voxels per work item of the force pass.
const CHUNK_SIZE: usize = 4096;

/// Inputs converted to host buffers by `initialize`.
#[derive(Debug)]
struct LevelState<const D: usize> {
    fixed: ImageBuffer<D>,
    moving: ImageBuffer<D>,
    mask: Option<ImageBuffer<D>>,
    /// Displacement `u`, or velocity `v` in the diffeomorphic search spaces.
    field: FieldBuffer<D>,
    /// `exp(v)` of the published velocity.
    displacement: Option<FieldBuffer<D>>,
    timer: LevelTimer,
}

pub struct VariationalRegistrationFilter<B: Backend, const D: usize> {
    config: RegistrationConfig,
    force: Option<ForceFunction<D>>,
    regularizer: Option<FieldRegularizer>,
    fixed: Option<Image<B, D>>,
    moving: Option<Image<B, D>>,
    mask: Option<Image<B, D>>,
    initial_field: Option<FieldBuffer<D>>,
    number_of_iterations: usize,
    exponential: ExponentialFieldFilter,
    observers: RegistrationObservers,
    level: LevelInfo,
    level_stop: StopHandle,
    run_stop: Option<StopHandle>,
    pool: Option<rayon::ThreadPool>,
    state: Option<LevelState<D>>,
    elapsed_iterations: usize,
    metric: f64,
    rms_change: f64,
}

impl<B: Backend, const D: usize> VariationalRegistrationFilter<B, D> {
    /// Filter without force function or regularizer.
    pub fn new(config: RegistrationConfig) -> Self {
        let exponential = ExponentialFieldFilter::new()
            .with_maximum_iterations(config.exponential_maximum_iterations)
            .with_fixed_iterations(config.exponential_fixed_iterations);
        Self {
            config,
            force: None,
            regularizer: None,
            fixed: None,
            moving: None,
            mask: None,
            initial_field: None,
            number_of_iterations: 10,
            exponential,
            observers: RegistrationObservers::new(),
            level: LevelInfo::single(10),
            level_stop: StopHandle::new(),
            run_stop: None,
            pool: None,
            state: None,
            elapsed_iterations: 0,
            metric: 0.0,
            rms_change: 0.0,
        }
    }

    /// Filter with force function and regularizer selected by `config`.
    pub fn from_config(config: RegistrationConfig) -> Self {
        let force = ForceFunction::from_config(&config);
        let regularizer = FieldRegularizer::from_config(&config);
        Self::new(config).with_force(force).with_regularizer(regularizer)
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

    /// Voxels whose mask value exceeds the background threshold are
    /// registered; the rest get a zero update.
    pub fn with_mask(mut self, mask: Image<B, D>) -> Self {
        self.mask = Some(mask);
        self
    }

    /// Starting field on the fixed grid: a displacement, or a velocity in
    /// the diffeomorphic search spaces.
    pub fn with_initial_field(mut self, field: &VectorField<B, D>) -> Result<Self> {
        self.initial_field = Some(field.to_buffer()?);
        Ok(self)
    }

    pub fn with_initial_buffer(mut self, field: FieldBuffer<D>) -> Self {
        self.initial_field = Some(field);
        self
    }

    pub fn with_number_of_iterations(mut self, iterations: usize) -> Self {
        self.number_of_iterations = iterations;
        self.level.iterations = iterations;
        self
    }

    pub fn with_observer(mut self, observer: std::sync::Arc<dyn RegistrationObserver>) -> Self {
        self.observers.add(observer);
        self
    }

    pub fn with_observers(mut self, observers: RegistrationObservers) -> Self {
        self.observers = observers;
        self
    }

    /// Share an externally owned stop flag for this level.
    pub fn with_stop_handle(mut self, handle: StopHandle) -> Self {
        self.level_stop = handle;
        self
    }

    /// Position inside a multi-resolution run and the run-wide stop flag.
    pub fn with_level(mut self, level: LevelInfo, run_stop: Option<StopHandle>) -> Self {
        self.level = LevelInfo {
            iterations: self.number_of_iterations,
            ..level
        };
        self.run_stop = run_stop;
        self
    }

    pub fn config(&self) -> &RegistrationConfig {
        &self.config
    }

    pub fn number_of_iterations(&self) -> usize {
        self.number_of_iterations
    }

    /// Validate inputs, set up the starting field and initialize the force
    /// function and the regularizer for the fixed grid.
    pub fn initialize(&mut self) -> Result<()> {
        if self.force.is_none() {
            return Err(RegistrationError::invalid_configuration("no force function set"));
        }
        if self.regularizer.is_none() {
            return Err(RegistrationError::invalid_configuration("no regularizer set"));
        }
        self.config.validate()?;

        let fixed = self
            .fixed
            .as_ref()
            .ok_or_else(|| RegistrationError::missing_input("fixed image"))?
            .to_buffer()?;
        let moving = self
            .moving
            .as_ref()
            .ok_or_else(|| RegistrationError::missing_input("moving image"))?
            .to_buffer()?;
        let grid = fixed.grid().clone();
        validate_grid("fixed image", &grid)?;
        validate_grid("moving image", moving.grid())?;

        let mask = match &self.mask {
            Some(mask) => {
                let mask = mask.to_buffer()?;
                validate_same_domain("mask", &grid, mask.grid())?;
                Some(mask)
            }
            None => None,
        };

        let field = match &self.initial_field {
            Some(initial) => {
                validate_same_domain("initial field", &grid, initial.grid())?;
                initial.clone()
            }
            None => FieldBuffer::zeros(grid.clone()),
        };

        self.pool = match self.config.number_of_threads {
            Some(threads) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|e| {
                        RegistrationError::invalid_configuration(format!("thread pool: {}", e))
                    })?,
            ),
            None => None,
        };

        if let Some(regularizer) = self.regularizer.as_mut() {
            Regularizer::<D>::initialize(regularizer, &grid)?;
        }

        let displacement = if self.config.search_space.is_diffeomorphic() {
            Some(self.exponential.compute(&field))
        } else {
            None
        };

        debug!(
            grid = %grid.describe(),
            search_space = ?self.config.search_space,
            "registration filter initialized"
        );

        self.state = Some(LevelState {
            fixed,
            moving,
            mask,
            field,
            displacement,
            timer: LevelTimer::start(),
        });
        self.elapsed_iterations = 0;
        self.metric = 0.0;
        self.rms_change = 0.0;
        self.observers.notify_initialize(&self.level);
        Ok(())
    }

    /// Run one iteration and publish its result.
    pub fn iterate(&mut self) -> Result<()> {
        if self.state.is_none() {
            self.initialize()?;
        }
        let (field, displacement, metric, rms_change) = self.compute_iteration()?;

        if !metric.is_finite() {
            let message = format!("metric is {} at iteration {}", metric, self.elapsed_iterations + 1);
            self.observers.notify_error(&message);
            return Err(RegistrationError::numerical_instability(message));
        }

        let state = self
            .state
            .as_mut()
            .ok_or_else(|| RegistrationError::invalid_configuration("filter not initialized"))?;
        state.field = field;
        state.displacement = displacement;
        let elapsed = state.timer.elapsed();
        self.metric = metric;
        self.rms_change = rms_change;
        self.elapsed_iterations += 1;

        let record = IterationRecord {
            level: self.level.level,
            iteration: self.elapsed_iterations,
            metric,
            rms_change,
            elapsed,
        };
        let control = StopControl::new(self.level_stop.clone(), self.run_stop.clone(), self.level);
        self.observers.notify_iteration(&record, &control);
        Ok(())
    }

    /// Iterate until the budget is used up or a stop is requested.
    pub fn execute(&mut self) -> Result<()> {
        self.initialize()?;
        while self.elapsed_iterations < self.number_of_iterations {
            if self.stop_requested() {
                info!(
                    level = self.level.level,
                    iterations = self.elapsed_iterations,
                    "registration stopped on request"
                );
                break;
            }
            self.iterate()?;
        }
        debug!(
            iterations = self.elapsed_iterations,
            metric = self.metric,
            rms_change = self.rms_change,
            "registration level finished"
        );
        Ok(())
    }

    fn stop_requested(&self) -> bool {
        self.level_stop.is_requested()
            || self.run_stop.as_ref().is_some_and(StopHandle::is_requested)
    }

    fn compute_iteration(&mut self) -> Result<(FieldBuffer<D>, Option<FieldBuffer<D>>, f64, f64)> {
        let tau = self.config.time_step;
        let search_space = self.config.search_space;
        let smooth_update = self.config.smooth_update_field;
        let smooth_field = self.config.smooth_displacement_field;

        let state = self
            .state
            .as_ref()
            .ok_or_else(|| RegistrationError::invalid_configuration("filter not initialized"))?;
        let force = self
            .force
            .as_mut()
            .ok_or_else(|| RegistrationError::invalid_configuration("no force function set"))?;
        let regularizer = self
            .regularizer
            .as_ref()
            .ok_or_else(|| RegistrationError::invalid_configuration("no regularizer set"))?;
        let pool = self.pool.as_ref();

        let (mut update, metric, rms_change) = match search_space {
            SearchSpace::Standard | SearchSpace::Diffeomorphic => {
                let displacement = match (&state.displacement, search_space) {
                    (Some(d), SearchSpace::Diffeomorphic) => d,
                    _ => &state.field,
                };
                force.initialize_iteration(&ForceInputs {
                    fixed: &state.fixed,
                    moving: &state.moving,
                    mask: state.mask.as_ref(),
                    displacement,
                    fixed_displacement: None,
                })?;
                let (update, totals) = run_force_pass(&*force, state.field.grid(), pool);
                (update, totals.metric(), totals.rms_change())
            }
            SearchSpace::SymmetricDiffeomorphic => {
                let half = state.field.scaled(0.5);
                let forward_half = self.exponential.compute(&half);
                let backward_half = self.exponential.compute(&half.scaled(-1.0));

                force.initialize_iteration(&ForceInputs {
                    fixed: &state.fixed,
                    moving: &state.moving,
                    mask: state.mask.as_ref(),
                    displacement: &forward_half,
                    fixed_displacement: Some(&backward_half),
                })?;
                let mut backward = force.clone();
                backward.initialize_iteration(&ForceInputs {
                    fixed: &state.moving,
                    moving: &state.fixed,
                    mask: state.mask.as_ref(),
                    displacement: &backward_half,
                    fixed_displacement: Some(&forward_half),
                })?;

                let grid = state.field.grid();
                let (forward_update, forward_totals) = run_force_pass(&*force, grid, pool);
                let (backward_update, backward_totals) = run_force_pass(&backward, grid, pool);

                let mut update = forward_update.scaled(0.5);
                update.add_scaled(&backward_update, -0.5)?;
                let metric = 0.5 * (forward_totals.metric() + backward_totals.metric());
                let rms = symmetric_rms(&update, tau, forward_totals.number_of_pixels_processed);
                (update, metric, rms)
            }
        };

        if smooth_update {
            update = regularizer.regularize(&update)?;
        }

        let mut field = state.field.clone();
        field.add_scaled(&update, tau)?;
        if smooth_field {
            field = regularizer.regularize(&field)?;
        }

        let displacement = if search_space.is_diffeomorphic() {
            Some(self.exponential.compute(&field))
        } else {
            None
        };
        Ok((field, displacement, metric, rms_change))
    }

    /// Mean metric of the last completed iteration.
    pub fn metric(&self) -> f64 {
        self.metric
    }

    /// RMS of `tau f` over processed voxels in the last completed iteration.
    pub fn rms_change(&self) -> f64 {
        self.rms_change
    }

    pub fn elapsed_iterations(&self) -> usize {
        self.elapsed_iterations
    }

    /// Request that `execute` returns before its next iteration.
    pub fn stop_registration(&self) {
        self.level_stop.request();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.level_stop.clone()
    }

    pub fn level(&self) -> &LevelInfo {
        &self.level
    }

    /// Published displacement field on the fixed grid (`exp(v)` in the
    /// diffeomorphic search spaces).
    pub fn displacement_buffer(&self) -> Result<&FieldBuffer<D>> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| RegistrationError::missing_input("filter has not been initialized"))?;
        Ok(state.displacement.as_ref().unwrap_or(&state.field))
    }

    /// Published velocity field; only available in the diffeomorphic
    /// search spaces.
    pub fn velocity_buffer(&self) -> Result<&FieldBuffer<D>> {
        if !self.config.search_space.is_diffeomorphic() {
            return Err(RegistrationError::invalid_configuration(
                "velocity field only exists in the diffeomorphic search spaces",
            ));
        }
        self.state
            .as_ref()
            .map(|state| &state.field)
            .ok_or_else(|| RegistrationError::missing_input("filter has not been initialized"))
    }

    pub fn displacement_field(&self) -> Result<VectorField<B, D>> {
        Ok(VectorField::from_buffer(self.displacement_buffer()?, &self.device()?))
    }

    pub fn velocity_field(&self) -> Result<VectorField<B, D>> {
        Ok(VectorField::from_buffer(self.velocity_buffer()?, &self.device()?))
    }

    pub fn fixed_grid(&self) -> Option<&ImageGrid<D>> {
        self.state.as_ref().map(|state| state.fixed.grid())
    }

    fn device(&self) -> Result<B::Device> {
        self.fixed
            .as_ref()
            .map(|image| image.device())
            .ok_or_else(|| RegistrationError::missing_input("fixed image"))
    }
}

/// Evaluate `force` at every voxel of `grid`. Workers fill disjoint chunks
/// of the update and merge their statistics once per chunk.
fn run_force_pass<const D: usize, F: RegistrationFunction<D>>(
    force: &F,
    grid: &ImageGrid<D>,
    pool: Option<&rayon::ThreadPool>,
) -> (FieldBuffer<D>, GlobalAccumulator) {
    let pass = || {
        let mut vectors = vec![[0.0f64; D]; grid.num_voxels()];
        let shared = SharedAccumulator::new();
        vectors
            .par_chunks_mut(CHUNK_SIZE)
            .enumerate()
            .for_each(|(chunk, out)| {
                let mut local = GlobalAccumulator::new();
                let offset = chunk * CHUNK_SIZE;
                for (i, vector) in out.iter_mut().enumerate() {
                    *vector = force.compute_update(offset + i, &mut local);
                }
                shared.merge(&local);
            });
        (vectors, shared.into_inner())
    };
    let (vectors, totals) = match pool {
        Some(pool) => pool.install(pass),
        None => pass(),
    };

    let mut update = FieldBuffer::zeros(grid.clone());
    for (linear, vector) in vectors.into_iter().enumerate() {
        update.set_vector(linear, vector);
    }
    (update, totals)
}

fn symmetric_rms<const D: usize>(update: &FieldBuffer<D>, tau: f64, processed: usize) -> f64 {
    if processed == 0 {
        return 0.0;
    }
    let sum: f64 = (0..update.len())
        .map(|i| update.vector_at(i).iter().map(|v| tau * tau * v * v).sum::<f64>())
        .sum();
    (sum / processed as f64).sqrt()
}

impl<B: Backend, const D: usize> std::fmt::Debug for VariationalRegistrationFilter<B, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariationalRegistrationFilter")
            .field("config", &self.config)
            .field("force", &self.force.as_ref().map(|force| force.name()))
            .field("number_of_iterations", &self.number_of_iterations)
            .field("elapsed_iterations", &self.elapsed_iterations)
            .field("metric", &self.metric)
            .finish()
    }
}

