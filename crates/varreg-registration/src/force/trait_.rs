//! Force function trait and the inputs of one iteration.

use varreg_core::filter::BoundaryPolicy;
use varreg_core::{FieldBuffer, ImageBuffer};

use super::accumulator::GlobalAccumulator;
use crate::config::{GradientType, RegistrationConfig};
use crate::error::Result;

/// Images and fields a force function sees at the start of an iteration.
#[derive(Debug, Clone, Copy)]
pub struct ForceInputs<'a, const D: usize> {
    pub fixed: &'a ImageBuffer<D>,
    pub moving: &'a ImageBuffer<D>,
    /// Foreground where the value exceeds the background threshold.
    pub mask: Option<&'a ImageBuffer<D>>,
    /// Displacement applied to the moving image. Its grid is the grid of
    /// the computed update.
    pub displacement: &'a FieldBuffer<D>,
    /// Displacement applied to the fixed image (symmetric search space).
    /// Without it the fixed image must already lie on the field grid.
    pub fixed_displacement: Option<&'a FieldBuffer<D>>,
}

/// Parameters shared by every force variant.
#[derive(Debug, Clone, PartialEq)]
pub struct ForceSettings {
    pub time_step: f64,
    pub gradient_type: GradientType,
    pub intensity_difference_threshold: f64,
    pub denominator_threshold: f64,
    pub mask_background_threshold: f32,
    pub use_image_spacing: bool,
    pub boundary: BoundaryPolicy,
}

impl ForceSettings {
    pub fn from_config(config: &RegistrationConfig) -> Self {
        Self {
            time_step: config.time_step,
            gradient_type: config.force.gradient_type,
            intensity_difference_threshold: config.force.intensity_difference_threshold,
            denominator_threshold: config.force.denominator_threshold,
            mask_background_threshold: config.mask_background_threshold,
            use_image_spacing: config.use_image_spacing,
            boundary: BoundaryPolicy::Clamp,
        }
    }
}

impl Default for ForceSettings {
    fn default() -> Self {
        Self::from_config(&RegistrationConfig::default())
    }
}

/// Capability shared by the force functions.
///
/// `initialize_iteration` runs once per iteration on a single thread and
/// prepares everything `compute_update` reads; `compute_update` is then
/// evaluated concurrently for every voxel and must not touch shared state
/// other than the caller-provided accumulator.
pub trait RegistrationFunction<const D: usize>: Send + Sync {
    /// Warp the inputs with the current fields and rebuild derived data.
    fn initialize_iteration(&mut self, inputs: &ForceInputs<'_, D>) -> Result<()>;

    /// Raw force at voxel `linear` of the field grid. The filter scales it
    /// by the time step when combining.
    fn compute_update(&self, linear: usize, accumulator: &mut GlobalAccumulator) -> [f64; D];

    fn time_step(&self) -> f64;

    fn name(&self) -> &'static str;
}
