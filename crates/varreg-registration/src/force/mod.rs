//! Force functions: per-voxel update vectors from image similarity.
//!
//! # Available forces
//!
//! * **DemonsForce**: Thirion's demons with the spacing-normalized denominator
//! * **SsdForce**: gradient of the sum of squared differences
//! * **NccForce**: gradient of the local normalized cross-correlation

pub mod trait_;
pub mod accumulator;
pub mod images;
pub mod demons;
pub mod ssd;
pub mod ncc;

pub use accumulator::{GlobalAccumulator, SharedAccumulator};
pub use demons::DemonsForce;
pub use images::IterationImages;
pub use ncc::NccForce;
pub use ssd::SsdForce;
pub use trait_::{ForceInputs, ForceSettings, RegistrationFunction};

use crate::config::{ForceKind, RegistrationConfig};
use crate::error::Result;

/// Closed set of force functions selected by configuration.
#[derive(Debug, Clone)]
pub enum ForceFunction<const D: usize> {
    Demons(DemonsForce<D>),
    Ssd(SsdForce<D>),
    Ncc(NccForce<D>),
}

impl<const D: usize> ForceFunction<D> {
    pub fn from_config(config: &RegistrationConfig) -> Self {
        let settings = ForceSettings::from_config(config);
        match config.force.kind {
            ForceKind::Demons => Self::Demons(DemonsForce::new(settings)),
            ForceKind::Ssd => Self::Ssd(SsdForce::new(settings)),
            ForceKind::Ncc => Self::Ncc(NccForce::new(settings, config.force.ncc_radius)),
        }
    }

    pub fn settings(&self) -> &ForceSettings {
        match self {
            Self::Demons(f) => f.settings(),
            Self::Ssd(f) => f.settings(),
            Self::Ncc(f) => f.settings(),
        }
    }
}

impl<const D: usize> RegistrationFunction<D> for ForceFunction<D> {
    fn initialize_iteration(&mut self, inputs: &ForceInputs<'_, D>) -> Result<()> {
        match self {
            Self::Demons(f) => f.initialize_iteration(inputs),
            Self::Ssd(f) => f.initialize_iteration(inputs),
            Self::Ncc(f) => f.initialize_iteration(inputs),
        }
    }

    fn compute_update(&self, linear: usize, accumulator: &mut GlobalAccumulator) -> [f64; D] {
        match self {
            Self::Demons(f) => f.compute_update(linear, accumulator),
            Self::Ssd(f) => f.compute_update(linear, accumulator),
            Self::Ncc(f) => f.compute_update(linear, accumulator),
        }
    }

    fn time_step(&self) -> f64 {
        self.settings().time_step
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Demons(f) => f.name(),
            Self::Ssd(f) => f.name(),
            Self::Ncc(f) => f.name(),
        }
    }
}
