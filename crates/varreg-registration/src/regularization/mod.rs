//! Field regularizers.
//!
//! # Available regularizers
//!
//! * **GaussianRegularizer**: separable Gaussian convolution per component
//! * **DiffusionRegularizer**: semi-implicit diffusion, one Thomas solve per line
//! * **ElasticRegularizer**: Navier-Lame operator by damped Jacobi sweeps

pub mod trait_;
pub mod gaussian;
pub mod diffusion;
pub mod elastic;

pub use diffusion::DiffusionRegularizer;
pub use elastic::ElasticRegularizer;
pub use gaussian::GaussianRegularizer;
pub use trait_::Regularizer;

use varreg_core::image::ImageGrid;
use varreg_core::FieldBuffer;

use crate::config::{RegistrationConfig, RegularizerKind};
use crate::error::Result;

/// Closed set of regularizers selected by configuration.
#[derive(Debug, Clone)]
pub enum FieldRegularizer {
    Gaussian(GaussianRegularizer),
    Diffusion(DiffusionRegularizer),
    Elastic(ElasticRegularizer),
}

impl FieldRegularizer {
    pub fn from_config(config: &RegistrationConfig) -> Self {
        let reg = &config.regularizer;
        match reg.kind {
            RegularizerKind::Gaussian => Self::Gaussian(
                GaussianRegularizer::new(reg.gaussian_sigmas.clone())
                    .with_maximum_error(reg.maximum_error)
                    .with_max_kernel_width(reg.maximum_kernel_width)
                    .with_image_spacing(config.use_image_spacing),
            ),
            RegularizerKind::Diffusion => Self::Diffusion(
                DiffusionRegularizer::new(reg.alpha, config.time_step)
                    .with_image_spacing(config.use_image_spacing),
            ),
            RegularizerKind::Elastic => Self::Elastic(
                ElasticRegularizer::new(reg.mu, reg.lambda, config.time_step)
                    .with_maximum_iterations(reg.elastic_iterations)
                    .with_tolerance(reg.elastic_tolerance)
                    .with_image_spacing(config.use_image_spacing),
            ),
        }
    }
}

impl<const D: usize> Regularizer<D> for FieldRegularizer {
    fn initialize(&mut self, grid: &ImageGrid<D>) -> Result<()> {
        match self {
            Self::Gaussian(r) => Regularizer::<D>::initialize(r, grid),
            Self::Diffusion(r) => Regularizer::<D>::initialize(r, grid),
            Self::Elastic(r) => Regularizer::<D>::initialize(r, grid),
        }
    }

    fn regularize(&self, field: &FieldBuffer<D>) -> Result<FieldBuffer<D>> {
        match self {
            Self::Gaussian(r) => r.regularize(field),
            Self::Diffusion(r) => r.regularize(field),
            Self::Elastic(r) => r.regularize(field),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Gaussian(r) => Regularizer::<D>::name(r),
            Self::Diffusion(r) => Regularizer::<D>::name(r),
            Self::Elastic(r) => Regularizer::<D>::name(r),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_selects_variant() {
        let config = RegistrationConfig::default();
        assert!(matches!(FieldRegularizer::from_config(&config), FieldRegularizer::Diffusion(_)));

        let config = RegistrationConfig::default().with_regularizer_kind(RegularizerKind::Elastic);
        let reg = FieldRegularizer::from_config(&config);
        assert_eq!(Regularizer::<2>::name(&reg), "elastic");
    }
}
