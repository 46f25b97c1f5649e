//! Per-run configuration passed explicitly to every component.

use serde::{Deserialize, Serialize};

use crate::error::{RegistrationError, Result};

/// How the transformation is parameterized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SearchSpace {
    /// Displacement field, `phi(x) = x + u(x)`.
    #[default]
    Standard,
    /// Stationary velocity field, `phi = exp(v)`.
    Diffeomorphic,
    /// Velocity field with forces evaluated between the half-warped images.
    SymmetricDiffeomorphic,
}

impl SearchSpace {
    pub fn is_diffeomorphic(self) -> bool {
        !matches!(self, SearchSpace::Standard)
    }
}

/// Image whose gradient drives the force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum GradientType {
    /// Gradient of the warped moving image (active force).
    #[default]
    WarpedMoving,
    /// Gradient of the fixed image (passive force).
    Fixed,
    /// Mean of both gradients.
    Symmetric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ForceKind {
    #[default]
    Demons,
    Ssd,
    Ncc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForceConfig {
    pub kind: ForceKind,
    pub gradient_type: GradientType,
    /// Intensity differences below this produce a zero update.
    pub intensity_difference_threshold: f64,
    /// Denominators below this produce a zero update.
    pub denominator_threshold: f64,
    /// Half-width of the local correlation window, in voxels.
    pub ncc_radius: usize,
}

impl Default for ForceConfig {
    fn default() -> Self {
        Self {
            kind: ForceKind::Demons,
            gradient_type: GradientType::WarpedMoving,
            intensity_difference_threshold: 0.001,
            denominator_threshold: 1e-9,
            ncc_radius: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RegularizerKind {
    Gaussian,
    #[default]
    Diffusion,
    Elastic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegularizerConfig {
    pub kind: RegularizerKind,
    /// Diffusion weight.
    pub alpha: f64,
    /// Gaussian standard deviations; one value applies to every axis.
    pub gaussian_sigmas: Vec<f64>,
    /// Tolerated truncation error of the Gaussian kernel.
    pub maximum_error: f64,
    pub maximum_kernel_width: usize,
    /// Lamé shear modulus.
    pub mu: f64,
    /// Lamé first parameter.
    pub lambda: f64,
    /// Jacobi sweeps per elastic solve.
    pub elastic_iterations: usize,
    /// Early exit when a sweep changes no value by more than this.
    pub elastic_tolerance: f64,
}

impl Default for RegularizerConfig {
    fn default() -> Self {
        Self {
            kind: RegularizerKind::Diffusion,
            alpha: 0.5,
            gaussian_sigmas: vec![0.5f64.sqrt()],
            maximum_error: 0.1,
            maximum_kernel_width: 30,
            mu: 0.5,
            lambda: 0.5,
            elastic_iterations: 40,
            elastic_tolerance: 1e-5,
        }
    }
}

/// Configuration shared by the single-level filter and the
/// multi-resolution driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    pub time_step: f64,
    pub search_space: SearchSpace,
    /// Interpret regularizer parameters and force normalizers in physical
    /// units.
    pub use_image_spacing: bool,
    /// Regularize the update field before combining (viscous).
    pub smooth_update_field: bool,
    /// Regularize the combined field (elastic).
    pub smooth_displacement_field: bool,
    /// Mask values at or below this are background.
    pub mask_background_threshold: f32,
    pub exponential_maximum_iterations: usize,
    pub exponential_fixed_iterations: Option<usize>,
    /// Worker threads for the per-voxel passes; `None` uses rayon's default.
    pub number_of_threads: Option<usize>,
    pub force: ForceConfig,
    pub regularizer: RegularizerConfig,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            time_step: 1.0,
            search_space: SearchSpace::Standard,
            use_image_spacing: true,
            smooth_update_field: false,
            smooth_displacement_field: true,
            mask_background_threshold: 0.0,
            exponential_maximum_iterations: 20,
            exponential_fixed_iterations: None,
            number_of_threads: None,
            force: ForceConfig::default(),
            regularizer: RegularizerConfig::default(),
        }
    }
}

impl RegistrationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_time_step(mut self, time_step: f64) -> Self {
        self.time_step = time_step;
        self
    }

    pub fn with_search_space(mut self, search_space: SearchSpace) -> Self {
        self.search_space = search_space;
        self
    }

    pub fn with_image_spacing(mut self, use_image_spacing: bool) -> Self {
        self.use_image_spacing = use_image_spacing;
        self
    }

    pub fn with_smooth_update_field(mut self, enabled: bool) -> Self {
        self.smooth_update_field = enabled;
        self
    }

    pub fn with_smooth_displacement_field(mut self, enabled: bool) -> Self {
        self.smooth_displacement_field = enabled;
        self
    }

    pub fn with_mask_background_threshold(mut self, threshold: f32) -> Self {
        self.mask_background_threshold = threshold;
        self
    }

    pub fn with_number_of_threads(mut self, threads: usize) -> Self {
        self.number_of_threads = Some(threads);
        self
    }

    pub fn with_exponential_iterations(mut self, maximum: usize, fixed: Option<usize>) -> Self {
        self.exponential_maximum_iterations = maximum;
        self.exponential_fixed_iterations = fixed;
        self
    }

    pub fn with_force(mut self, force: ForceConfig) -> Self {
        self.force = force;
        self
    }

    pub fn with_force_kind(mut self, kind: ForceKind) -> Self {
        self.force.kind = kind;
        self
    }

    pub fn with_gradient_type(mut self, gradient_type: GradientType) -> Self {
        self.force.gradient_type = gradient_type;
        self
    }

    pub fn with_regularizer(mut self, regularizer: RegularizerConfig) -> Self {
        self.regularizer = regularizer;
        self
    }

    pub fn with_regularizer_kind(mut self, kind: RegularizerKind) -> Self {
        self.regularizer.kind = kind;
        self
    }

    pub fn validate(&self) -> Result<()> {
        crate::validation::validate_time_step(self.time_step)?;
        if self.number_of_threads == Some(0) {
            return Err(RegistrationError::invalid_configuration(
                "number of threads must be positive",
            ));
        }
        if !is_non_negative(self.force.intensity_difference_threshold) {
            return Err(RegistrationError::invalid_configuration(
                "intensity difference threshold must be non-negative",
            ));
        }
        if self.force.kind == ForceKind::Ncc && self.force.ncc_radius == 0 {
            return Err(RegistrationError::invalid_configuration(
                "NCC radius must be at least one voxel",
            ));
        }
        let reg = &self.regularizer;
        match reg.kind {
            RegularizerKind::Gaussian => {
                if reg.gaussian_sigmas.is_empty() || reg.gaussian_sigmas.iter().any(|s| !is_non_negative(*s)) {
                    return Err(RegistrationError::invalid_configuration(
                        "Gaussian standard deviations must be non-negative",
                    ));
                }
                if reg.maximum_error <= 0.0 || reg.maximum_error >= 1.0 || reg.maximum_error.is_nan() {
                    return Err(RegistrationError::invalid_configuration(format!(
                        "Gaussian maximum error must lie in (0, 1), got {}",
                        reg.maximum_error
                    )));
                }
            }
            RegularizerKind::Diffusion => {
                if !is_non_negative(reg.alpha) {
                    return Err(RegistrationError::invalid_configuration(format!(
                        "diffusion weight must be non-negative, got {}",
                        reg.alpha
                    )));
                }
            }
            RegularizerKind::Elastic => {
                if !is_non_negative(reg.mu) || !is_non_negative(reg.mu + reg.lambda) {
                    return Err(RegistrationError::invalid_configuration(format!(
                        "Lamé parameters out of range: mu {}, lambda {}",
                        reg.mu, reg.lambda
                    )));
                }
            }
        }
        Ok(())
    }
}

/// False for negative values and NaN.
fn is_non_negative(value: f64) -> bool {
    value >= 0.0
}
