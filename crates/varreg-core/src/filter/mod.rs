//! Image and field filters used by the registration driver.

pub mod gaussian;
pub mod downsample;
pub mod pyramid;
pub mod resample;
pub mod warp;
pub mod exponential;
pub mod morphology;

pub use downsample::DownsampleFilter;
pub use exponential::ExponentialFieldFilter;
pub use gaussian::{gaussian_kernel, GaussianFilter};
pub use morphology::{binary_dilate, prepare_level_mask, threshold_mask};
pub use pyramid::{default_shrink_factors, MultiResolutionPyramid};
pub use resample::FieldExpander;
pub use warp::{BoundaryPolicy, WarpImageFilter};
