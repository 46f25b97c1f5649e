//! Sampling of host buffers at continuous indices.

pub mod trait_;
pub mod linear;

pub use linear::LinearInterpolator;
pub use trait_::{is_inside, Interpolator};
