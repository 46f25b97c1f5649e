//! Image, vector-field and filtering primitives for variational registration.
//!
//! Images and fields live in burn tensors with physical metadata; the
//! per-voxel passes operate on host buffers that share the same grid.

pub mod error;
pub mod spatial;
pub mod image;
pub mod field;
pub mod interpolation;
pub mod filter;

pub use error::{CoreError, Result};
pub use field::{FieldBuffer, VectorField};
pub use image::{Image, ImageBuffer, ImageGrid};
pub use spatial::{Direction, Point, Spacing, Vector};
