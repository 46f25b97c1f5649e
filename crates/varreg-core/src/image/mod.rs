//! Scalar images, their sampling grids and host-side buffers.

pub mod grid;
pub mod buffer;
pub mod image;

pub use buffer::ImageBuffer;
pub use grid::ImageGrid;
pub use image::Image;
