//! Regularizer trait.

use varreg_core::image::ImageGrid;
use varreg_core::FieldBuffer;

use crate::error::Result;

/// Smoothing operator applied to update and displacement fields.
///
/// Output lives on the input grid. `initialize` is called once per level
/// with the level grid before any `regularize` call.
pub trait Regularizer<const D: usize>: Send + Sync {
    fn initialize(&mut self, _grid: &ImageGrid<D>) -> Result<()> {
        Ok(())
    }

    fn regularize(&self, field: &FieldBuffer<D>) -> Result<FieldBuffer<D>>;

    fn name(&self) -> &'static str;
}
