//! Images prepared once per iteration and shared by the per-voxel pass.

use rayon::prelude::*;
use varreg_core::filter::WarpImageFilter;
use varreg_core::image::ImageGrid;
use varreg_core::spatial::Vector;

use super::trait_::{ForceInputs, ForceSettings};
use crate::config::GradientType;
use crate::error::Result;
use crate::validation::validate_same_domain;

#[derive(Debug, Clone)]
pub struct IterationImages<const D: usize> {
    grid: ImageGrid<D>,
    fixed: Vec<f32>,
    warped_moving: Vec<f32>,
    gradient: Vec<[f64; D]>,
    foreground: Option<Vec<bool>>,
    normalizer: f64,
}

impl<const D: usize> IterationImages<D> {
    /// Warp the inputs onto the field grid and compute the gradient source.
    pub fn prepare(inputs: &ForceInputs<'_, D>, settings: &ForceSettings) -> Result<Self> {
        let grid = inputs.displacement.grid().clone();
        let warper = WarpImageFilter::new().with_boundary(settings.boundary);

        let fixed = match inputs.fixed_displacement {
            Some(field) => {
                validate_same_domain("fixed-image displacement", &grid, field.grid())?;
                warper.warp(inputs.fixed, field).into_values()
            }
            None => {
                validate_same_domain("fixed image", &grid, inputs.fixed.grid())?;
                inputs.fixed.values().to_vec()
            }
        };
        let warped_moving = warper.warp(inputs.moving, inputs.displacement).into_values();

        let foreground = match inputs.mask {
            Some(mask) => {
                validate_same_domain("mask", &grid, mask.grid())?;
                let threshold = settings.mask_background_threshold;
                Some(mask.values().iter().map(|v| *v > threshold).collect())
            }
            None => None,
        };

        let spacing_aware = settings.use_image_spacing;
        let gradient = match settings.gradient_type {
            GradientType::WarpedMoving => central_gradient(&warped_moving, &grid, spacing_aware),
            GradientType::Fixed => central_gradient(&fixed, &grid, spacing_aware),
            GradientType::Symmetric => {
                let a = central_gradient(&warped_moving, &grid, spacing_aware);
                let b = central_gradient(&fixed, &grid, spacing_aware);
                a.iter()
                    .zip(b.iter())
                    .map(|(ga, gb)| std::array::from_fn(|k| 0.5 * (ga[k] + gb[k])))
                    .collect()
            }
        };

        let normalizer = if spacing_aware {
            1.0 / grid.spacing().mean_squared()
        } else {
            1.0
        };

        Ok(Self {
            grid,
            fixed,
            warped_moving,
            gradient,
            foreground,
            normalizer,
        })
    }

    pub fn grid(&self) -> &ImageGrid<D> {
        &self.grid
    }

    pub fn fixed(&self) -> &[f32] {
        &self.fixed
    }

    pub fn warped_moving(&self) -> &[f32] {
        &self.warped_moving
    }

    pub fn is_foreground(&self, linear: usize) -> bool {
        match &self.foreground {
            Some(mask) => mask[linear],
            None => true,
        }
    }

    /// `F(x) - M(x + u(x))`
    pub fn difference(&self, linear: usize) -> f64 {
        self.fixed[linear] as f64 - self.warped_moving[linear] as f64
    }

    pub fn gradient(&self, linear: usize) -> &[f64; D] {
        &self.gradient[linear]
    }

    /// Inverse mean squared spacing, or 1 when spacing is ignored.
    pub fn normalizer(&self) -> f64 {
        self.normalizer
    }
}

/// Central differences, one-sided at the border, zero along axes with a
/// single sample. With `spacing_aware` the result is a physical gradient
/// (divided by spacing and rotated by the grid direction); otherwise it is
/// per voxel along the index axes.
pub fn central_gradient<const D: usize>(
    values: &[f32],
    grid: &ImageGrid<D>,
    spacing_aware: bool,
) -> Vec<[f64; D]> {
    let size = grid.size();
    let spacing = *grid.spacing();
    let rotate = spacing_aware && !grid.direction().is_identity();
    let direction = *grid.direction();

    (0..grid.num_voxels())
        .into_par_iter()
        .map(|linear| {
            let index = grid.multi_index(linear);
            let mut g = Vector::<D>::zeros();
            for axis in 0..D {
                if size[axis] < 2 {
                    continue;
                }
                let at = index[axis];
                let (lo, hi, steps) = if at == 0 {
                    (linear, grid.neighbor(&index, axis, 1), 1.0)
                } else if at + 1 == size[axis] {
                    (grid.neighbor(&index, axis, -1), linear, 1.0)
                } else {
                    (grid.neighbor(&index, axis, -1), grid.neighbor(&index, axis, 1), 2.0)
                };
                let h = if spacing_aware { spacing[axis] } else { 1.0 };
                g[axis] = (values[hi] as f64 - values[lo] as f64) / (steps * h);
            }
            if rotate {
                g = direction * g;
            }
            g.to_array()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use varreg_core::spatial::{Direction, Point, Spacing};
    use varreg_core::{FieldBuffer, ImageBuffer};

    fn ramp(grid: &ImageGrid<2>, slope: [f64; 2]) -> ImageBuffer<2> {
        let values = (0..grid.num_voxels())
            .map(|i| {
                let p = grid.index_to_physical(&grid.multi_index(i).map(|v| v as f64));
                (slope[0] * p[0] + slope[1] * p[1]) as f32
            })
            .collect();
        ImageBuffer::new(grid.clone(), values).unwrap()
    }

    #[test]
    fn test_gradient_of_linear_ramp_is_constant() {
        let grid = ImageGrid::new([6, 5], Point::origin(), Spacing::new([0.5, 2.0]), Direction::identity());
        let image = ramp(&grid, [3.0, -1.0]);
        let gradient = central_gradient(image.values(), &grid, true);
        for g in &gradient {
            assert!((g[0] - 3.0).abs() < 1e-4);
            assert!((g[1] + 1.0).abs() < 1e-4);
        }
        let voxel = central_gradient(image.values(), &grid, false);
        assert!((voxel[7][0] - 1.5).abs() < 1e-4);
        assert!((voxel[7][1] + 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_mask_and_domain_checks() {
        let grid = ImageGrid::<2>::with_size([4, 4]);
        let fixed = ramp(&grid, [1.0, 0.0]);
        let mut mask = ImageBuffer::filled(grid.clone(), 0.0);
        mask.values_mut()[5] = 1.0;
        let field = FieldBuffer::zeros(grid.clone());
        let inputs = ForceInputs {
            fixed: &fixed,
            moving: &fixed,
            mask: Some(&mask),
            displacement: &field,
            fixed_displacement: None,
        };
        let images = IterationImages::prepare(&inputs, &ForceSettings::default()).unwrap();
        assert!(images.is_foreground(5));
        assert!(!images.is_foreground(4));
        assert_eq!(images.difference(6), 0.0);
        assert_eq!(images.normalizer(), 1.0);

        let other = FieldBuffer::zeros(ImageGrid::<2>::with_size([4, 5]));
        let bad = ForceInputs { displacement: &other, ..inputs };
        assert!(IterationImages::prepare(&bad, &ForceSettings::default()).is_err());
    }
}
