//! Sampling grid shared by images and vector fields.
//!
//! Sizes and indices are stored in axis order (x first). Linear indices
//! run x fastest, which matches the row-major layout of a tensor whose
//! dims are the reversed size (`[z, y, x]` in 3-D).

use nalgebra::SMatrix;

use crate::spatial::{Direction, Point, Spacing, Vector};

/// Tolerance used when comparing origins and spacings of two grids.
pub const GRID_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub struct ImageGrid<const D: usize> {
    size: [usize; D],
    origin: Point<D>,
    spacing: Spacing<D>,
    direction: Direction<D>,
    inverse_direction: SMatrix<f64, D, D>,
}

impl<const D: usize> ImageGrid<D> {
    pub fn new(
        size: [usize; D],
        origin: Point<D>,
        spacing: Spacing<D>,
        direction: Direction<D>,
    ) -> Self {
        let inverse_direction = match direction.try_inverse() {
            Some(inv) => inv.0,
            None => {
                tracing::warn!("singular direction matrix, falling back to its transpose");
                direction.0.transpose()
            }
        };
        Self {
            size,
            origin,
            spacing,
            direction,
            inverse_direction,
        }
    }

    /// Grid at the origin with unit spacing and identity direction.
    pub fn with_size(size: [usize; D]) -> Self {
        Self::new(size, Point::origin(), Spacing::uniform(1.0), Direction::identity())
    }

    /// Grid for a tensor with dims in reverse axis order.
    pub fn from_tensor_shape(
        dims: [usize; D],
        origin: Point<D>,
        spacing: Spacing<D>,
        direction: Direction<D>,
    ) -> Self {
        let mut size = dims;
        size.reverse();
        Self::new(size, origin, spacing, direction)
    }

    pub fn size(&self) -> [usize; D] {
        self.size
    }

    pub fn origin(&self) -> &Point<D> {
        &self.origin
    }

    pub fn spacing(&self) -> &Spacing<D> {
        &self.spacing
    }

    pub fn direction(&self) -> &Direction<D> {
        &self.direction
    }

    /// Tensor dims for this grid (reverse axis order).
    pub fn tensor_shape(&self) -> [usize; D] {
        let mut dims = self.size;
        dims.reverse();
        dims
    }

    pub fn num_voxels(&self) -> usize {
        self.size.iter().product()
    }

    pub fn strides(&self) -> [usize; D] {
        let mut strides = [1usize; D];
        for axis in 1..D {
            strides[axis] = strides[axis - 1] * self.size[axis - 1];
        }
        strides
    }

    pub fn linear_index(&self, index: &[usize; D]) -> usize {
        let strides = self.strides();
        (0..D).map(|axis| index[axis] * strides[axis]).sum()
    }

    pub fn multi_index(&self, mut linear: usize) -> [usize; D] {
        let mut index = [0usize; D];
        for axis in 0..D {
            index[axis] = linear % self.size[axis];
            linear /= self.size[axis];
        }
        index
    }

    /// Linear index of the neighbor `offset` steps along `axis`, clamped
    /// to the grid (replicate boundary).
    pub fn neighbor(&self, index: &[usize; D], axis: usize, offset: isize) -> usize {
        let mut moved = *index;
        let last = self.size[axis].saturating_sub(1) as isize;
        moved[axis] = (index[axis] as isize + offset).clamp(0, last) as usize;
        self.linear_index(&moved)
    }

    /// Linear index of the first voxel of every line along `axis`.
    pub fn line_starts(&self, axis: usize) -> Vec<usize> {
        let lines = self.num_voxels() / self.size[axis].max(1);
        let mut starts = Vec::with_capacity(lines);
        for linear in 0..self.num_voxels() {
            if self.multi_index(linear)[axis] == 0 {
                starts.push(linear);
            }
        }
        starts
    }

    /// `point = origin + direction * (index * spacing)`
    pub fn index_to_physical(&self, index: &[f64; D]) -> Point<D> {
        let mut scaled = Vector::<D>::zeros();
        for axis in 0..D {
            scaled[axis] = index[axis] * self.spacing[axis];
        }
        self.origin + self.direction * scaled
    }

    /// `index = direction^-1 * (point - origin) / spacing`
    pub fn physical_to_index(&self, point: &Point<D>) -> [f64; D] {
        let rotated = self.inverse_direction * (*point - self.origin).0;
        std::array::from_fn(|axis| rotated[axis] / self.spacing[axis])
    }

    /// Whether `other` has the same size and, within tolerance, the same
    /// origin, spacing and direction.
    pub fn same_domain(&self, other: &Self) -> bool {
        self.size == other.size
            && self.origin.max_abs_diff(&other.origin) <= GRID_TOLERANCE
            && (0..D).all(|axis| (self.spacing[axis] - other.spacing[axis]).abs() <= GRID_TOLERANCE)
            && self.direction.max_abs_diff(&other.direction) <= GRID_TOLERANCE
    }

    /// Grid obtained by keeping every `factors[axis]`-th sample, starting at
    /// index 0. The origin is unchanged.
    pub fn shrink(&self, factors: &[usize; D]) -> Self {
        let size = std::array::from_fn(|axis| {
            let factor = factors[axis].max(1);
            self.size[axis].div_ceil(factor).max(1)
        });
        let mut effective = [1usize; D];
        for axis in 0..D {
            effective[axis] = factors[axis].max(1);
        }
        Self::new(size, self.origin, self.spacing.scaled_by(&effective), self.direction)
    }

    pub fn describe(&self) -> String {
        format!(
            "size {:?}, origin {:?}, spacing {:?}",
            self.size,
            self.origin.to_array(),
            self.spacing.to_array()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_multi_roundtrip() {
        let grid = ImageGrid::<3>::with_size([4, 3, 2]);
        assert_eq!(grid.num_voxels(), 24);
        assert_eq!(grid.strides(), [1, 4, 12]);
        assert_eq!(grid.tensor_shape(), [2, 3, 4]);
        for linear in 0..grid.num_voxels() {
            let index = grid.multi_index(linear);
            assert_eq!(grid.linear_index(&index), linear);
        }
        assert_eq!(grid.multi_index(5), [1, 1, 0]);
    }

    #[test]
    fn test_neighbor_is_clamped() {
        let grid = ImageGrid::<2>::with_size([3, 3]);
        assert_eq!(grid.neighbor(&[0, 1], 0, -1), grid.linear_index(&[0, 1]));
        assert_eq!(grid.neighbor(&[2, 1], 0, 1), grid.linear_index(&[2, 1]));
        assert_eq!(grid.neighbor(&[1, 1], 1, 1), grid.linear_index(&[1, 2]));
    }

    #[test]
    fn test_line_starts() {
        let grid = ImageGrid::<2>::with_size([4, 3]);
        assert_eq!(grid.line_starts(0), vec![0, 4, 8]);
        assert_eq!(grid.line_starts(1), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_physical_roundtrip_with_rotation() {
        let mut direction = Direction::<2>::identity();
        direction[(0, 0)] = 0.0;
        direction[(0, 1)] = -1.0;
        direction[(1, 0)] = 1.0;
        direction[(1, 1)] = 0.0;
        let grid = ImageGrid::new(
            [10, 10],
            Point::new([1.0, -2.0]),
            Spacing::new([0.5, 2.0]),
            direction,
        );
        let point = grid.index_to_physical(&[3.0, 4.0]);
        assert!((point[0] - (1.0 - 8.0)).abs() < 1e-12);
        assert!((point[1] - (-2.0 + 1.5)).abs() < 1e-12);
        let back = grid.physical_to_index(&point);
        assert!((back[0] - 3.0).abs() < 1e-12);
        assert!((back[1] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_shrink_keeps_origin() {
        let grid = ImageGrid::new(
            [9, 8],
            Point::new([3.0, 4.0]),
            Spacing::new([1.0, 0.5]),
            Direction::identity(),
        );
        let coarse = grid.shrink(&[2, 4]);
        assert_eq!(coarse.size(), [5, 2]);
        assert_eq!(coarse.origin(), grid.origin());
        assert_eq!(*coarse.spacing(), Spacing::new([2.0, 2.0]));
        assert!(!coarse.same_domain(&grid));
        assert!(grid.same_domain(&grid.shrink(&[1, 1])));
    }
}
