//! Orientation of image axes in physical space.
//!
//! Column `i` of the matrix is the physical direction of index axis `i`.

use nalgebra::SMatrix;
use serde::{Deserialize, Serialize};

use super::Vector;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Direction<const D: usize>(pub SMatrix<f64, D, D>);

impl<const D: usize> Direction<D> {
    pub fn identity() -> Self {
        Self(SMatrix::identity())
    }

    pub fn is_identity(&self) -> bool {
        (0..D).all(|i| {
            (0..D).all(|j| {
                let expected = if i == j { 1.0 } else { 0.0 };
                (self.0[(i, j)] - expected).abs() < 1e-9
            })
        })
    }

    pub fn is_orthogonal(&self) -> bool {
        let product = self.0 * self.0.transpose();
        (0..D).all(|i| {
            (0..D).all(|j| {
                let expected = if i == j { 1.0 } else { 0.0 };
                (product[(i, j)] - expected).abs() < 1e-6
            })
        })
    }

    pub fn try_inverse(&self) -> Option<Self> {
        self.0.try_inverse().map(Self)
    }

    pub fn transpose(&self) -> Self {
        Self(self.0.transpose())
    }

    /// Largest absolute entry difference to `other`.
    pub fn max_abs_diff(&self, other: &Self) -> f64 {
        (0..D)
            .flat_map(|i| (0..D).map(move |j| (i, j)))
            .map(|ij| (self.0[ij] - other.0[ij]).abs())
            .fold(0.0, f64::max)
    }
}

impl<const D: usize> Default for Direction<D> {
    fn default() -> Self {
        Self::identity()
    }
}

impl<const D: usize> std::ops::Index<(usize, usize)> for Direction<D> {
    type Output = f64;

    fn index(&self, index: (usize, usize)) -> &Self::Output {
        &self.0[index]
    }
}

impl<const D: usize> std::ops::IndexMut<(usize, usize)> for Direction<D> {
    fn index_mut(&mut self, index: (usize, usize)) -> &mut Self::Output {
        &mut self.0[index]
    }
}

impl<const D: usize> std::ops::Mul<Vector<D>> for Direction<D> {
    type Output = Vector<D>;

    fn mul(self, vector: Vector<D>) -> Self::Output {
        Vector(self.0 * vector.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        let d = Direction::<3>::identity();
        assert!(d.is_identity());
        assert!(d.is_orthogonal());
        assert_eq!(d * Vector::new([1.0, 2.0, 3.0]), Vector::new([1.0, 2.0, 3.0]));
    }

    #[test]
    fn test_rotation_inverse_is_transpose() {
        let mut rot = Direction::<2>::identity();
        rot[(0, 0)] = 0.0;
        rot[(0, 1)] = -1.0;
        rot[(1, 0)] = 1.0;
        rot[(1, 1)] = 0.0;
        assert!(rot.is_orthogonal());
        assert!(!rot.is_identity());
        let inv = rot.try_inverse().unwrap();
        assert!(inv.max_abs_diff(&rot.transpose()) < 1e-12);
    }
}
