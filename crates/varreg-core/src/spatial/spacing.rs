//! Physical distance between adjacent samples along each axis.

use super::Vector;

pub type Spacing<const D: usize> = Vector<D>;

impl<const D: usize> Spacing<D> {
    pub fn uniform(value: f64) -> Self {
        Self::new([value; D])
    }

    pub fn is_uniform(&self) -> bool {
        if D == 0 {
            return true;
        }
        let first = self[0];
        (1..D).all(|i| (self[i] - first).abs() < 1e-9)
    }

    pub fn min_spacing(&self) -> f64 {
        (0..D).map(|i| self[i]).fold(f64::INFINITY, f64::min)
    }

    /// Mean of the squared spacings; normalizes intensity terms against
    /// squared gradient magnitudes in the demons denominator.
    pub fn mean_squared(&self) -> f64 {
        if D == 0 {
            return 1.0;
        }
        (0..D).map(|i| self[i] * self[i]).sum::<f64>() / D as f64
    }

    /// Component-wise product with per-axis shrink factors.
    pub fn scaled_by(&self, factors: &[usize; D]) -> Self {
        let mut out = *self;
        for i in 0..D {
            out[i] *= factors[i] as f64;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spacing_uniform() {
        let s = Spacing::<3>::uniform(1.5);
        assert!(s.is_uniform());
        assert!(!Spacing::<3>::new([1.0, 2.0, 3.0]).is_uniform());
    }

    #[test]
    fn test_mean_squared() {
        let s = Spacing::<2>::new([1.0, 3.0]);
        assert_eq!(s.mean_squared(), 5.0);
        assert_eq!(s.min_spacing(), 1.0);
    }

    #[test]
    fn test_scaled_by() {
        let s = Spacing::<2>::new([0.5, 2.0]);
        assert_eq!(s.scaled_by(&[2, 4]), Spacing::new([1.0, 8.0]));
    }
}
