//! Validation of run parameters and input domains.

use varreg_core::image::ImageGrid;

use crate::error::{RegistrationError, Result};

pub fn validate_time_step(time_step: f64) -> Result<()> {
    if !time_step.is_finite() || time_step <= 0.0 {
        return Err(RegistrationError::invalid_configuration(format!(
            "time step must be positive and finite, got {}",
            time_step
        )));
    }
    Ok(())
}

/// One iteration budget per level is required.
pub fn validate_iterations(levels: usize, iterations: &[usize]) -> Result<()> {
    if levels == 0 {
        return Err(RegistrationError::invalid_configuration(
            "number of levels must be positive",
        ));
    }
    if iterations.len() != levels {
        return Err(RegistrationError::invalid_configuration(format!(
            "{} iteration budgets given for {} levels",
            iterations.len(),
            levels
        )));
    }
    Ok(())
}

pub fn validate_shrink_factors<const D: usize>(shrink_factors: &[[usize; D]]) -> Result<()> {
    if let Some(level) = shrink_factors.iter().position(|f| f.contains(&0)) {
        return Err(RegistrationError::invalid_configuration(format!(
            "shrink factors of level {} contain zero",
            level
        )));
    }
    Ok(())
}

/// Field, fixed image and mask must share one grid.
pub fn validate_same_domain<const D: usize>(
    what: &str,
    expected: &ImageGrid<D>,
    actual: &ImageGrid<D>,
) -> Result<()> {
    if !expected.same_domain(actual) {
        return Err(RegistrationError::domain_mismatch(format!(
            "{}: expected {}, got {}",
            what,
            expected.describe(),
            actual.describe()
        )));
    }
    Ok(())
}

pub fn validate_grid<const D: usize>(what: &str, grid: &ImageGrid<D>) -> Result<()> {
    if grid.num_voxels() == 0 {
        return Err(RegistrationError::ShapeMismatch {
            expected: vec![1; D],
            actual: grid.size().to_vec(),
        });
    }
    if (0..D).any(|axis| grid.spacing()[axis].is_nan() || grid.spacing()[axis] <= 0.0) {
        return Err(RegistrationError::invalid_configuration(format!(
            "{} has non-positive spacing {:?}",
            what,
            grid.spacing().to_array()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use varreg_core::spatial::{Direction, Point, Spacing};

    #[test]
    fn test_time_step() {
        assert!(validate_time_step(0.5).is_ok());
        assert!(validate_time_step(0.0).is_err());
        assert!(validate_time_step(f64::NAN).is_err());
    }

    #[test]
    fn test_iterations_must_match_levels() {
        assert!(validate_iterations(3, &[10, 10, 10]).is_ok());
        let err = validate_iterations(3, &[10, 10]).unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidConfiguration(_)));
        assert!(validate_iterations(0, &[]).is_err());
    }

    #[test]
    fn test_domain_check() {
        let a = ImageGrid::<2>::with_size([4, 4]);
        let b = ImageGrid::new([4, 4], Point::new([0.5, 0.0]), Spacing::uniform(1.0), Direction::identity());
        assert!(validate_same_domain("field", &a, &a.clone()).is_ok());
        let err = validate_same_domain("field", &a, &b).unwrap_err();
        assert!(matches!(err, RegistrationError::DomainMismatch(_)));
    }

    #[test]
    fn test_grid_checks() {
        assert!(validate_grid("fixed", &ImageGrid::<2>::with_size([0, 4])).is_err());
        let bad = ImageGrid::new([2, 2], Point::origin(), Spacing::new([1.0, 0.0]), Direction::identity());
        assert!(validate_grid("fixed", &bad).is_err());
        assert!(validate_shrink_factors(&[[2, 0]]).is_err());
        assert!(validate_shrink_factors(&[[2, 2], [1, 1]]).is_ok());
    }
}
