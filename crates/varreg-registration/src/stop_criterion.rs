//! Convergence detection from the metric trace.
//!
//! Two tests are available on a level:
//!
//! * **line fit**: a least-squares line through the last `window` metric
//!   values (normalized by the first value of the level) is flat, and with
//!   the distance check enabled every value lies close to that line;
//! * **increase count**: the metric has gone up `increase_count_limit`
//!   times on the level.
//!
//! The policy decides which tests run on which level.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{RegistrationError, Result};
use crate::progress::{IterationRecord, LevelInfo, RegistrationObserver, StopControl};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum StopPolicy {
    /// Line fit and increase count on every level.
    Default,
    /// Coarse levels run to their budget; the finest uses both tests.
    #[default]
    SimpleGraduated,
    /// Coarse levels run to their budget; the second finest uses the
    /// increase count only; the finest uses both tests.
    Graduated,
}

/// Tests enabled on one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelTests {
    pub line_fit: bool,
    pub increase_count: bool,
}

impl StopPolicy {
    pub fn tests_for(self, level: &LevelInfo) -> LevelTests {
        let finest = level.is_finest();
        let second_finest = level.level + 2 == level.number_of_levels;
        match self {
            Self::Default => LevelTests {
                line_fit: true,
                increase_count: true,
            },
            Self::SimpleGraduated => LevelTests {
                line_fit: finest,
                increase_count: finest,
            },
            Self::Graduated => LevelTests {
                line_fit: finest,
                increase_count: finest || second_finest,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StopCriterionConfig {
    pub policy: StopPolicy,
    /// Converged when the fitted slope is below this in magnitude.
    pub slope_threshold: f64,
    /// Number of recent metric values in the fit.
    pub window: usize,
    pub max_distance_check: bool,
    /// Largest tolerated distance of a value from the fitted line.
    pub max_distance: f64,
    /// Increases of the metric tolerated on a level; 0 disables the test.
    pub increase_count_limit: usize,
}

impl Default for StopCriterionConfig {
    fn default() -> Self {
        Self {
            policy: StopPolicy::SimpleGraduated,
            slope_threshold: 0.005,
            window: 20,
            max_distance_check: true,
            max_distance: 0.05,
            increase_count_limit: 10,
        }
    }
}

impl StopCriterionConfig {
    pub fn with_policy(mut self, policy: StopPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    pub fn with_slope_threshold(mut self, threshold: f64) -> Self {
        self.slope_threshold = threshold;
        self
    }

    pub fn with_max_distance(mut self, max_distance: Option<f64>) -> Self {
        self.max_distance_check = max_distance.is_some();
        if let Some(d) = max_distance {
            self.max_distance = d;
        }
        self
    }

    pub fn with_increase_count_limit(mut self, limit: usize) -> Self {
        self.increase_count_limit = limit;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.window < 2 {
            return Err(RegistrationError::invalid_configuration(format!(
                "line fit window needs at least two values, got {}",
                self.window
            )));
        }
        if self.slope_threshold.is_nan() || self.slope_threshold < 0.0 {
            return Err(RegistrationError::invalid_configuration(
                "slope threshold must be non-negative",
            ));
        }
        Ok(())
    }
}

/// Least-squares line `y = intercept + slope * x` over `x = 0, 1, ...`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegressionFit {
    pub slope: f64,
    pub intercept: f64,
    /// Largest absolute residual.
    pub max_residual: f64,
}

/// Fit a line through `values` at abscissae `0..n`. None below two values.
pub fn fit_regression_line(values: &[f64]) -> Option<RegressionFit> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let count = n as f64;
    let mean_x = (count - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / count;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        sxy += dx * (y - mean_y);
        sxx += dx * dx;
    }
    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;
    let max_residual = values
        .iter()
        .enumerate()
        .map(|(i, y)| (y - (intercept + slope * i as f64)).abs())
        .fold(0.0, f64::max);

    Some(RegressionFit {
        slope,
        intercept,
        max_residual,
    })
}

/// Line-fit test on the last `config.window` values of `trace`.
pub fn evaluate_window(trace: &[f64], config: &StopCriterionConfig) -> bool {
    if trace.len() < config.window {
        return false;
    }
    let window = &trace[trace.len() - config.window..];
    match fit_regression_line(window) {
        Some(fit) => {
            fit.slope.abs() < config.slope_threshold
                && (!config.max_distance_check || fit.max_residual <= config.max_distance)
        }
        None => false,
    }
}

#[derive(Debug, Default)]
struct LevelState {
    first_metric: Option<f64>,
    previous_metric: Option<f64>,
    normalized: Vec<f64>,
    increases: usize,
    converged: bool,
}

/// Observer that stops a level once the metric has converged.
#[derive(Debug, Default)]
pub struct StopCriterion {
    config: StopCriterionConfig,
    state: Mutex<LevelState>,
}

impl StopCriterion {
    pub fn new(config: StopCriterionConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LevelState::default()),
        }
    }

    pub fn config(&self) -> &StopCriterionConfig {
        &self.config
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut LevelState) -> R) -> R {
        match self.state.lock() {
            Ok(mut state) => f(&mut state),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    fn reset(&self) {
        self.with_state(|state| *state = LevelState::default());
    }

    /// Feed one metric value; true when the level is converged.
    pub fn record(&self, metric: f64, level: &LevelInfo) -> bool {
        let tests = self.config.policy.tests_for(level);
        self.with_state(|state| {
            let first = *state.first_metric.get_or_insert(metric);
            let normalized = if first.abs() > f64::EPSILON {
                metric / first
            } else {
                metric
            };
            state.normalized.push(normalized);
            if let Some(previous) = state.previous_metric {
                if metric > previous {
                    state.increases += 1;
                }
            }
            state.previous_metric = Some(metric);

            if state.converged {
                return true;
            }
            let line = tests.line_fit && evaluate_window(&state.normalized, &self.config);
            let increase = tests.increase_count
                && self.config.increase_count_limit > 0
                && state.increases >= self.config.increase_count_limit;
            state.converged = line || increase;
            if state.converged {
                info!(
                    level = level.level,
                    iterations = state.normalized.len(),
                    line_fit = line,
                    increases = state.increases,
                    "stop criterion reached"
                );
            }
            state.converged
        })
    }
}

impl RegistrationObserver for StopCriterion {
    fn on_initialize(&self, _level: &LevelInfo) {
        self.reset();
    }

    fn on_iteration(&self, record: &IterationRecord, control: &StopControl) {
        if self.record(record.metric, control.level()) {
            if control.is_final_level() {
                control.request_run_stop();
            } else {
                control.request_level_stop();
            }
        }
    }

    fn on_level_completed(&self, _level: &LevelInfo, _elapsed_iterations: usize) {
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::StopHandle;
    use std::time::Duration;

    fn level(level: usize, number_of_levels: usize) -> LevelInfo {
        LevelInfo {
            level,
            number_of_levels,
            iterations: 100,
        }
    }

    #[test]
    fn test_regression_line_exact_fit() {
        let fit = fit_regression_line(&[1.0, 3.0, 5.0, 7.0]).unwrap();
        assert!((fit.slope - 2.0).abs() < 1e-12);
        assert!((fit.intercept - 1.0).abs() < 1e-12);
        assert!(fit.max_residual < 1e-12);
        assert!(fit_regression_line(&[1.0]).is_none());
    }

    #[test]
    fn test_flat_window_converges_and_is_deterministic() {
        let config = StopCriterionConfig::default().with_window(5);
        let trace = vec![1.0, 0.8, 0.6, 0.5, 0.5, 0.5, 0.5, 0.5];
        assert!(evaluate_window(&trace, &config));
        assert_eq!(evaluate_window(&trace, &config), evaluate_window(&trace, &config));
        assert!(!evaluate_window(&trace[..4], &config));
        assert!(!evaluate_window(&[1.0, 0.8, 0.6, 0.4, 0.2], &config));
    }

    #[test]
    fn test_distance_check_rejects_noisy_window() {
        let noisy = [0.5, 0.7, 0.3, 0.3, 0.7, 0.5];
        let config = StopCriterionConfig::default().with_window(6);
        assert!(!evaluate_window(&noisy, &config));
        let relaxed = config.with_max_distance(None);
        assert!(evaluate_window(&noisy, &relaxed));
    }

    #[test]
    fn test_policy_levels() {
        let simple = StopPolicy::SimpleGraduated;
        assert!(!simple.tests_for(&level(0, 3)).line_fit);
        assert!(!simple.tests_for(&level(1, 3)).increase_count);
        assert!(simple.tests_for(&level(2, 3)).line_fit);

        let graduated = StopPolicy::Graduated;
        let second = graduated.tests_for(&level(1, 3));
        assert!(second.increase_count && !second.line_fit);
        assert_eq!(
            graduated.tests_for(&level(0, 3)),
            LevelTests {
                line_fit: false,
                increase_count: false
            }
        );
        assert!(StopPolicy::Default.tests_for(&level(0, 3)).line_fit);
    }

    #[test]
    fn test_increase_count_stops_run_on_final_level() {
        let criterion = StopCriterion::new(StopCriterionConfig::default().with_increase_count_limit(2));
        let level_stop = StopHandle::new();
        let run_stop = StopHandle::new();
        let control = StopControl::new(level_stop.clone(), Some(run_stop.clone()), level(0, 1));
        criterion.on_initialize(control.level());

        for (i, metric) in [1.0, 2.0, 1.5, 3.0].into_iter().enumerate() {
            let record = IterationRecord {
                level: 0,
                iteration: i + 1,
                metric,
                rms_change: 0.0,
                elapsed: Duration::ZERO,
            };
            criterion.on_iteration(&record, &control);
        }
        assert!(level_stop.is_requested());
        assert!(run_stop.is_requested());
    }

    #[test]
    fn test_coarse_level_is_not_stopped_by_simple_graduated() {
        let criterion = StopCriterion::new(StopCriterionConfig::default().with_window(2));
        let info = level(0, 3);
        for _ in 0..30 {
            assert!(!criterion.record(1.0, &info));
        }
        criterion.on_level_completed(&info, 30);
        assert!(!criterion.record(1.0, &level(2, 3)));
        assert!(criterion.record(1.0, &level(2, 3)));
    }
}
