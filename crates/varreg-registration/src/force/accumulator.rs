//! Per-iteration similarity and field-change statistics.

use std::sync::Mutex;

/// Sums gathered by one worker during a force pass.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GlobalAccumulator {
    pub sum_of_metric_values: f64,
    pub number_of_pixels_processed: usize,
    pub sum_of_squared_change: f64,
}

impl GlobalAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one processed voxel with its metric contribution.
    pub fn add_metric(&mut self, value: f64) {
        self.sum_of_metric_values += value;
        self.number_of_pixels_processed += 1;
    }

    pub fn add_change(&mut self, squared_change: f64) {
        self.sum_of_squared_change += squared_change;
    }

    pub fn merge(&mut self, other: &GlobalAccumulator) {
        self.sum_of_metric_values += other.sum_of_metric_values;
        self.number_of_pixels_processed += other.number_of_pixels_processed;
        self.sum_of_squared_change += other.sum_of_squared_change;
    }

    /// Mean metric value, 0 when no voxel was processed.
    pub fn metric(&self) -> f64 {
        if self.number_of_pixels_processed == 0 {
            return 0.0;
        }
        self.sum_of_metric_values / self.number_of_pixels_processed as f64
    }

    /// Root mean square field change, 0 when no voxel was processed.
    pub fn rms_change(&self) -> f64 {
        if self.number_of_pixels_processed == 0 {
            return 0.0;
        }
        (self.sum_of_squared_change / self.number_of_pixels_processed as f64).sqrt()
    }
}

/// Merge point for worker-local accumulators. The lock guards only the
/// summation.
#[derive(Debug, Default)]
pub struct SharedAccumulator {
    totals: Mutex<GlobalAccumulator>,
}

impl SharedAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&self, local: &GlobalAccumulator) {
        let mut totals = match self.totals.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        totals.merge(local);
    }

    pub fn into_inner(self) -> GlobalAccumulator {
        match self.totals.into_inner() {
            Ok(totals) => totals,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn test_empty_accumulator_reports_zero() {
        let acc = GlobalAccumulator::new();
        assert_eq!(acc.metric(), 0.0);
        assert_eq!(acc.rms_change(), 0.0);
    }

    #[test]
    fn test_metric_and_rms() {
        let mut acc = GlobalAccumulator::new();
        acc.add_metric(1.0);
        acc.add_metric(3.0);
        acc.add_change(8.0);
        assert_eq!(acc.metric(), 2.0);
        assert_eq!(acc.rms_change(), 2.0);
    }

    #[test]
    fn test_parallel_merge_matches_serial_sum() {
        let shared = SharedAccumulator::new();
        (0..64usize).into_par_iter().for_each(|i| {
            let mut local = GlobalAccumulator::new();
            local.add_metric(i as f64);
            local.add_change(1.0);
            shared.merge(&local);
        });
        let totals = shared.into_inner();
        assert_eq!(totals.number_of_pixels_processed, 64);
        assert_eq!(totals.sum_of_metric_values, (0..64).sum::<usize>() as f64);
        assert_eq!(totals.sum_of_squared_change, 64.0);
    }
}
