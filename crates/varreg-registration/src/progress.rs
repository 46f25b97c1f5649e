//! Iteration events, observers and stop flags.
//!
//! The single-level filter and the multi-resolution driver publish an
//! [`IterationRecord`] after every iteration and a [`LevelInfo`] at level
//! boundaries. Observers may request a stop through [`StopControl`]; the
//! flags are polled between iterations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// State published after one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationRecord {
    /// Pyramid level, 0 is the coarsest.
    pub level: usize,
    /// Iterations elapsed on this level, counting this one.
    pub iteration: usize,
    pub metric: f64,
    pub rms_change: f64,
    /// Time since the level started.
    pub elapsed: Duration,
}

/// Position of a level in the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelInfo {
    pub level: usize,
    pub number_of_levels: usize,
    /// Iteration budget of the level.
    pub iterations: usize,
}

impl LevelInfo {
    /// Level info for a stand-alone single-level run.
    pub fn single(iterations: usize) -> Self {
        Self {
            level: 0,
            number_of_levels: 1,
            iterations,
        }
    }

    pub fn is_finest(&self) -> bool {
        self.level + 1 >= self.number_of_levels
    }
}

/// Shared stop flag.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Stop flags handed to observers with every iteration event.
#[derive(Debug, Clone)]
pub struct StopControl {
    level_stop: StopHandle,
    run_stop: Option<StopHandle>,
    info: LevelInfo,
}

impl StopControl {
    pub fn new(level_stop: StopHandle, run_stop: Option<StopHandle>, info: LevelInfo) -> Self {
        Self {
            level_stop,
            run_stop,
            info,
        }
    }

    /// End the current level after this iteration.
    pub fn request_level_stop(&self) {
        self.level_stop.request();
    }

    /// End the whole run. Without a driver this only ends the level.
    pub fn request_run_stop(&self) {
        self.level_stop.request();
        if let Some(run) = &self.run_stop {
            run.request();
        }
    }

    pub fn level(&self) -> &LevelInfo {
        &self.info
    }

    pub fn is_final_level(&self) -> bool {
        self.info.is_finest()
    }
}

/// Observer of registration progress.
pub trait RegistrationObserver: Send + Sync {
    /// Called when a level starts iterating.
    fn on_initialize(&self, _level: &LevelInfo) {}

    /// Called after every iteration with the published state.
    fn on_iteration(&self, record: &IterationRecord, control: &StopControl);

    /// Called when a level finished, with the iterations it ran.
    fn on_level_completed(&self, _level: &LevelInfo, _elapsed_iterations: usize) {}

    /// Called when a level fails.
    fn on_error(&self, _error: &str) {}
}

/// Observers registered on a filter or driver.
#[derive(Clone, Default)]
pub struct RegistrationObservers {
    observers: Vec<Arc<dyn RegistrationObserver>>,
}

impl std::fmt::Debug for RegistrationObservers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationObservers")
            .field("count", &self.observers.len())
            .finish()
    }
}

impl RegistrationObservers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, observer: Arc<dyn RegistrationObserver>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn notify_initialize(&self, level: &LevelInfo) {
        for observer in &self.observers {
            observer.on_initialize(level);
        }
    }

    pub fn notify_iteration(&self, record: &IterationRecord, control: &StopControl) {
        for observer in &self.observers {
            observer.on_iteration(record, control);
        }
    }

    pub fn notify_level_completed(&self, level: &LevelInfo, elapsed_iterations: usize) {
        for observer in &self.observers {
            observer.on_level_completed(level, elapsed_iterations);
        }
    }

    pub fn notify_error(&self, error: &str) {
        for observer in &self.observers {
            observer.on_error(error);
        }
    }
}

/// Observer that logs progress through `tracing`.
#[derive(Debug, Clone)]
pub struct LoggingObserver {
    log_interval: usize,
}

impl Default for LoggingObserver {
    fn default() -> Self {
        Self { log_interval: 10 }
    }
}

impl LoggingObserver {
    /// Log every n-th iteration at info level; zero is treated as one.
    pub fn new(log_interval: usize) -> Self {
        Self {
            log_interval: log_interval.max(1),
        }
    }
}

impl RegistrationObserver for LoggingObserver {
    fn on_initialize(&self, level: &LevelInfo) {
        tracing::info!(
            "Level {}/{} started, budget {} iterations",
            level.level + 1,
            level.number_of_levels,
            level.iterations
        );
    }

    fn on_iteration(&self, record: &IterationRecord, _control: &StopControl) {
        if record.iteration % self.log_interval == 0 {
            tracing::info!(
                "Level {} iter {} | metric: {:.6} | RMS change: {:.6} | elapsed: {:.2}s",
                record.level,
                record.iteration,
                record.metric,
                record.rms_change,
                record.elapsed.as_secs_f64()
            );
        } else {
            tracing::debug!(
                level = record.level,
                iteration = record.iteration,
                metric = record.metric,
                rms_change = record.rms_change,
                "iteration"
            );
        }
    }

    fn on_level_completed(&self, level: &LevelInfo, elapsed_iterations: usize) {
        tracing::info!(
            "Level {}/{} completed after {} iterations",
            level.level + 1,
            level.number_of_levels,
            elapsed_iterations
        );
    }

    fn on_error(&self, error: &str) {
        tracing::error!("Registration failed: {}", error);
    }
}

/// Observer that records every iteration.
#[derive(Debug, Clone, Default)]
pub struct HistoryObserver {
    history: Arc<Mutex<Vec<IterationRecord>>>,
}

impl HistoryObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<IterationRecord> {
        match self.history.lock() {
            Ok(history) => history.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn clear(&self) {
        match self.history.lock() {
            Ok(mut history) => history.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

impl RegistrationObserver for HistoryObserver {
    fn on_iteration(&self, record: &IterationRecord, _control: &StopControl) {
        match self.history.lock() {
            Ok(mut history) => history.push(record.clone()),
            Err(poisoned) => poisoned.into_inner().push(record.clone()),
        }
    }
}

/// Wall-clock timer for a level.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LevelTimer(Instant);

impl LevelTimer {
    pub(crate) fn start() -> Self {
        Self(Instant::now())
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.0.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(iteration: usize, metric: f64) -> IterationRecord {
        IterationRecord {
            level: 0,
            iteration,
            metric,
            rms_change: 0.1,
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn test_stop_control_requests() {
        let level = StopHandle::new();
        let run = StopHandle::new();
        let control = StopControl::new(level.clone(), Some(run.clone()), LevelInfo::single(5));
        assert!(control.is_final_level());

        control.request_level_stop();
        assert!(level.is_requested());
        assert!(!run.is_requested());

        level.reset();
        control.request_run_stop();
        assert!(level.is_requested() && run.is_requested());
    }

    #[test]
    fn test_history_observer() {
        let history = Arc::new(HistoryObserver::new());
        let mut observers = RegistrationObservers::new();
        observers.add(history.clone());
        observers.add(Arc::new(LoggingObserver::new(1)));

        let control = StopControl::new(StopHandle::new(), None, LevelInfo::single(3));
        observers.notify_iteration(&record(1, 0.5), &control);
        observers.notify_iteration(&record(2, 0.4), &control);

        let recorded = history.history();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[1].iteration, 2);
        history.clear();
        assert!(history.history().is_empty());
    }

    #[test]
    fn test_logging_observer_zero_interval() {
        let observer = LoggingObserver::new(0);
        let control = StopControl::new(StopHandle::new(), None, LevelInfo::single(3));
        observer.on_iteration(&record(0, 0.5), &control);
        observer.on_iteration(&record(3, 0.4), &control);
    }

    #[test]
    fn test_finest_level() {
        let info = LevelInfo {
            level: 1,
            number_of_levels: 3,
            iterations: 10,
        };
        assert!(!info.is_finest());
        assert!(LevelInfo { level: 2, ..info }.is_finest());
    }
}
