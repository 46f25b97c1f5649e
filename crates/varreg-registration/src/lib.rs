//! Deformable variational image registration.
//!
//! A [`VariationalRegistrationFilter`] iterates a force function and a
//! regularizer on one resolution level; [`MultiResolutionRegistration`]
//! drives it coarse to fine over an image pyramid. A [`StopCriterion`]
//! observer ends levels once the metric trace has flattened.

pub mod config;
pub mod error;
pub mod validation;
pub mod force;
pub mod regularization;
pub mod progress;
pub mod stop_criterion;
pub mod registration;
pub mod multires;

pub use config::{
    ForceConfig, ForceKind, GradientType, RegistrationConfig, RegularizerConfig, RegularizerKind,
    SearchSpace,
};
pub use error::{RegistrationError, Result};
pub use force::{DemonsForce, ForceFunction, NccForce, RegistrationFunction, SsdForce};
pub use multires::{MultiResolutionRegistration, RegistrationSchedule};
pub use progress::{
    HistoryObserver, IterationRecord, LevelInfo, LoggingObserver, RegistrationObserver,
    RegistrationObservers, StopControl, StopHandle,
};
pub use registration::VariationalRegistrationFilter;
pub use regularization::{
    DiffusionRegularizer, ElasticRegularizer, FieldRegularizer, GaussianRegularizer, Regularizer,
};
pub use stop_criterion::{
    evaluate_window, fit_regression_line, RegressionFit, StopCriterion, StopCriterionConfig,
    StopPolicy,
};
