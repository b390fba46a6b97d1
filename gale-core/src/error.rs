//! Error types for gale-core.
//!
//! Uses `thiserror` for public API error types with one enum per concern
//! (registry lookups, configurable construction, schedules, optimization
//! setup and task lifecycle). `GaleError` unifies them for callers that do
//! not care which layer failed.

use crate::task::Stage;

/// Top-level error type for gale-core.
#[derive(Debug, thiserror::Error)]
pub enum GaleError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Factory error: {0}")]
    Factory(#[from] FactoryError),

    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("Optimization error: {0}")]
    Optimization(#[from] OptimizationError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Configuration load error: {0}")]
    ConfigLoad(#[from] Box<figment::Error>),
}

/// Convenience result type for gale-core operations.
pub type Result<T> = std::result::Result<T, GaleError>;

/// Errors from name-keyed registries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("{domain} registry already contains '{name}'")]
    DuplicateKey { domain: String, name: String },

    #[error("no {domain} named '{name}'; available: [{}]", available.join(", "))]
    NotFound {
        domain: String,
        name: String,
        available: Vec<String>,
    },
}

/// Errors from turning configuration nodes into component instances.
#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    #[error("{component} has no configuration of record; it was not built from a config")]
    NotConfigured { component: String },

    #[error("unknown {domain} component: {source}")]
    UnknownComponent {
        domain: String,
        #[source]
        source: RegistryError,
    },

    #[error("unknown constructor target '{target}': {source}")]
    UnknownTarget {
        target: String,
        #[source]
        source: RegistryError,
    },

    #[error("config names target '{target}' but no injector was supplied")]
    NoInjector { target: String },

    #[error("{component} violates its shape contract: {reason}")]
    ShapeMismatch { component: String, reason: String },

    #[error("invalid arguments for {component}: {message}")]
    InvalidArguments { component: String, message: String },

    #[error("missing required config field '{path}'")]
    MissingField { path: String },

    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

impl FactoryError {
    pub fn invalid_arguments(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn shape_mismatch(component: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            component: component.into(),
            reason: reason.into(),
        }
    }
}

/// Errors from parameter schedules and learning-rate schedulers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScheduleError {
    #[error("invalid value: {message}")]
    InvalidValue { message: String },

    #[error("warmup needs either `pct_start` or `warmup_steps`")]
    MissingWarmup,

    #[error("{scheduler} monitors a metric but step() was called without one")]
    MissingMetric { scheduler: String },

    #[error("{scheduler} stepped past its horizon: step {step} of {total}")]
    HorizonExceeded {
        scheduler: String,
        step: u64,
        total: u64,
    },

    #[error("scheduler tracks {expected} parameter groups, optimizer has {actual}")]
    GroupCountMismatch { expected: usize, actual: usize },
}

impl ScheduleError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidValue {
            message: message.into(),
        }
    }
}

/// Errors from horizon resolution and optimizer/scheduler provisioning.
#[derive(Debug, thiserror::Error)]
pub enum OptimizationError {
    #[error("invalid optimization configuration: {message}")]
    Configuration { message: String },

    #[error("out-of-order optimization setup: {message}")]
    Sequence { message: String },

    #[error(transparent)]
    Factory(#[from] FactoryError),
}

/// Errors from the task lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("no {stage} data has been set up")]
    MissingData { stage: Stage },

    #[error("out-of-order task lifecycle call: {message}")]
    Sequence { message: String },

    #[error("{stage} step {batch_idx} failed: {message}")]
    Step {
        stage: Stage,
        batch_idx: usize,
        message: String,
    },

    #[error(transparent)]
    Optimization(#[from] OptimizationError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}
