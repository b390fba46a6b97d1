//! # Gale Core
//!
//! Configuration-driven training orchestration.
//! Provides name-keyed component registries, the configurable factory that
//! turns config nodes into components, composable parameter schedules,
//! optimizer and learning-rate scheduler catalogues, optimization setup and
//! the training-task lifecycle.

pub mod builder;
pub mod config;
pub mod data;
pub mod error;
pub mod factory;
pub mod modelling;
pub mod optim;
pub mod optimization;
pub mod params;
pub mod registry;
pub mod shape_spec;
pub mod task;

// Re-export commonly used types at the crate root.
pub use builder::{BuildContext, ComponentBuilder, Domain, Registries};
pub use config::{ConfigNode, Kwargs, load_config};
pub use data::{DataSample, DataSource, InMemorySource, SizedSource};
pub use error::{FactoryError, GaleError, OptimizationError, RegistryError, Result, ScheduleError, TaskError};
pub use factory::{ArgumentShape, ConfigRecord, Configurable, Constructor, Injector, PathInjector};
pub use optim::{LrScheduler, Optimizer, ParamSchedule};
pub use optimization::{
    BatchLimit, BuiltOptimization, EpochDerivation, Horizons, Interval, OptimizationConfig, OptimizationPlan,
    OptimizationSetup, TrainerLimits, TrainerSettings, resolve_horizons,
};
pub use params::{ParamGroup, Parameter, Trainable};
pub use registry::Registry;
pub use shape_spec::ShapeSpec;
pub use task::{LifecyclePhases, LifecycleTask, OptimizationProvider, Stage, StepHandler, TaskState};
