//! Training-task lifecycle.
//!
//! A [`LifecycleTask`] owns a model, its data sources and the optimizer and
//! scheduler provisioned for it, and dispatches train/val/test steps to one
//! shared step parameterized by [`Stage`].

use crate::builder::ComponentBuilder;
use crate::config::ConfigNode;
use crate::data::DataSource;
use crate::error::TaskError;
use crate::optimization::{BuiltOptimization, Interval, OptimizationConfig, OptimizationSetup, TrainerLimits, TrainerSettings};
use crate::params::{ParamGroup, Parameter, Trainable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

/// Which phase a step belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Train,
    Val,
    Test,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Train => write!(f, "train"),
            Stage::Val => write!(f, "val"),
            Stage::Test => write!(f, "test"),
        }
    }
}

/// Lifecycle position of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Initialized,
    DataReady,
    Optimized,
    Training,
    Evaluating,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Initialized => write!(f, "initialized"),
            TaskState::DataReady => write!(f, "data_ready"),
            TaskState::Optimized => write!(f, "optimized"),
            TaskState::Training => write!(f, "training"),
            TaskState::Evaluating => write!(f, "evaluating"),
        }
    }
}

/// Train/val/test dispatch through one shared step.
pub trait LifecyclePhases {
    type Batch;
    type Output;

    fn shared_step(&mut self, batch: &Self::Batch, batch_idx: usize, stage: Stage) -> Result<Self::Output, TaskError>;

    fn training_step(&mut self, batch: &Self::Batch, batch_idx: usize) -> Result<Self::Output, TaskError> {
        self.shared_step(batch, batch_idx, Stage::Train)
    }

    fn validation_step(&mut self, batch: &Self::Batch, batch_idx: usize) -> Result<Self::Output, TaskError> {
        self.shared_step(batch, batch_idx, Stage::Val)
    }

    fn test_step(&mut self, batch: &Self::Batch, batch_idx: usize) -> Result<Self::Output, TaskError> {
        self.shared_step(batch, batch_idx, Stage::Test)
    }
}

/// Horizon resolution and optimizer/scheduler provisioning.
pub trait OptimizationProvider {
    /// Resolve horizons and build the optimizer and scheduler. `None` falls
    /// back to the task's own `optimization` section; with neither, nothing
    /// is built.
    fn setup_optimization(&mut self, config: Option<OptimizationConfig>) -> Result<(), TaskError>;

    /// The provisioned optimizer and scheduler, running setup on first use.
    fn configure_optimizers(&mut self) -> Result<&mut BuiltOptimization, TaskError>;
}

/// Per-batch logic of a concrete task.
pub trait StepHandler<M> {
    type Batch;
    type Output;

    fn step(
        &mut self,
        model: &mut M,
        batch: &Self::Batch,
        batch_idx: usize,
        stage: Stage,
    ) -> Result<Self::Output, Box<dyn std::error::Error + Send + Sync>>;
}

/// A model plus everything needed to train and evaluate it.
pub struct LifecycleTask<M, H> {
    cfg: ConfigNode,
    model: M,
    handler: H,
    trainer: TrainerSettings,
    builder: ComponentBuilder,
    train_data: Option<Box<dyn DataSource>>,
    val_data: Option<Box<dyn DataSource>>,
    test_data: Option<Box<dyn DataSource>>,
    optimization: Option<BuiltOptimization>,
    state: TaskState,
    global_step: u64,
}

impl<M: fmt::Debug, H> fmt::Debug for LifecycleTask<M, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleTask")
            .field("model", &self.model)
            .field("state", &self.state)
            .field("global_step", &self.global_step)
            .field("optimization", &self.optimization)
            .finish_non_exhaustive()
    }
}

impl<M, H> LifecycleTask<M, H>
where
    M: Trainable,
    H: StepHandler<M>,
{
    /// Task over `model`, reading trainer limits from `cfg.trainer`.
    pub fn new(cfg: ConfigNode, model: M, handler: H, builder: ComponentBuilder) -> Result<Self, TaskError> {
        let trainer = TrainerSettings::from_config(&cfg)?;
        Ok(Self {
            cfg,
            model,
            handler,
            trainer,
            builder,
            train_data: None,
            val_data: None,
            test_data: None,
            optimization: None,
            state: TaskState::Initialized,
            global_step: 0,
        })
    }

    pub fn with_trainer(mut self, trainer: TrainerSettings) -> Self {
        self.trainer = trainer;
        self
    }

    pub fn config(&self) -> &ConfigNode {
        &self.cfg
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn trainer(&self) -> &TrainerSettings {
        &self.trainer
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Training batches processed so far.
    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    pub fn optimization(&self) -> Option<&BuiltOptimization> {
        self.optimization.as_ref()
    }

    pub fn setup_training_data(&mut self, source: impl DataSource + 'static) {
        debug!(batches = source.len(), "Training data set up");
        self.train_data = Some(Box::new(source));
        if self.state == TaskState::Initialized {
            self.state = TaskState::DataReady;
        }
    }

    pub fn setup_validation_data(&mut self, source: impl DataSource + 'static) {
        debug!(batches = source.len(), "Validation data set up");
        self.val_data = Some(Box::new(source));
    }

    pub fn setup_test_data(&mut self, source: impl DataSource + 'static) {
        debug!(batches = source.len(), "Test data set up");
        self.test_data = Some(Box::new(source));
    }

    pub fn train_data(&self) -> Option<&dyn DataSource> {
        self.train_data.as_deref()
    }

    pub fn val_data(&self) -> Option<&dyn DataSource> {
        self.val_data.as_deref()
    }

    pub fn test_data(&self) -> Option<&dyn DataSource> {
        self.test_data.as_deref()
    }

    fn data(&self, stage: Stage) -> Option<&dyn DataSource> {
        match stage {
            Stage::Train => self.train_data(),
            Stage::Val => self.val_data(),
            Stage::Test => self.test_data(),
        }
    }

    /// Advance epoch-interval schedulers. Returns whether one stepped.
    pub fn on_train_epoch_end(&mut self, metrics: &BTreeMap<String, f64>) -> Result<bool, TaskError> {
        let Some(optimization) = self.optimization.as_mut() else {
            return Ok(false);
        };
        Ok(optimization.step_scheduler(Interval::Epoch, metrics)?)
    }
}

impl<M, H> OptimizationProvider for LifecycleTask<M, H>
where
    M: Trainable,
    H: StepHandler<M>,
{
    fn setup_optimization(&mut self, config: Option<OptimizationConfig>) -> Result<(), TaskError> {
        if self.optimization.is_some() {
            return Err(TaskError::Sequence {
                message: "optimization was already provisioned".into(),
            });
        }
        let config = match config {
            Some(config) => config,
            None => match OptimizationConfig::from_config(&self.cfg)? {
                Some(config) => config,
                None => {
                    warn!("No optimizer config provided, therefore no optimizer was created");
                    return Ok(());
                }
            },
        };
        let train = self.train_data.as_deref().ok_or(TaskError::MissingData { stage: Stage::Train })?;

        let mut setup = OptimizationSetup::new();
        setup.resolve(config, train, &self.trainer)?;
        let built = setup.build(&self.builder, self.model.param_groups())?;
        info!(
            optimizer = built.optimizer.as_ref().map(|o| o.name()).unwrap_or("none"),
            scheduler = built
                .scheduler
                .as_ref()
                .map(|s| s.scheduler.name())
                .unwrap_or("none"),
            "Optimization provisioned"
        );
        self.optimization = Some(built);
        self.state = TaskState::Optimized;
        Ok(())
    }

    fn configure_optimizers(&mut self) -> Result<&mut BuiltOptimization, TaskError> {
        if self.optimization.is_none() {
            self.setup_optimization(None)?;
        }
        Ok(self.optimization.get_or_insert_with(BuiltOptimization::default))
    }
}

impl<M, H> LifecyclePhases for LifecycleTask<M, H>
where
    M: Trainable,
    H: StepHandler<M>,
{
    type Batch = H::Batch;
    type Output = H::Output;

    fn shared_step(&mut self, batch: &Self::Batch, batch_idx: usize, stage: Stage) -> Result<Self::Output, TaskError> {
        if self.data(stage).is_none() {
            return Err(TaskError::MissingData { stage });
        }
        if stage == Stage::Train {
            self.configure_optimizers()?;
            self.state = TaskState::Training;
        } else {
            self.state = TaskState::Evaluating;
        }

        let output = self
            .handler
            .step(&mut self.model, batch, batch_idx, stage)
            .map_err(|e| TaskError::Step {
                stage,
                batch_idx,
                message: e.to_string(),
            })?;

        if stage == Stage::Train {
            self.global_step += 1;
            let accumulation = self.trainer.accumulate_grad_batches().max(1) as usize;
            if (batch_idx + 1) % accumulation == 0 {
                if let Some(optimization) = self.optimization.as_mut() {
                    optimization.step_scheduler(Interval::Step, &BTreeMap::new())?;
                }
            }
        }
        Ok(output)
    }
}

impl<M: Trainable, H> Trainable for LifecycleTask<M, H> {
    fn parameters(&self) -> Vec<&Parameter> {
        self.model.parameters()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        self.model.parameters_mut()
    }

    fn param_groups(&self) -> Vec<ParamGroup> {
        self.model.param_groups()
    }
}
