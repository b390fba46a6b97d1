//! Optimization setup: horizon resolution and optimizer/scheduler
//! provisioning.
//!
//! [`OptimizationSetup`] moves through `Unconfigured -> HorizonsResolved ->
//! Built`. Resolution turns the dataset length and trainer limits into step
//! and epoch horizons and fills the scheduler's placeholder arguments;
//! building hands the resolved config to the [`ComponentBuilder`].

use crate::builder::ComponentBuilder;
use crate::config::ConfigNode;
use crate::data::DataSource;
use crate::error::{OptimizationError, ScheduleError};
use crate::optim::{LrScheduler, Optimizer};
use crate::params::ParamGroup;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

/// Placeholder value for `max_iters` and `epochs` in scheduler arguments.
pub const UNRESOLVED: i64 = -1;

/// When the scheduler advances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    #[default]
    Step,
    Epoch,
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interval::Step => write!(f, "step"),
            Interval::Epoch => write!(f, "epoch"),
        }
    }
}

/// How `max_epochs` is derived when the trainer limits steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpochDerivation {
    /// `ceil(max_steps / optimizer steps per epoch)`.
    #[default]
    PerEpochSteps,
    /// `max_steps * batches per epoch`, kept for configs tuned against it.
    LegacyProduct,
}

/// `name` plus `init_args` of one optimization component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub init_args: ConfigNode,
}

impl ComponentSpec {
    /// A component is configured by name or by a `_target_` path.
    pub fn is_configured(&self) -> bool {
        self.name.is_some() || self.init_args.target().is_some()
    }

    /// Registry name, else the `_target_` path.
    pub fn label(&self) -> &str {
        self.name
            .as_deref()
            .or_else(|| self.init_args.target())
            .unwrap_or("<unnamed>")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub init_args: ConfigNode,
    #[serde(default)]
    pub interval: Interval,
    #[serde(default)]
    pub monitor: Option<String>,
}

impl SchedulerSpec {
    pub fn component(&self) -> ComponentSpec {
        ComponentSpec {
            name: self.name.clone(),
            init_args: self.init_args.clone(),
        }
    }
}

/// The `optimization` section of a config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationConfig {
    #[serde(default)]
    pub optimizer: ComponentSpec,
    #[serde(default)]
    pub scheduler: SchedulerSpec,
    #[serde(default)]
    pub epoch_derivation: EpochDerivation,
}

impl OptimizationConfig {
    /// Typed view of `cfg.optimization`; `None` when the section is absent.
    pub fn from_config(cfg: &ConfigNode) -> Result<Option<Self>, OptimizationError> {
        cfg.node("optimization")
            .map(|node| node.deserialize())
            .transpose()
            .map_err(|e| OptimizationError::Configuration {
                message: format!("optimization: {e}"),
            })
    }
}

/// Per-epoch batch limit: an absolute count or a fraction of the loader.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BatchLimit {
    Count(u64),
    Fraction(f64),
}

impl Default for BatchLimit {
    fn default() -> Self {
        Self::Fraction(1.0)
    }
}

impl BatchLimit {
    /// Batches per epoch for a loader of `len` batches. A count of 0 means
    /// no limit.
    pub fn apply(self, len: usize) -> Result<u64, OptimizationError> {
        let len = len as u64;
        match self {
            Self::Count(0) => Ok(len),
            Self::Count(count) => Ok(count.min(len)),
            Self::Fraction(f) if (0.0..=1.0).contains(&f) => Ok((len as f64 * f).floor() as u64),
            Self::Fraction(f) => Err(OptimizationError::Configuration {
                message: format!("trainer.limit_train_batches fraction must lie in [0, 1], got {f}"),
            }),
        }
    }
}

/// The trainer settings horizon resolution depends on.
pub trait TrainerLimits {
    fn max_epochs(&self) -> Option<u64>;

    fn max_steps(&self) -> Option<u64>;

    fn limit_train_batches(&self) -> BatchLimit;

    fn accumulate_grad_batches(&self) -> u64;

    /// Data-parallel replicas; at least 1.
    fn device_count(&self) -> u64;
}

fn default_accumulation() -> u64 {
    1
}

fn default_num_processes() -> u64 {
    1
}

/// The `trainer` section of a config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerSettings {
    #[serde(default)]
    pub max_epochs: Option<u64>,
    /// Negative values mean "no step limit".
    #[serde(default)]
    pub max_steps: Option<i64>,
    #[serde(default)]
    pub limit_train_batches: BatchLimit,
    #[serde(default = "default_accumulation")]
    pub accumulate_grad_batches: u64,
    #[serde(default)]
    pub gpus: u64,
    #[serde(default = "default_num_processes")]
    pub num_processes: u64,
    #[serde(default)]
    pub tpu_cores: Option<u64>,
}

impl Default for TrainerSettings {
    fn default() -> Self {
        Self {
            max_epochs: None,
            max_steps: None,
            limit_train_batches: BatchLimit::default(),
            accumulate_grad_batches: default_accumulation(),
            gpus: 0,
            num_processes: default_num_processes(),
            tpu_cores: None,
        }
    }
}

impl TrainerSettings {
    pub fn from_config(cfg: &ConfigNode) -> Result<Self, OptimizationError> {
        cfg.section("trainer").map_err(|e| OptimizationError::Configuration {
            message: format!("trainer: {e}"),
        })
    }
}

impl TrainerLimits for TrainerSettings {
    fn max_epochs(&self) -> Option<u64> {
        self.max_epochs
    }

    fn max_steps(&self) -> Option<u64> {
        self.max_steps.and_then(|steps| u64::try_from(steps).ok())
    }

    fn limit_train_batches(&self) -> BatchLimit {
        self.limit_train_batches
    }

    fn accumulate_grad_batches(&self) -> u64 {
        self.accumulate_grad_batches
    }

    fn device_count(&self) -> u64 {
        [self.gpus, self.num_processes, self.tpu_cores.unwrap_or(0)]
            .into_iter()
            .fold(1, u64::max)
    }
}

/// Resolved training horizons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Horizons {
    /// Batches per epoch after the batch limit.
    pub steps_per_epoch: u64,
    pub effective_batch_size: u64,
    pub max_steps: u64,
    pub max_epochs: u64,
}

impl Horizons {
    /// Optimizer updates per epoch.
    pub fn optimizer_steps_per_epoch(&self) -> u64 {
        self.steps_per_epoch / self.effective_batch_size
    }
}

const NO_LIMIT: &str = "either trainer.max_epochs or trainer.max_steps must be set";

fn configuration(message: impl Into<String>) -> OptimizationError {
    OptimizationError::Configuration {
        message: message.into(),
    }
}

/// Derive step and epoch horizons from a loader of `dataset_len` batches.
///
/// Deterministic in its inputs; nothing is mutated.
pub fn resolve_horizons(
    dataset_len: usize,
    limits: &dyn TrainerLimits,
    derivation: EpochDerivation,
) -> Result<Horizons, OptimizationError> {
    let max_epochs = limits.max_epochs();
    let max_steps = limits.max_steps();
    if max_epochs.is_none() && max_steps.is_none() {
        return Err(configuration(NO_LIMIT));
    }
    let accumulation = limits.accumulate_grad_batches();
    if accumulation == 0 {
        return Err(configuration("trainer.accumulate_grad_batches must be positive"));
    }

    let steps_per_epoch = limits.limit_train_batches().apply(dataset_len)?;
    let effective_batch_size = accumulation
        .checked_mul(limits.device_count().max(1))
        .ok_or_else(|| configuration("effective batch size overflows u64"))?;
    let optimizer_steps = steps_per_epoch / effective_batch_size;
    if optimizer_steps == 0 {
        return Err(configuration(format!(
            "{steps_per_epoch} batches per epoch give no optimizer step at an effective batch size of {effective_batch_size}"
        )));
    }

    let (max_steps, max_epochs) = match (max_steps, max_epochs) {
        (Some(steps), _) => {
            let per_epoch = steps.div_ceil(optimizer_steps);
            // None when the product overflows
            let legacy = steps.checked_mul(dataset_len as u64);
            if legacy != Some(per_epoch) {
                warn!(
                    max_steps = steps,
                    per_epoch_steps = per_epoch,
                    legacy_product = ?legacy,
                    derivation = ?derivation,
                    "Epoch horizon derivations disagree for a step-limited run"
                );
            }
            let epochs = match derivation {
                EpochDerivation::PerEpochSteps => per_epoch,
                EpochDerivation::LegacyProduct => legacy.ok_or_else(|| {
                    configuration(format!(
                        "max_steps {steps} times {dataset_len} batches overflows the epoch horizon"
                    ))
                })?,
            };
            (steps, epochs)
        }
        (None, Some(epochs)) => {
            let steps = optimizer_steps.checked_mul(epochs).ok_or_else(|| {
                configuration(format!(
                    "{epochs} epochs of {optimizer_steps} optimizer steps overflow the step horizon"
                ))
            })?;
            (steps, epochs)
        }
        (None, None) => return Err(configuration(NO_LIMIT)),
    };
    if max_steps == 0 {
        return Err(configuration("resolved horizon is zero steps"));
    }

    Ok(Horizons {
        steps_per_epoch,
        effective_batch_size,
        max_steps,
        max_epochs,
    })
}

/// Matches the sentinel whether it arrived as an integer or as `-1.0`.
fn is_unresolved(value: Option<&Value>) -> bool {
    value.and_then(Value::as_f64) == Some(UNRESOLVED as f64)
}

/// Replace placeholder scheduler arguments with resolved horizons.
///
/// `max_iters: -1` becomes `max_steps`, `epochs: -1` becomes `max_epochs`,
/// and a present `steps_per_epoch` that is `null` (or -1) becomes the
/// batches per epoch. Absent keys stay absent.
pub fn fill_placeholders(init_args: &ConfigNode, horizons: &Horizons) -> ConfigNode {
    let mut args = init_args.clone();
    if is_unresolved(args.get("max_iters")) {
        args = args.with_value("max_iters", horizons.max_steps.into());
        debug!(max_iters = horizons.max_steps, "Set the value of 'max_iters'");
    }
    if is_unresolved(args.get("epochs")) {
        args = args.with_value("epochs", horizons.max_epochs.into());
        debug!(epochs = horizons.max_epochs, "Set the value of 'epochs'");
    }
    let steps = args.get("steps_per_epoch");
    if matches!(steps, Some(Value::Null)) || is_unresolved(steps) {
        args = args.with_value("steps_per_epoch", horizons.steps_per_epoch.into());
        debug!(steps_per_epoch = horizons.steps_per_epoch, "Set the value of 'steps_per_epoch'");
    }
    args
}

/// Resolved horizons plus the optimization config they were threaded into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationPlan {
    pub horizons: Horizons,
    pub optimization: OptimizationConfig,
}

impl OptimizationPlan {
    pub fn resolve(
        config: OptimizationConfig,
        dataset_len: usize,
        limits: &dyn TrainerLimits,
    ) -> Result<Self, OptimizationError> {
        let horizons = resolve_horizons(dataset_len, limits, config.epoch_derivation)?;
        let mut optimization = config;
        optimization.scheduler.init_args = fill_placeholders(&optimization.scheduler.init_args, &horizons);
        Ok(Self {
            horizons,
            optimization,
        })
    }
}

/// A scheduler together with when it steps and what it watches.
#[derive(Debug)]
pub struct ScheduleBinding {
    pub scheduler: Box<dyn LrScheduler>,
    pub interval: Interval,
    pub monitor: Option<String>,
}

/// What a successful build hands to the task.
#[derive(Debug, Default)]
pub struct BuiltOptimization {
    pub optimizer: Option<Box<dyn Optimizer>>,
    pub scheduler: Option<ScheduleBinding>,
}

impl BuiltOptimization {
    /// Step the scheduler if it advances on `boundary`. Returns whether it
    /// stepped.
    pub fn step_scheduler(
        &mut self,
        boundary: Interval,
        metrics: &BTreeMap<String, f64>,
    ) -> Result<bool, ScheduleError> {
        let (Some(optimizer), Some(binding)) = (self.optimizer.as_mut(), self.scheduler.as_mut()) else {
            return Ok(false);
        };
        if binding.interval != boundary {
            return Ok(false);
        }
        let metric = binding
            .monitor
            .as_deref()
            .and_then(|name| metrics.get(name).copied());
        binding.scheduler.step(optimizer.as_mut(), metric)?;
        Ok(true)
    }

    /// Current learning rate per parameter group.
    pub fn learning_rates(&self) -> Vec<f64> {
        self.optimizer
            .as_ref()
            .map(|optimizer| optimizer.learning_rates())
            .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
enum SetupState {
    #[default]
    Unconfigured,
    HorizonsResolved(Box<OptimizationPlan>),
    Built,
}

/// State machine from raw optimization config to built optimizer and
/// scheduler.
#[derive(Debug, Default)]
pub struct OptimizationSetup {
    state: SetupState,
}

impl OptimizationSetup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan(&self) -> Option<&OptimizationPlan> {
        match &self.state {
            SetupState::HorizonsResolved(plan) => Some(plan),
            _ => None,
        }
    }

    pub fn is_built(&self) -> bool {
        matches!(self.state, SetupState::Built)
    }

    /// Resolve horizons against `train`. May be repeated until the setup is
    /// built; the latest plan wins.
    pub fn resolve(
        &mut self,
        config: OptimizationConfig,
        train: &dyn DataSource,
        limits: &dyn TrainerLimits,
    ) -> Result<Horizons, OptimizationError> {
        if self.is_built() {
            return Err(OptimizationError::Sequence {
                message: "horizons cannot be re-resolved after the optimizer was built".into(),
            });
        }
        let plan = OptimizationPlan::resolve(config, train.len(), limits)?;
        info!(
            steps_per_epoch = plan.horizons.steps_per_epoch,
            effective_batch_size = plan.horizons.effective_batch_size,
            max_steps = plan.horizons.max_steps,
            max_epochs = plan.horizons.max_epochs,
            "Resolved training horizons"
        );
        let horizons = plan.horizons;
        self.state = SetupState::HorizonsResolved(Box::new(plan));
        Ok(horizons)
    }

    /// Build the optimizer over `groups` and the scheduler against it.
    pub fn build(
        &mut self,
        builder: &ComponentBuilder,
        groups: Vec<ParamGroup>,
    ) -> Result<BuiltOptimization, OptimizationError> {
        let plan = match &self.state {
            SetupState::HorizonsResolved(plan) => plan,
            SetupState::Unconfigured => {
                return Err(OptimizationError::Sequence {
                    message: "build called before horizons were resolved".into(),
                });
            }
            SetupState::Built => {
                return Err(OptimizationError::Sequence {
                    message: "optimizer and scheduler were already built".into(),
                });
            }
        };
        let built = build_plan(plan, builder, groups)?;
        self.state = SetupState::Built;
        Ok(built)
    }
}

fn build_plan(
    plan: &OptimizationPlan,
    builder: &ComponentBuilder,
    groups: Vec<ParamGroup>,
) -> Result<BuiltOptimization, OptimizationError> {
    let optimization = &plan.optimization;

    let mut optimizer = if optimization.optimizer.is_configured() {
        let spec = &optimization.optimizer;
        let optimizer = builder.build_optimizer(spec.name.as_deref(), &spec.init_args, groups)?;
        debug!(
            optimizer = optimizer.name(),
            groups = optimizer.groups().len(),
            "Built optimizer"
        );
        Some(optimizer)
    } else {
        warn!("Optimizer is not configured, so no optimizer will be created");
        None
    };

    let spec = &optimization.scheduler;
    if !spec.component().is_configured() {
        warn!("Scheduler is not configured, so no scheduler will be created");
        return Ok(BuiltOptimization {
            optimizer,
            scheduler: None,
        });
    }
    let Some(opt) = optimizer.as_mut() else {
        return Err(configuration(format!(
            "scheduler '{}' is configured without an optimizer",
            spec.component().label()
        )));
    };
    let scheduler = builder.build_scheduler(spec.name.as_deref(), &spec.init_args, opt)?;
    if scheduler.requires_metric() && spec.monitor.is_none() {
        return Err(configuration(format!(
            "scheduler '{}' monitors a metric; set optimization.scheduler.monitor",
            scheduler.name()
        )));
    }
    // step-interval updates carry no metrics
    if scheduler.requires_metric() && spec.interval == Interval::Step {
        return Err(configuration(format!(
            "scheduler '{}' monitors a metric and must use optimization.scheduler.interval = \"epoch\"",
            scheduler.name()
        )));
    }
    debug!(
        scheduler = scheduler.name(),
        interval = %spec.interval,
        monitor = spec.monitor.as_deref().unwrap_or("-"),
        "Built learning-rate scheduler"
    );
    Ok(BuiltOptimization {
        optimizer,
        scheduler: Some(ScheduleBinding {
            scheduler,
            interval: spec.interval,
            monitor: spec.monitor.clone(),
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SizedSource;
    use crate::error::FactoryError;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn epochs(max_epochs: u64) -> TrainerSettings {
        TrainerSettings {
            max_epochs: Some(max_epochs),
            ..TrainerSettings::default()
        }
    }

    fn optimization(value: Value) -> OptimizationConfig {
        ConfigNode::new(value).deserialize().unwrap()
    }

    fn groups() -> Vec<ParamGroup> {
        vec![ParamGroup::new(vec!["w".into(), "b".into()])]
    }

    #[test]
    fn test_epoch_limited_horizon() {
        let h = resolve_horizons(1000, &epochs(10), EpochDerivation::default()).unwrap();
        assert_eq!(h.steps_per_epoch, 1000);
        assert_eq!(h.max_steps, 10_000);
        assert_eq!(h.max_epochs, 10);
    }

    #[test]
    fn test_accumulation_and_devices() {
        let limits = TrainerSettings {
            accumulate_grad_batches: 4,
            gpus: 2,
            ..epochs(10)
        };
        let h = resolve_horizons(1000, &limits, EpochDerivation::default()).unwrap();
        assert_eq!(h.effective_batch_size, 8);
        assert_eq!(h.max_steps, 1250);
        assert_eq!(h.optimizer_steps_per_epoch(), 125);
    }

    #[test]
    fn test_batch_limits() {
        assert_eq!(BatchLimit::Count(0).apply(50).unwrap(), 50);
        assert_eq!(BatchLimit::Count(20).apply(50).unwrap(), 20);
        assert_eq!(BatchLimit::Count(80).apply(50).unwrap(), 50);
        assert_eq!(BatchLimit::Fraction(0.25).apply(50).unwrap(), 12);
        assert!(BatchLimit::Fraction(1.5).apply(50).is_err());
    }

    #[test]
    fn test_batch_limit_parses_int_and_float() {
        let settings: TrainerSettings =
            serde_json::from_value(json!({ "limit_train_batches": 100, "max_epochs": 1 })).unwrap();
        assert_eq!(settings.limit_train_batches, BatchLimit::Count(100));
        let settings: TrainerSettings = serde_json::from_value(json!({ "limit_train_batches": 0.5 })).unwrap();
        assert_eq!(settings.limit_train_batches, BatchLimit::Fraction(0.5));
    }

    #[test]
    fn test_step_limited_derivations() {
        let limits = TrainerSettings {
            max_steps: Some(250),
            ..TrainerSettings::default()
        };
        let h = resolve_horizons(100, &limits, EpochDerivation::PerEpochSteps).unwrap();
        assert_eq!((h.max_steps, h.max_epochs), (250, 3));
        let h = resolve_horizons(100, &limits, EpochDerivation::LegacyProduct).unwrap();
        assert_eq!((h.max_steps, h.max_epochs), (250, 25_000));
    }

    #[test]
    fn test_step_limited_overflow() {
        let limits = TrainerSettings {
            max_steps: Some(1_000_000_000_000_000),
            ..TrainerSettings::default()
        };
        let h = resolve_horizons(100_000, &limits, EpochDerivation::PerEpochSteps).unwrap();
        assert_eq!(h.max_epochs, 10_000_000_000);

        match resolve_horizons(100_000, &limits, EpochDerivation::LegacyProduct).unwrap_err() {
            OptimizationError::Configuration { message } => assert!(message.contains("overflows")),
            other => panic!("Expected Configuration, got {other:?}"),
        }
    }

    #[test]
    fn test_epoch_limited_overflow() {
        let err = resolve_horizons(10, &epochs(u64::MAX), EpochDerivation::default()).unwrap_err();
        assert!(matches!(err, OptimizationError::Configuration { .. }));

        let limits = TrainerSettings {
            accumulate_grad_batches: u64::MAX,
            gpus: 2,
            ..epochs(1)
        };
        let err = resolve_horizons(10, &limits, EpochDerivation::default()).unwrap_err();
        assert!(err.to_string().contains("effective batch size"));
    }

    #[test]
    fn test_negative_max_steps_means_unlimited() {
        let limits = TrainerSettings {
            max_steps: Some(-1),
            ..epochs(2)
        };
        let h = resolve_horizons(10, &limits, EpochDerivation::default()).unwrap();
        assert_eq!(h.max_steps, 20);
    }

    #[test]
    fn test_requires_a_limit() {
        let err = resolve_horizons(10, &TrainerSettings::default(), EpochDerivation::default()).unwrap_err();
        assert!(matches!(err, OptimizationError::Configuration { .. }));
    }

    #[test]
    fn test_zero_optimizer_steps_rejected() {
        let limits = TrainerSettings {
            accumulate_grad_batches: 16,
            ..epochs(1)
        };
        let err = resolve_horizons(10, &limits, EpochDerivation::default()).unwrap_err();
        assert!(err.to_string().contains("no optimizer step"));
    }

    #[test]
    fn test_device_count_takes_largest() {
        let limits = TrainerSettings {
            gpus: 2,
            num_processes: 1,
            tpu_cores: Some(8),
            ..TrainerSettings::default()
        };
        assert_eq!(limits.device_count(), 8);
        assert_eq!(TrainerSettings::default().device_count(), 1);
    }

    #[test]
    fn test_fill_placeholders() {
        let horizons = Horizons {
            steps_per_epoch: 100,
            effective_batch_size: 1,
            max_steps: 1000,
            max_epochs: 10,
        };
        let args = ConfigNode::new(json!({
            "max_iters": -1, "epochs": -1, "steps_per_epoch": null, "pct_start": 0.3
        }));
        let filled = fill_placeholders(&args, &horizons);
        assert_eq!(
            filled.as_value(),
            &json!({ "max_iters": 1000, "epochs": 10, "steps_per_epoch": 100, "pct_start": 0.3 })
        );
        // source node untouched, absent keys stay absent
        assert_eq!(args.get("max_iters"), Some(&json!(-1)));
        let sparse = fill_placeholders(&ConfigNode::new(json!({ "max_iters": 50 })), &horizons);
        assert_eq!(sparse.as_value(), &json!({ "max_iters": 50 }));
    }

    #[test]
    fn test_fill_placeholders_accepts_float_sentinel() {
        let horizons = Horizons {
            steps_per_epoch: 20,
            effective_batch_size: 1,
            max_steps: 60,
            max_epochs: 3,
        };
        let args = ConfigNode::new(json!({
            "max_iters": -1.0, "epochs": -1.0, "steps_per_epoch": -1.0, "warmup_factor": -0.5
        }));
        assert_eq!(
            fill_placeholders(&args, &horizons).as_value(),
            &json!({ "max_iters": 60, "epochs": 3, "steps_per_epoch": 20, "warmup_factor": -0.5 })
        );
    }

    #[test]
    fn test_build_before_resolve_is_sequence_error() {
        let builder = ComponentBuilder::with_defaults().unwrap();
        let mut setup = OptimizationSetup::new();
        let err = setup.build(&builder, groups()).unwrap_err();
        assert!(matches!(err, OptimizationError::Sequence { .. }));
    }

    #[test]
    fn test_build_wires_optimizer_and_scheduler() {
        let builder = ComponentBuilder::with_defaults().unwrap();
        let config = optimization(json!({
            "optimizer": { "name": "AdamW", "init_args": { "lr": 0.01 } },
            "scheduler": { "name": "WarmupCosineLR", "init_args": { "max_iters": -1, "pct_start": 0.1 } }
        }));
        let mut setup = OptimizationSetup::new();
        let horizons = setup.resolve(config, &SizedSource(100), &epochs(2)).unwrap();
        assert_eq!(horizons.max_steps, 200);
        let plan = setup.plan().unwrap();
        assert_eq!(plan.optimization.scheduler.init_args.get("max_iters"), Some(&json!(200)));

        let mut built = setup.build(&builder, groups()).unwrap();
        assert!(setup.is_built());
        let binding = built.scheduler.as_ref().unwrap();
        assert_eq!(binding.interval, Interval::Step);
        assert_eq!(binding.scheduler.name(), "WarmupCosineLR");
        // warmup starts at warmup_factor * lr
        assert!((built.learning_rates()[0] - 0.01 / 1000.0).abs() < 1e-12);

        assert!(built.step_scheduler(Interval::Step, &BTreeMap::new()).unwrap());
        assert!(!built.step_scheduler(Interval::Epoch, &BTreeMap::new()).unwrap());

        let err = setup.build(&builder, groups()).unwrap_err();
        assert!(matches!(err, OptimizationError::Sequence { .. }));
    }

    #[test]
    fn test_absent_names_degrade_to_none() {
        let builder = ComponentBuilder::with_defaults().unwrap();
        let mut setup = OptimizationSetup::new();
        setup
            .resolve(OptimizationConfig::default(), &SizedSource(10), &epochs(1))
            .unwrap();
        let built = setup.build(&builder, groups()).unwrap();
        assert!(built.optimizer.is_none());
        assert!(built.scheduler.is_none());
    }

    #[test]
    fn test_scheduler_without_optimizer() {
        let builder = ComponentBuilder::with_defaults().unwrap();
        let config = optimization(json!({
            "scheduler": { "name": "StepLR", "init_args": { "step_size": 1 } }
        }));
        let mut setup = OptimizationSetup::new();
        setup.resolve(config, &SizedSource(10), &epochs(1)).unwrap();
        let err = setup.build(&builder, groups()).unwrap_err();
        assert!(matches!(err, OptimizationError::Configuration { .. }));
    }

    #[test]
    fn test_unknown_optimizer_name() {
        let builder = ComponentBuilder::with_defaults().unwrap();
        let config = optimization(json!({ "optimizer": { "name": "Lion" } }));
        let mut setup = OptimizationSetup::new();
        setup.resolve(config, &SizedSource(10), &epochs(1)).unwrap();
        match setup.build(&builder, groups()).unwrap_err() {
            OptimizationError::Factory(FactoryError::UnknownComponent { domain, .. }) => {
                assert_eq!(domain, "optimizer");
            }
            other => panic!("Expected UnknownComponent, got {other:?}"),
        }
        // a failed build leaves the plan in place
        assert!(setup.plan().is_some());
    }

    #[test]
    fn test_plateau_needs_monitor() {
        let builder = ComponentBuilder::with_defaults().unwrap();
        let config = optimization(json!({
            "optimizer": { "name": "SGD", "init_args": { "lr": 0.1 } },
            "scheduler": { "name": "ReduceLROnPlateau", "interval": "epoch" }
        }));
        let mut setup = OptimizationSetup::new();
        setup.resolve(config.clone(), &SizedSource(10), &epochs(1)).unwrap();
        assert!(matches!(
            setup.build(&builder, groups()).unwrap_err(),
            OptimizationError::Configuration { .. }
        ));

        let mut config = config;
        config.scheduler.monitor = Some("val_loss".into());
        let mut setup = OptimizationSetup::new();
        setup.resolve(config, &SizedSource(10), &epochs(1)).unwrap();
        let mut built = setup.build(&builder, groups()).unwrap();
        let metrics = BTreeMap::from([("val_loss".to_string(), 0.5)]);
        assert!(built.step_scheduler(Interval::Epoch, &metrics).unwrap());
    }

    #[test]
    fn test_plateau_rejects_step_interval() {
        let builder = ComponentBuilder::with_defaults().unwrap();
        let config = optimization(json!({
            "optimizer": { "name": "SGD", "init_args": { "lr": 0.1 } },
            "scheduler": { "name": "ReduceLROnPlateau", "monitor": "val_loss" }
        }));
        assert_eq!(config.scheduler.interval, Interval::Step);
        let mut setup = OptimizationSetup::new();
        setup.resolve(config, &SizedSource(4), &epochs(1)).unwrap();
        match setup.build(&builder, groups()).unwrap_err() {
            OptimizationError::Configuration { message } => assert!(message.contains("interval")),
            other => panic!("Expected Configuration, got {other:?}"),
        }
        assert!(!setup.is_built());
    }

    #[test]
    fn test_from_config_reads_section() {
        let cfg = crate::config::default_config()
            .with_value("optimization.optimizer.name", json!("SGD"))
            .with_value("optimization.epoch_derivation", json!("legacy_product"));
        let config = OptimizationConfig::from_config(&cfg).unwrap().unwrap();
        assert_eq!(config.optimizer.name.as_deref(), Some("SGD"));
        assert_eq!(config.epoch_derivation, EpochDerivation::LegacyProduct);
        assert!(OptimizationConfig::from_config(&ConfigNode::empty()).unwrap().is_none());

        let trainer = TrainerSettings::from_config(&cfg).unwrap();
        assert_eq!(trainer, TrainerSettings::default());
    }
}
