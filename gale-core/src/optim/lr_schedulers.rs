//! Learning-rate schedulers.
//!
//! Most schedulers are a [`Scheduled`] driver around a stateless
//! [`LrPolicy`]: the learning rate of every group is recomputed from its
//! base rate and the step counter alone, which is all the state that needs
//! saving. [`ReduceLrOnPlateau`] reacts to a monitored metric and keeps its
//! own counters.
//!
//! Constructing a scheduler records each group's `initial_lr` and applies
//! step 0 to the optimizer immediately.

use crate::config::Kwargs;
use crate::error::{FactoryError, ScheduleError};
use crate::factory::{ConfigRecord, Configurable, parse_kwargs};
use crate::optim::optimizers::Optimizer;
use crate::optim::param_schedule::{
    CompositeSchedule, ConstantSchedule, CosineSchedule, IntervalScaling, LinearSchedule,
    ParamSchedule, SharedSchedule, Stage, StepWithFixedGammaSchedule, WarmupMethod,
    WarmupSchedule, warmup_length,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Saved scheduler progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerState {
    pub base_lrs: Vec<f64>,
    pub last_step: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

/// A built learning-rate scheduler.
pub trait LrScheduler: Configurable + Send + Sync + fmt::Debug {
    /// Registry name, e.g. `WarmupCosineLR`.
    fn name(&self) -> &'static str;

    /// Advance one step (or epoch) and write the new rates into `optimizer`.
    /// `metric` is required by schedulers that monitor one.
    fn step(&mut self, optimizer: &mut dyn Optimizer, metric: Option<f64>) -> Result<(), ScheduleError>;

    /// Steps taken since construction; 0 right after construction.
    fn last_step(&self) -> u64;

    /// Rates written by the most recent step.
    fn last_lrs(&self) -> &[f64];

    fn base_lrs(&self) -> &[f64];

    fn requires_metric(&self) -> bool {
        false
    }

    fn state(&self) -> SchedulerState;

    fn load_state(&mut self, state: SchedulerState) -> Result<(), ScheduleError>;
}

/// Stateless learning-rate rule: rate for one group at a given step.
pub trait LrPolicy: Send + Sync + fmt::Debug {
    fn lr(&self, group: usize, base_lr: f64, step: u64) -> Result<f64, ScheduleError>;

    /// Base rates given each group's current `initial_lr`.
    fn base_lrs(&self, initial_lrs: &[f64]) -> Result<Vec<f64>, ScheduleError> {
        Ok(initial_lrs.to_vec())
    }
}

/// Drives an [`LrPolicy`] against an optimizer.
#[derive(Debug)]
pub struct Scheduled<P> {
    name: &'static str,
    policy: P,
    base_lrs: Vec<f64>,
    last_step: u64,
    last_lrs: Vec<f64>,
    record: ConfigRecord,
}

impl<P: LrPolicy> Scheduled<P> {
    pub fn new(name: &'static str, policy: P, optimizer: &mut dyn Optimizer) -> Result<Self, ScheduleError> {
        let initial: Vec<f64> = optimizer
            .groups_mut()
            .iter_mut()
            .map(|group| *group.initial_lr.get_or_insert(group.lr))
            .collect();
        let base_lrs = policy.base_lrs(&initial)?;
        if base_lrs.len() != initial.len() {
            return Err(ScheduleError::GroupCountMismatch {
                expected: base_lrs.len(),
                actual: initial.len(),
            });
        }
        for (group, base) in optimizer.groups_mut().iter_mut().zip(&base_lrs) {
            group.initial_lr = Some(*base);
        }

        let mut scheduler = Self {
            name,
            policy,
            base_lrs,
            last_step: 0,
            last_lrs: Vec::new(),
            record: ConfigRecord::new(),
        };
        scheduler.apply(optimizer)?;
        info!(scheduler = name, base_lrs = ?scheduler.base_lrs, "Scheduler attached");
        Ok(scheduler)
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    fn compute(&self, step: u64) -> Result<Vec<f64>, ScheduleError> {
        self.base_lrs
            .iter()
            .enumerate()
            .map(|(group, &base)| self.policy.lr(group, base, step))
            .collect()
    }

    fn apply(&mut self, optimizer: &mut dyn Optimizer) -> Result<(), ScheduleError> {
        let groups = optimizer.groups_mut();
        if groups.len() != self.base_lrs.len() {
            return Err(ScheduleError::GroupCountMismatch {
                expected: self.base_lrs.len(),
                actual: groups.len(),
            });
        }
        let lrs = self.compute(self.last_step)?;
        for (group, lr) in groups.iter_mut().zip(&lrs) {
            group.lr = *lr;
        }
        self.last_lrs = lrs;
        Ok(())
    }
}

impl<P: LrPolicy> Configurable for Scheduled<P> {
    fn config_record(&self) -> &ConfigRecord {
        &self.record
    }

    fn config_record_mut(&mut self) -> &mut ConfigRecord {
        &mut self.record
    }

    fn component_name(&self) -> &'static str {
        self.name
    }
}

impl<P: LrPolicy> LrScheduler for Scheduled<P> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn step(&mut self, optimizer: &mut dyn Optimizer, _metric: Option<f64>) -> Result<(), ScheduleError> {
        self.last_step += 1;
        if let Err(e) = self.apply(optimizer) {
            self.last_step -= 1;
            return Err(e);
        }
        Ok(())
    }

    fn last_step(&self) -> u64 {
        self.last_step
    }

    fn last_lrs(&self) -> &[f64] {
        &self.last_lrs
    }

    fn base_lrs(&self) -> &[f64] {
        &self.base_lrs
    }

    fn state(&self) -> SchedulerState {
        SchedulerState {
            base_lrs: self.base_lrs.clone(),
            last_step: self.last_step,
            extra: None,
        }
    }

    fn load_state(&mut self, state: SchedulerState) -> Result<(), ScheduleError> {
        self.base_lrs = state.base_lrs;
        self.last_step = state.last_step;
        self.last_lrs = self.compute(self.last_step)?;
        Ok(())
    }
}

/// Scales every base rate by a [`ParamSchedule`] evaluated at
/// `step / max_iter`.
#[derive(Debug, Clone)]
pub struct LrMultiplier {
    schedule: SharedSchedule,
    max_iter: u64,
}

impl LrMultiplier {
    pub fn new(schedule: SharedSchedule, max_iter: u64) -> Result<Self, ScheduleError> {
        if max_iter == 0 {
            return Err(ScheduleError::invalid("max_iter must be positive"));
        }
        Ok(Self { schedule, max_iter })
    }

    pub fn multiplier(&self, step: u64) -> f64 {
        self.schedule.at(step as f64 / self.max_iter as f64)
    }
}

impl LrPolicy for LrMultiplier {
    fn lr(&self, _group: usize, base_lr: f64, step: u64) -> Result<f64, ScheduleError> {
        Ok(base_lr * self.multiplier(step))
    }
}

/// `base * gamma^(step / step_size)`.
#[derive(Debug, Clone)]
pub struct StepDecay {
    step_size: u64,
    gamma: f64,
}

impl LrPolicy for StepDecay {
    fn lr(&self, _group: usize, base_lr: f64, step: u64) -> Result<f64, ScheduleError> {
        Ok(base_lr * self.gamma.powi((step / self.step_size) as i32))
    }
}

/// `base * gamma^(milestones passed)`.
#[derive(Debug, Clone)]
pub struct MultiStepDecay {
    milestones: Vec<u64>,
    gamma: f64,
}

impl LrPolicy for MultiStepDecay {
    fn lr(&self, _group: usize, base_lr: f64, step: u64) -> Result<f64, ScheduleError> {
        let passed = self.milestones.partition_point(|&m| m <= step);
        Ok(base_lr * self.gamma.powi(passed as i32))
    }
}

/// Cosine annealing restarted every period, periods growing by `t_mult`.
#[derive(Debug, Clone)]
pub struct CosineRestarts {
    t_0: u64,
    t_mult: u64,
    eta_min: f64,
}

impl LrPolicy for CosineRestarts {
    fn lr(&self, _group: usize, base_lr: f64, step: u64) -> Result<f64, ScheduleError> {
        let mut t_cur = step;
        let mut t_i = self.t_0;
        while t_cur >= t_i {
            t_cur -= t_i;
            t_i *= self.t_mult;
        }
        let cos = (PI * t_cur as f64 / t_i as f64).cos();
        Ok(self.eta_min + (base_lr - self.eta_min) * (1.0 + cos) / 2.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnealStrategy {
    #[default]
    Cos,
    Linear,
}

impl AnnealStrategy {
    fn anneal(self, start: f64, end: f64, pct: f64) -> f64 {
        match self {
            Self::Cos => end + (start - end) / 2.0 * ((PI * pct).cos() + 1.0),
            Self::Linear => (end - start) * pct + start,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Anchor {
    Initial,
    Max,
    Min,
}

#[derive(Debug, Clone)]
struct Phase {
    end_step: f64,
    from: Anchor,
    to: Anchor,
}

/// One-cycle policy: ramp from `max_lr / div_factor` to `max_lr`, then
/// anneal down to `initial / final_div_factor`.
#[derive(Debug, Clone)]
pub struct OneCycle {
    max_lrs: Vec<f64>,
    total_steps: u64,
    div_factor: f64,
    final_div_factor: f64,
    strategy: AnnealStrategy,
    phases: Vec<Phase>,
}

impl OneCycle {
    fn anchor(&self, group: usize, anchor: Anchor) -> f64 {
        let initial = self.max_lrs[group] / self.div_factor;
        match anchor {
            Anchor::Initial => initial,
            Anchor::Max => self.max_lrs[group],
            Anchor::Min => initial / self.final_div_factor,
        }
    }

    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }
}

impl LrPolicy for OneCycle {
    fn lr(&self, group: usize, _base_lr: f64, step: u64) -> Result<f64, ScheduleError> {
        if step > self.total_steps {
            return Err(ScheduleError::HorizonExceeded {
                scheduler: "OneCycleLR".into(),
                step,
                total: self.total_steps,
            });
        }
        let step = step as f64;
        let mut start_step = 0.0;
        let last = self.phases.len() - 1;
        for (idx, phase) in self.phases.iter().enumerate() {
            if step <= phase.end_step || idx == last {
                let span = phase.end_step - start_step;
                let pct = if span > 0.0 { (step - start_step) / span } else { 1.0 };
                return Ok(self.strategy.anneal(
                    self.anchor(group, phase.from),
                    self.anchor(group, phase.to),
                    pct,
                ));
            }
            start_step = phase.end_step;
        }
        Ok(self.anchor(group, Anchor::Min))
    }

    fn base_lrs(&self, initial_lrs: &[f64]) -> Result<Vec<f64>, ScheduleError> {
        if self.max_lrs.len() != initial_lrs.len() {
            return Err(ScheduleError::GroupCountMismatch {
                expected: self.max_lrs.len(),
                actual: initial_lrs.len(),
            });
        }
        Ok(self.max_lrs.iter().map(|lr| lr / self.div_factor).collect())
    }
}

/// Reduce rates when a monitored metric stops improving.
#[derive(Debug)]
pub struct ReduceLrOnPlateau {
    args: PlateauArgs,
    min_lrs: Vec<f64>,
    base_lrs: Vec<f64>,
    last_lrs: Vec<f64>,
    last_step: u64,
    best: f64,
    num_bad_epochs: u64,
    cooldown_counter: u64,
    record: ConfigRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlateauMode {
    #[default]
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdMode {
    #[default]
    Rel,
    Abs,
}

/// A single value applied to every group, or one value per group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PerGroup {
    Scalar(f64),
    Groups(Vec<f64>),
}

impl PerGroup {
    fn expand(&self, groups: usize) -> Result<Vec<f64>, ScheduleError> {
        match self {
            Self::Scalar(v) => Ok(vec![*v; groups]),
            Self::Groups(values) if values.len() == groups => Ok(values.clone()),
            Self::Groups(values) => Err(ScheduleError::GroupCountMismatch {
                expected: values.len(),
                actual: groups,
            }),
        }
    }
}

fn default_plateau_factor() -> f64 {
    0.1
}

fn default_patience() -> u64 {
    10
}

fn default_threshold() -> f64 {
    1e-4
}

fn default_min_lr() -> PerGroup {
    PerGroup::Scalar(0.0)
}

fn default_plateau_eps() -> f64 {
    1e-8
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlateauArgs {
    #[serde(default)]
    pub mode: PlateauMode,
    #[serde(default = "default_plateau_factor")]
    pub factor: f64,
    #[serde(default = "default_patience")]
    pub patience: u64,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default)]
    pub threshold_mode: ThresholdMode,
    #[serde(default)]
    pub cooldown: u64,
    #[serde(default = "default_min_lr")]
    pub min_lr: PerGroup,
    #[serde(default = "default_plateau_eps")]
    pub eps: f64,
}

impl ReduceLrOnPlateau {
    pub const NAME: &'static str = "ReduceLROnPlateau";

    pub fn new(args: PlateauArgs, optimizer: &mut dyn Optimizer) -> Result<Self, ScheduleError> {
        if args.factor >= 1.0 {
            return Err(ScheduleError::invalid("factor should be < 1.0"));
        }
        let groups = optimizer.groups_mut();
        let min_lrs = args.min_lr.expand(groups.len())?;
        let base_lrs: Vec<f64> = groups
            .iter_mut()
            .map(|group| *group.initial_lr.get_or_insert(group.lr))
            .collect();
        Ok(Self {
            best: Self::worst(args.mode),
            args,
            min_lrs,
            last_lrs: base_lrs.clone(),
            base_lrs,
            last_step: 0,
            num_bad_epochs: 0,
            cooldown_counter: 0,
            record: ConfigRecord::new(),
        })
    }

    fn worst(mode: PlateauMode) -> f64 {
        match mode {
            PlateauMode::Min => f64::INFINITY,
            PlateauMode::Max => f64::NEG_INFINITY,
        }
    }

    fn is_better(&self, current: f64) -> bool {
        let PlateauArgs {
            mode,
            threshold,
            threshold_mode,
            ..
        } = self.args;
        match (mode, threshold_mode) {
            (PlateauMode::Min, ThresholdMode::Rel) => current < self.best * (1.0 - threshold),
            (PlateauMode::Min, ThresholdMode::Abs) => current < self.best - threshold,
            (PlateauMode::Max, ThresholdMode::Rel) => current > self.best * (threshold + 1.0),
            (PlateauMode::Max, ThresholdMode::Abs) => current > self.best + threshold,
        }
    }

    fn reduce(&mut self, optimizer: &mut dyn Optimizer) {
        for (idx, group) in optimizer.groups_mut().iter_mut().enumerate() {
            let new_lr = (group.lr * self.args.factor).max(self.min_lrs[idx]);
            if group.lr - new_lr > self.args.eps {
                info!(group = idx, old_lr = group.lr, new_lr, "Reducing learning rate on plateau");
                group.lr = new_lr;
            }
        }
    }
}

impl Configurable for ReduceLrOnPlateau {
    fn config_record(&self) -> &ConfigRecord {
        &self.record
    }

    fn config_record_mut(&mut self) -> &mut ConfigRecord {
        &mut self.record
    }

    fn component_name(&self) -> &'static str {
        Self::NAME
    }
}

impl LrScheduler for ReduceLrOnPlateau {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn step(&mut self, optimizer: &mut dyn Optimizer, metric: Option<f64>) -> Result<(), ScheduleError> {
        let current = metric.ok_or_else(|| ScheduleError::MissingMetric {
            scheduler: Self::NAME.into(),
        })?;
        if optimizer.groups().len() != self.min_lrs.len() {
            return Err(ScheduleError::GroupCountMismatch {
                expected: self.min_lrs.len(),
                actual: optimizer.groups().len(),
            });
        }
        self.last_step += 1;

        if self.is_better(current) {
            self.best = current;
            self.num_bad_epochs = 0;
        } else {
            self.num_bad_epochs += 1;
        }

        if self.cooldown_counter > 0 {
            self.cooldown_counter -= 1;
            self.num_bad_epochs = 0;
        }

        if self.num_bad_epochs > self.args.patience {
            self.reduce(optimizer);
            self.cooldown_counter = self.args.cooldown;
            self.num_bad_epochs = 0;
        }
        self.last_lrs = optimizer.learning_rates();
        Ok(())
    }

    fn last_step(&self) -> u64 {
        self.last_step
    }

    fn last_lrs(&self) -> &[f64] {
        &self.last_lrs
    }

    fn base_lrs(&self) -> &[f64] {
        &self.base_lrs
    }

    fn requires_metric(&self) -> bool {
        true
    }

    fn state(&self) -> SchedulerState {
        SchedulerState {
            base_lrs: self.base_lrs.clone(),
            last_step: self.last_step,
            extra: Some(json!({
                "best": self.best,
                "num_bad_epochs": self.num_bad_epochs,
                "cooldown_counter": self.cooldown_counter,
                "last_lrs": self.last_lrs,
            })),
        }
    }

    fn load_state(&mut self, state: SchedulerState) -> Result<(), ScheduleError> {
        #[derive(Deserialize)]
        struct Extra {
            best: Option<f64>,
            num_bad_epochs: u64,
            cooldown_counter: u64,
            last_lrs: Vec<f64>,
        }
        let extra = state
            .extra
            .ok_or_else(|| ScheduleError::invalid("plateau state is missing its counters"))?;
        let extra: Extra = serde_json::from_value(extra)
            .map_err(|e| ScheduleError::invalid(format!("malformed plateau state: {e}")))?;
        self.base_lrs = state.base_lrs;
        self.last_step = state.last_step;
        // infinities serialize as null
        self.best = extra.best.unwrap_or_else(|| Self::worst(self.args.mode));
        self.num_bad_epochs = extra.num_bad_epochs;
        self.cooldown_counter = extra.cooldown_counter;
        self.last_lrs = extra.last_lrs;
        Ok(())
    }
}

// --- constructors ---

/// Signature shared by every registered scheduler constructor.
pub type SchedulerFn = fn(Kwargs, &mut Box<dyn Optimizer>) -> Result<Box<dyn LrScheduler>, FactoryError>;

fn positive(name: &str, value: i64) -> Result<u64, ScheduleError> {
    if value <= 0 {
        return Err(ScheduleError::invalid(format!(
            "{name} must be a positive integer, got {value}"
        )));
    }
    Ok(value as u64)
}

fn multiplier(
    name: &'static str,
    schedule: impl ParamSchedule + 'static,
    max_iter: u64,
    optimizer: &mut Box<dyn Optimizer>,
) -> Result<Box<dyn LrScheduler>, FactoryError> {
    let policy = LrMultiplier::new(Arc::new(schedule), max_iter)?;
    debug!(scheduler = name, max_iter, "Wrapping param schedule");
    Ok(Box::new(Scheduled::new(name, policy, optimizer.as_mut())?))
}

fn default_start_value() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CosineLrArgs {
    max_iters: i64,
    #[serde(default = "default_start_value")]
    start_value: f64,
    #[serde(default)]
    end_value: f64,
}

pub fn cosine_lr(kwargs: Kwargs, optimizer: &mut Box<dyn Optimizer>) -> Result<Box<dyn LrScheduler>, FactoryError> {
    let args: CosineLrArgs = parse_kwargs("CosineLR", kwargs)?;
    let max_iters = positive("max_iters", args.max_iters)?;
    multiplier(
        "CosineLR",
        CosineSchedule::new(args.start_value, args.end_value),
        max_iters,
        optimizer,
    )
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FlatCosArgs {
    pct_start: f64,
    max_iters: i64,
}

pub fn flat_cos(kwargs: Kwargs, optimizer: &mut Box<dyn Optimizer>) -> Result<Box<dyn LrScheduler>, FactoryError> {
    let args: FlatCosArgs = parse_kwargs("FlatCosScheduler", kwargs)?;
    let max_iters = positive("max_iters", args.max_iters)?;
    let schedule = CompositeSchedule::new(vec![
        Stage::new(
            Arc::new(LinearSchedule::new(1.0, 1.0)),
            args.pct_start,
            IntervalScaling::Rescaled,
        ),
        Stage::new(
            Arc::new(CosineSchedule::new(1.0, 0.0)),
            1.0 - args.pct_start,
            IntervalScaling::Rescaled,
        ),
    ])?;
    multiplier("FlatCosScheduler", schedule, max_iters, optimizer)
}

fn default_warmup_factor() -> f64 {
    1.0 / 1000.0
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WarmupArgs {
    max_iters: i64,
    #[serde(default)]
    pct_start: Option<f64>,
    #[serde(default)]
    warmup_steps: Option<i64>,
    #[serde(default = "default_warmup_factor")]
    warmup_factor: f64,
    #[serde(default)]
    warmup_method: Option<String>,
}

fn warmup_multiplier(
    name: &'static str,
    base: SharedSchedule,
    kwargs: Kwargs,
    optimizer: &mut Box<dyn Optimizer>,
) -> Result<Box<dyn LrScheduler>, FactoryError> {
    let args: WarmupArgs = parse_kwargs(name, kwargs)?;
    let max_iters = positive("max_iters", args.max_iters)?;
    let length = warmup_length(max_iters, args.pct_start, args.warmup_steps)?;
    let method = match args.warmup_method.as_deref() {
        Some(method) => method.parse()?,
        None => WarmupMethod::Linear,
    };
    let schedule = WarmupSchedule::new(base, args.warmup_factor, length, method)?;
    multiplier(name, schedule, max_iters, optimizer)
}

/// Linear warmup, then cosine decay to zero.
pub fn warmup_cosine_lr(kwargs: Kwargs, optimizer: &mut Box<dyn Optimizer>) -> Result<Box<dyn LrScheduler>, FactoryError> {
    warmup_multiplier("WarmupCosineLR", Arc::new(CosineSchedule::new(1.0, 0.0)), kwargs, optimizer)
}

/// Linear warmup, then linear decay to zero.
pub fn warmup_linear_lr(kwargs: Kwargs, optimizer: &mut Box<dyn Optimizer>) -> Result<Box<dyn LrScheduler>, FactoryError> {
    warmup_multiplier("WarmupLinearLR", Arc::new(LinearSchedule::new(1.0, 0.0)), kwargs, optimizer)
}

/// Linear warmup, then constant.
pub fn warmup_constant_lr(kwargs: Kwargs, optimizer: &mut Box<dyn Optimizer>) -> Result<Box<dyn LrScheduler>, FactoryError> {
    warmup_multiplier("WarmupConstantLR", Arc::new(ConstantSchedule::new(1.0)), kwargs, optimizer)
}

fn default_decay_rate() -> f64 {
    1.0
}

fn default_step_warmup_factor() -> f64 {
    1e-5
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WarmupStepArgs {
    epochs: i64,
    num_decays: u32,
    #[serde(default)]
    warmup_epochs: u64,
    #[serde(default = "default_decay_rate")]
    decay_rate: f64,
    #[serde(default = "default_step_warmup_factor")]
    warmup_factor: f64,
}

/// Epoch-level step decay with `num_decays` evenly spaced drops, after an
/// optional linear warmup of `warmup_epochs`.
pub fn warmup_step_lr(kwargs: Kwargs, optimizer: &mut Box<dyn Optimizer>) -> Result<Box<dyn LrScheduler>, FactoryError> {
    let args: WarmupStepArgs = parse_kwargs("WarmupStepLR", kwargs)?;
    let epochs = positive("epochs", args.epochs)?;
    if args.warmup_epochs >= epochs {
        return Err(ScheduleError::invalid(format!(
            "warmup_epochs ({}) must be fewer than epochs ({epochs})",
            args.warmup_epochs
        ))
        .into());
    }
    let base = StepWithFixedGammaSchedule::new(
        1.0,
        args.num_decays,
        args.decay_rate,
        epochs + 1 - args.warmup_epochs,
    )?;
    if args.warmup_epochs == 0 {
        return multiplier("WarmupStepLR", base, epochs + 1, optimizer);
    }
    let length = args.warmup_epochs as f64 / epochs as f64;
    let schedule = WarmupSchedule::new(Arc::new(base), args.warmup_factor, length, WarmupMethod::Linear)?;
    multiplier("WarmupStepLR", schedule, epochs + 1, optimizer)
}

fn default_gamma() -> f64 {
    0.1
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StepLrArgs {
    step_size: u64,
    #[serde(default = "default_gamma")]
    gamma: f64,
}

pub fn step_lr(kwargs: Kwargs, optimizer: &mut Box<dyn Optimizer>) -> Result<Box<dyn LrScheduler>, FactoryError> {
    let args: StepLrArgs = parse_kwargs("StepLR", kwargs)?;
    if args.step_size == 0 {
        return Err(ScheduleError::invalid("step_size must be positive").into());
    }
    let policy = StepDecay {
        step_size: args.step_size,
        gamma: args.gamma,
    };
    Ok(Box::new(Scheduled::new("StepLR", policy, optimizer.as_mut())?))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MultiStepLrArgs {
    milestones: Vec<u64>,
    #[serde(default = "default_gamma")]
    gamma: f64,
}

pub fn multi_step_lr(kwargs: Kwargs, optimizer: &mut Box<dyn Optimizer>) -> Result<Box<dyn LrScheduler>, FactoryError> {
    let args: MultiStepLrArgs = parse_kwargs("MultiStepLR", kwargs)?;
    let mut milestones = args.milestones;
    milestones.sort_unstable();
    let policy = MultiStepDecay {
        milestones,
        gamma: args.gamma,
    };
    Ok(Box::new(Scheduled::new("MultiStepLR", policy, optimizer.as_mut())?))
}

fn default_t_mult() -> u64 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WarmRestartArgs {
    #[serde(rename = "T_0")]
    t_0: u64,
    #[serde(rename = "T_mult", default = "default_t_mult")]
    t_mult: u64,
    #[serde(default)]
    eta_min: f64,
}

pub fn cosine_warm_restarts(kwargs: Kwargs, optimizer: &mut Box<dyn Optimizer>) -> Result<Box<dyn LrScheduler>, FactoryError> {
    let args: WarmRestartArgs = parse_kwargs("CosineAnnealingWarmRestarts", kwargs)?;
    if args.t_0 == 0 {
        return Err(ScheduleError::invalid("T_0 must be a positive integer").into());
    }
    if args.t_mult == 0 {
        return Err(ScheduleError::invalid("T_mult must be an integer >= 1").into());
    }
    let policy = CosineRestarts {
        t_0: args.t_0,
        t_mult: args.t_mult,
        eta_min: args.eta_min,
    };
    Ok(Box::new(Scheduled::new("CosineAnnealingWarmRestarts", policy, optimizer.as_mut())?))
}

fn default_pct_start() -> f64 {
    0.3
}

fn default_div_factor() -> f64 {
    25.0
}

fn default_final_div_factor() -> f64 {
    1e4
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct OneCycleArgs {
    max_lr: PerGroup,
    #[serde(default)]
    total_steps: Option<u64>,
    #[serde(default)]
    epochs: Option<i64>,
    #[serde(default)]
    steps_per_epoch: Option<i64>,
    #[serde(default = "default_pct_start")]
    pct_start: f64,
    #[serde(default)]
    anneal_strategy: AnnealStrategy,
    #[serde(default = "default_div_factor")]
    div_factor: f64,
    #[serde(default = "default_final_div_factor")]
    final_div_factor: f64,
    #[serde(default)]
    three_phase: bool,
}

pub fn one_cycle_lr(kwargs: Kwargs, optimizer: &mut Box<dyn Optimizer>) -> Result<Box<dyn LrScheduler>, FactoryError> {
    let args: OneCycleArgs = parse_kwargs("OneCycleLR", kwargs)?;
    let total_steps = match (args.total_steps, args.epochs, args.steps_per_epoch) {
        (Some(0), _, _) => {
            return Err(ScheduleError::invalid("total_steps must be positive").into());
        }
        (Some(total), _, _) => total,
        (None, Some(epochs), Some(steps_per_epoch)) => {
            positive("epochs", epochs)? * positive("steps_per_epoch", steps_per_epoch)?
        }
        _ => {
            return Err(ScheduleError::invalid(
                "either total_steps or both epochs and steps_per_epoch must be given",
            )
            .into());
        }
    };
    if !(args.pct_start > 0.0 && args.pct_start < 1.0) {
        return Err(ScheduleError::invalid(format!(
            "pct_start must lie in (0, 1), got {}",
            args.pct_start
        ))
        .into());
    }
    let total = total_steps as f64;
    let phases = if args.three_phase {
        vec![
            Phase {
                end_step: args.pct_start * total - 1.0,
                from: Anchor::Initial,
                to: Anchor::Max,
            },
            Phase {
                end_step: 2.0 * args.pct_start * total - 2.0,
                from: Anchor::Max,
                to: Anchor::Initial,
            },
            Phase {
                end_step: total - 1.0,
                from: Anchor::Initial,
                to: Anchor::Min,
            },
        ]
    } else {
        vec![
            Phase {
                end_step: args.pct_start * total - 1.0,
                from: Anchor::Initial,
                to: Anchor::Max,
            },
            Phase {
                end_step: total - 1.0,
                from: Anchor::Max,
                to: Anchor::Min,
            },
        ]
    };
    let max_lrs = args.max_lr.expand(optimizer.groups().len())?;
    let policy = OneCycle {
        max_lrs,
        total_steps,
        div_factor: args.div_factor,
        final_div_factor: args.final_div_factor,
        strategy: args.anneal_strategy,
        phases,
    };
    Ok(Box::new(Scheduled::new("OneCycleLR", policy, optimizer.as_mut())?))
}

pub fn reduce_lr_on_plateau(kwargs: Kwargs, optimizer: &mut Box<dyn Optimizer>) -> Result<Box<dyn LrScheduler>, FactoryError> {
    let args: PlateauArgs = parse_kwargs(ReduceLrOnPlateau::NAME, kwargs)?;
    Ok(Box::new(ReduceLrOnPlateau::new(args, optimizer.as_mut())?))
}

/// Every built-in scheduler, by registry name.
pub const SCHEDULERS: &[(&str, SchedulerFn)] = &[
    ("OneCycleLR", one_cycle_lr),
    ("CosineAnnealingWarmRestarts", cosine_warm_restarts),
    ("ReduceLROnPlateau", reduce_lr_on_plateau),
    ("StepLR", step_lr),
    ("MultiStepLR", multi_step_lr),
    ("CosineLR", cosine_lr),
    ("FlatCosScheduler", flat_cos),
    ("WarmupCosineLR", warmup_cosine_lr),
    ("WarmupConstantLR", warmup_constant_lr),
    ("WarmupLinearLR", warmup_linear_lr),
    ("WarmupStepLR", warmup_step_lr),
];
