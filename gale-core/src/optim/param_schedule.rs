//! Parameter schedules: pure functions of training progress.
//!
//! Progress is normalized to `[0, 1]`; values outside the interval are
//! clamped before evaluation. Schedules hold no mutable state and can be
//! shared across threads behind an `Arc`.

use crate::error::ScheduleError;
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Offset applied before bucketing progress, so a step landing exactly on a
/// boundary belongs to the next bucket despite float rounding.
pub const WHERE_EPSILON: f64 = 1e-6;

const LENGTH_TOLERANCE: f64 = 1e-3;

/// A pure map from training progress to a scalar.
pub trait ParamSchedule: Send + Sync + fmt::Debug {
    /// Value at `progress`, which is already within `[0, 1]`.
    fn value(&self, progress: f64) -> f64;

    /// Value at `progress`, clamped into `[0, 1]` first.
    fn at(&self, progress: f64) -> f64 {
        self.value(clamp_progress(progress))
    }
}

pub fn clamp_progress(progress: f64) -> f64 {
    if progress.is_nan() {
        0.0
    } else {
        progress.clamp(0.0, 1.0)
    }
}

/// A shared, type-erased schedule.
pub type SharedSchedule = Arc<dyn ParamSchedule>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantSchedule {
    pub value: f64,
}

impl ConstantSchedule {
    pub fn new(value: f64) -> Self {
        Self { value }
    }
}

impl ParamSchedule for ConstantSchedule {
    fn value(&self, _progress: f64) -> f64 {
        self.value
    }
}

/// Straight line from `start` at 0 to `end` at 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearSchedule {
    pub start: f64,
    pub end: f64,
}

impl LinearSchedule {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }
}

impl ParamSchedule for LinearSchedule {
    fn value(&self, progress: f64) -> f64 {
        self.end * progress + self.start * (1.0 - progress)
    }
}

/// Half-period cosine from `start` to `end`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CosineSchedule {
    pub start: f64,
    pub end: f64,
}

impl CosineSchedule {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }
}

impl ParamSchedule for CosineSchedule {
    fn value(&self, progress: f64) -> f64 {
        self.end + 0.5 * (self.start - self.end) * (1.0 + (PI * progress).cos())
    }
}

/// `start * decay^progress`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialSchedule {
    pub start: f64,
    pub decay: f64,
}

impl ExponentialSchedule {
    pub fn new(start: f64, decay: f64) -> Self {
        Self { start, decay }
    }
}

impl ParamSchedule for ExponentialSchedule {
    fn value(&self, progress: f64) -> f64 {
        self.start * self.decay.powf(progress)
    }
}

/// `base * (1 - progress)^power`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolynomialDecaySchedule {
    pub base: f64,
    pub power: f64,
}

impl PolynomialDecaySchedule {
    pub fn new(base: f64, power: f64) -> Self {
        Self { base, power }
    }
}

impl ParamSchedule for PolynomialDecaySchedule {
    fn value(&self, progress: f64) -> f64 {
        self.base * (1.0 - progress).powf(self.power)
    }
}

/// Piecewise-constant values switching at update-count milestones.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiStepSchedule {
    values: Vec<f64>,
    milestones: Vec<u64>,
    num_updates: u64,
}

impl MultiStepSchedule {
    /// Without explicit `milestones` the values are spread evenly over
    /// `num_updates`.
    pub fn new(
        values: Vec<f64>,
        num_updates: u64,
        milestones: Option<Vec<u64>>,
    ) -> Result<Self, ScheduleError> {
        if values.is_empty() {
            return Err(ScheduleError::invalid("multi-step schedule needs at least one value"));
        }
        if num_updates == 0 {
            return Err(ScheduleError::invalid("num_updates must be positive"));
        }
        let milestones = match milestones {
            Some(milestones) => milestones,
            None => {
                let width = num_updates.div_ceil(values.len() as u64);
                (1..values.len() as u64).map(|i| width * i).collect()
            }
        };
        if milestones.len() + 1 != values.len() {
            return Err(ScheduleError::invalid(format!(
                "{} values need {} milestones, got {}",
                values.len(),
                values.len() - 1,
                milestones.len()
            )));
        }
        if milestones.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ScheduleError::invalid("milestones must be strictly increasing"));
        }
        if milestones.last().is_some_and(|&last| last >= num_updates) {
            return Err(ScheduleError::invalid(format!(
                "last milestone must be below num_updates ({num_updates})"
            )));
        }
        Ok(Self {
            values,
            milestones,
            num_updates,
        })
    }

    pub fn milestones(&self) -> &[u64] {
        &self.milestones
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

impl ParamSchedule for MultiStepSchedule {
    fn value(&self, progress: f64) -> f64 {
        let update = ((progress + WHERE_EPSILON) * self.num_updates as f64) as u64;
        let idx = self.milestones.partition_point(|&m| m <= update);
        self.values[idx]
    }
}

/// Values of equal duration, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct StepSchedule {
    values: Vec<f64>,
}

impl StepSchedule {
    pub fn new(values: Vec<f64>) -> Result<Self, ScheduleError> {
        if values.is_empty() {
            return Err(ScheduleError::invalid("step schedule needs at least one value"));
        }
        Ok(Self { values })
    }
}

impl ParamSchedule for StepSchedule {
    fn value(&self, progress: f64) -> f64 {
        let idx = ((progress + WHERE_EPSILON) * self.values.len() as f64) as usize;
        self.values[idx.min(self.values.len() - 1)]
    }
}

/// `base * gamma^k` after the k-th of `num_decays` equally spaced drops.
#[derive(Debug, Clone, PartialEq)]
pub struct StepWithFixedGammaSchedule {
    inner: MultiStepSchedule,
}

impl StepWithFixedGammaSchedule {
    pub fn new(base: f64, num_decays: u32, gamma: f64, num_updates: u64) -> Result<Self, ScheduleError> {
        if base <= 0.0 {
            return Err(ScheduleError::invalid(format!("base value must be positive, got {base}")));
        }
        if num_decays == 0 {
            return Err(ScheduleError::invalid("num_decays must be a positive integer"));
        }
        if gamma <= 0.0 {
            return Err(ScheduleError::invalid(format!("gamma must be positive, got {gamma}")));
        }
        if num_updates == 0 {
            return Err(ScheduleError::invalid("num_updates must be a positive integer"));
        }
        let values = (0..=num_decays).map(|k| base * gamma.powi(k as i32)).collect();
        Ok(Self {
            inner: MultiStepSchedule::new(values, num_updates, None)?,
        })
    }

    pub fn milestones(&self) -> &[u64] {
        self.inner.milestones()
    }
}

impl ParamSchedule for StepWithFixedGammaSchedule {
    fn value(&self, progress: f64) -> f64 {
        self.inner.value(progress)
    }
}

/// How a composite stage sees progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalScaling {
    /// Progress within the stage, remapped to `[0, 1]`.
    Rescaled,
    /// Global progress, untouched.
    Fixed,
}

#[derive(Debug, Clone)]
pub struct Stage {
    pub schedule: SharedSchedule,
    pub length: f64,
    pub scaling: IntervalScaling,
}

impl Stage {
    pub fn new(schedule: SharedSchedule, length: f64, scaling: IntervalScaling) -> Self {
        Self {
            schedule,
            length,
            scaling,
        }
    }
}

/// Sub-schedules laid end to end over `[0, 1]`.
#[derive(Debug, Clone)]
pub struct CompositeSchedule {
    stages: Vec<Stage>,
}

impl CompositeSchedule {
    pub fn new(stages: Vec<Stage>) -> Result<Self, ScheduleError> {
        if stages.is_empty() {
            return Err(ScheduleError::invalid("composite schedule needs at least one stage"));
        }
        if let Some(stage) = stages.iter().find(|s| !(s.length > 0.0)) {
            return Err(ScheduleError::invalid(format!(
                "stage lengths must be positive, got {}",
                stage.length
            )));
        }
        let total: f64 = stages.iter().map(|s| s.length).sum();
        if (total - 1.0).abs() > LENGTH_TOLERANCE {
            return Err(ScheduleError::invalid(format!(
                "stage lengths must sum to 1.0, got {total}"
            )));
        }
        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }
}

impl ParamSchedule for CompositeSchedule {
    fn value(&self, progress: f64) -> f64 {
        let last = self.stages.len() - 1;
        let mut idx = 0;
        let mut running_total = self.stages[0].length;
        while progress + WHERE_EPSILON > running_total && idx < last {
            idx += 1;
            running_total += self.stages[idx].length;
        }
        let stage = &self.stages[idx];
        match stage.scaling {
            IntervalScaling::Fixed => stage.schedule.at(progress),
            IntervalScaling::Rescaled => {
                let stage_start = running_total - stage.length;
                stage.schedule.at((progress - stage_start) / stage.length)
            }
        }
    }
}

/// Shape of the warmup ramp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WarmupMethod {
    #[default]
    Linear,
    Constant,
}

impl FromStr for WarmupMethod {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" => Ok(Self::Linear),
            "constant" => Ok(Self::Constant),
            other => Err(ScheduleError::invalid(format!(
                "unknown warmup method '{other}'; expected 'linear' or 'constant'"
            ))),
        }
    }
}

/// A base schedule with a warmup stage prepended.
///
/// The ramp runs from `factor * base(0)` to `base(length)` over the first
/// `length` of progress; afterwards the base schedule sees global progress,
/// so its own timing is not shifted by the warmup.
#[derive(Debug, Clone)]
pub struct WarmupSchedule {
    composite: CompositeSchedule,
    start_value: f64,
    end_value: f64,
}

impl WarmupSchedule {
    pub fn new(
        base: SharedSchedule,
        warmup_factor: f64,
        warmup_length: f64,
        method: WarmupMethod,
    ) -> Result<Self, ScheduleError> {
        if !(warmup_length > 0.0 && warmup_length < 1.0) {
            return Err(ScheduleError::invalid(format!(
                "warmup length must lie in (0, 1), got {warmup_length}"
            )));
        }
        let end_value = base.at(warmup_length);
        let start_value = warmup_factor * base.at(0.0);
        let warmup: SharedSchedule = match method {
            WarmupMethod::Constant => Arc::new(ConstantSchedule::new(start_value)),
            WarmupMethod::Linear => Arc::new(LinearSchedule::new(start_value, end_value)),
        };
        let composite = CompositeSchedule::new(vec![
            Stage::new(warmup, warmup_length, IntervalScaling::Rescaled),
            Stage::new(base, 1.0 - warmup_length, IntervalScaling::Fixed),
        ])?;
        Ok(Self {
            composite,
            start_value,
            end_value,
        })
    }

    pub fn start_value(&self) -> f64 {
        self.start_value
    }

    pub fn end_value(&self) -> f64 {
        self.end_value
    }
}

impl ParamSchedule for WarmupSchedule {
    fn value(&self, progress: f64) -> f64 {
        self.composite.value(progress)
    }
}

/// Fraction of training spent warming up, from either `pct_start` or a
/// step count over `max_iters`. `pct_start` wins when both are given.
pub fn warmup_length(
    max_iters: u64,
    pct_start: Option<f64>,
    warmup_steps: Option<i64>,
) -> Result<f64, ScheduleError> {
    if let Some(steps) = warmup_steps {
        if steps <= 0 {
            return Err(ScheduleError::invalid(format!(
                "expected positive integer warmup_steps, got {steps}"
            )));
        }
    }
    if let Some(pct) = pct_start {
        if !(pct > 0.0) {
            return Err(ScheduleError::invalid(format!(
                "expected positive pct_start, got {pct}"
            )));
        }
    }
    match (pct_start, warmup_steps) {
        (Some(pct), _) => Ok(pct),
        (None, Some(steps)) => {
            if max_iters == 0 {
                return Err(ScheduleError::invalid("max_iters must be positive"));
            }
            Ok(steps as f64 / max_iters as f64)
        }
        (None, None) => Err(ScheduleError::MissingWarmup),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_linear_and_cosine_endpoints() {
        let linear = LinearSchedule::new(1.0, 0.0);
        assert!(close(linear.at(0.0), 1.0));
        assert!(close(linear.at(0.25), 0.75));
        let cosine = CosineSchedule::new(1.0, 0.0);
        assert!(close(cosine.at(0.0), 1.0));
        assert!(close(cosine.at(0.5), 0.5));
        assert!(close(cosine.at(1.0), 0.0));
    }

    #[test]
    fn test_progress_is_clamped() {
        let linear = LinearSchedule::new(2.0, 4.0);
        assert!(close(linear.at(-0.5), 2.0));
        assert!(close(linear.at(3.0), 4.0));
        assert!(close(linear.at(f64::NAN), 2.0));
    }

    #[test]
    fn test_exponential_and_polynomial() {
        assert!(close(ExponentialSchedule::new(2.0, 0.25).at(0.5), 1.0));
        assert!(close(PolynomialDecaySchedule::new(1.0, 2.0).at(0.5), 0.25));
    }

    #[test]
    fn test_multi_step_default_milestones() {
        let sched = MultiStepSchedule::new(vec![1.0, 0.1, 0.01], 9, None).unwrap();
        assert_eq!(sched.milestones(), &[3, 6]);
        assert!(close(sched.at(0.0), 1.0));
        assert!(close(sched.at(3.0 / 9.0), 0.1));
        assert!(close(sched.at(1.0), 0.01));
    }

    #[test]
    fn test_multi_step_rejects_bad_milestones() {
        let err = MultiStepSchedule::new(vec![1.0, 0.5], 10, Some(vec![10])).unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidValue { .. }));
        let err = MultiStepSchedule::new(vec![1.0, 0.5, 0.1], 10, Some(vec![5, 5])).unwrap_err();
        assert!(err.to_string().contains("strictly increasing"));
    }

    #[test]
    fn test_step_schedule_buckets() {
        let sched = StepSchedule::new(vec![3.0, 2.0, 1.0]).unwrap();
        assert!(close(sched.at(0.1), 3.0));
        assert!(close(sched.at(0.5), 2.0));
        assert!(close(sched.at(1.0), 1.0));
    }

    #[test]
    fn test_step_with_fixed_gamma_validates() {
        assert!(StepWithFixedGammaSchedule::new(0.0, 2, 0.1, 10).is_err());
        assert!(StepWithFixedGammaSchedule::new(1.0, 0, 0.1, 10).is_err());
        assert!(StepWithFixedGammaSchedule::new(1.0, 2, -0.1, 10).is_err());
        let sched = StepWithFixedGammaSchedule::new(1.0, 2, 0.1, 9).unwrap();
        assert!(close(sched.at(0.99), 0.01));
    }

    #[test]
    fn test_composite_rejects_bad_lengths() {
        let one: SharedSchedule = Arc::new(ConstantSchedule::new(1.0));
        let err = CompositeSchedule::new(vec![
            Stage::new(one.clone(), 0.5, IntervalScaling::Fixed),
            Stage::new(one, 0.4, IntervalScaling::Fixed),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("sum to 1.0"));
    }

    #[test]
    fn test_composite_boundary_belongs_to_next_stage() {
        let sched = CompositeSchedule::new(vec![
            Stage::new(Arc::new(ConstantSchedule::new(1.0)), 0.5, IntervalScaling::Rescaled),
            Stage::new(Arc::new(ConstantSchedule::new(2.0)), 0.5, IntervalScaling::Rescaled),
        ])
        .unwrap();
        assert!(close(sched.at(0.49), 1.0));
        assert!(close(sched.at(0.5), 2.0));
    }

    #[test]
    fn test_warmup_continuity() {
        let base: SharedSchedule = Arc::new(CosineSchedule::new(1.0, 0.0));
        let sched = WarmupSchedule::new(base.clone(), 0.001, 0.1, WarmupMethod::Linear).unwrap();
        assert!(close(sched.at(0.0), 0.001));
        assert!(close(sched.at(0.1), base.at(0.1)));
        assert!(close(sched.at(0.6), base.at(0.6)));
    }

    #[test]
    fn test_constant_warmup_is_flat() {
        let base: SharedSchedule = Arc::new(LinearSchedule::new(1.0, 0.0));
        let sched = WarmupSchedule::new(base, 0.5, 0.2, WarmupMethod::Constant).unwrap();
        assert!(close(sched.at(0.0), 0.5));
        assert!(close(sched.at(0.15), 0.5));
    }

    #[test]
    fn test_warmup_method_parse() {
        assert_eq!("linear".parse::<WarmupMethod>().unwrap(), WarmupMethod::Linear);
        assert_eq!("constant".parse::<WarmupMethod>().unwrap(), WarmupMethod::Constant);
        assert!("exponential".parse::<WarmupMethod>().is_err());
    }

    #[test]
    fn test_warmup_length_rules() {
        assert_eq!(warmup_length(100, None, None).unwrap_err(), ScheduleError::MissingWarmup);
        assert!(warmup_length(100, None, Some(0)).is_err());
        assert!(warmup_length(100, Some(0.0), None).is_err());
        assert!(close(warmup_length(100, None, Some(10)).unwrap(), 0.1));
        assert!(close(warmup_length(100, Some(0.3), Some(10)).unwrap(), 0.3));
    }

    #[test]
    fn test_warmup_length_out_of_range() {
        let base: SharedSchedule = Arc::new(ConstantSchedule::new(1.0));
        assert!(WarmupSchedule::new(base.clone(), 0.1, 1.0, WarmupMethod::Linear).is_err());
        assert!(WarmupSchedule::new(base, 0.1, 0.0, WarmupMethod::Linear).is_err());
    }
}
