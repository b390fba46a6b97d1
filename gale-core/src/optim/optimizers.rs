//! Optimizer catalogue.
//!
//! Optimizers here hold hyper-parameters and per-group learning rates; the
//! update arithmetic belongs to the numeric backend. Schedulers read and
//! write the group learning rates through [`Optimizer`].

use crate::config::Kwargs;
use crate::error::FactoryError;
use crate::factory::{ConfigRecord, Configurable, parse_kwargs};
use crate::params::ParamGroup;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::debug;

/// One parameter group as the optimizer sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerGroup {
    pub params: Vec<String>,
    pub lr: f64,
    pub weight_decay: f64,
    /// Learning rate the attached scheduler treats as its base.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_lr: Option<f64>,
}

/// A built optimizer.
pub trait Optimizer: Configurable + Send + Sync + fmt::Debug {
    /// Registry name, e.g. `AdamW`.
    fn name(&self) -> &'static str;

    fn groups(&self) -> &[OptimizerGroup];

    fn groups_mut(&mut self) -> &mut [OptimizerGroup];

    /// Hyper-parameters as configured, defaults filled in.
    fn hyper_parameters(&self) -> Value;

    fn learning_rates(&self) -> Vec<f64> {
        self.groups().iter().map(|g| g.lr).collect()
    }
}

/// Keyword arguments of one optimizer kind.
pub trait OptimizerArgs: DeserializeOwned + Serialize + fmt::Debug + Send + Sync + 'static {
    const NAME: &'static str;

    fn lr(&self) -> f64;

    fn weight_decay(&self) -> f64;

    fn validate(&self) -> Result<(), String>;
}

/// Generic optimizer over one argument set.
#[derive(Debug)]
pub struct Optim<A> {
    args: A,
    groups: Vec<OptimizerGroup>,
    record: ConfigRecord,
}

pub type Sgd = Optim<SgdArgs>;
pub type Adam = Optim<AdamArgs>;
pub type AdamW = Optim<AdamWArgs>;
pub type RmsProp = Optim<RmsPropArgs>;
pub type RAdam = Optim<RAdamArgs>;

impl<A: OptimizerArgs> Optim<A> {
    pub fn new(args: A, groups: Vec<ParamGroup>) -> Result<Self, FactoryError> {
        args.validate()
            .map_err(|message| FactoryError::invalid_arguments(A::NAME, message))?;
        if groups.is_empty() {
            return Err(FactoryError::invalid_arguments(
                A::NAME,
                "optimizer got an empty parameter list",
            ));
        }
        let groups = groups
            .into_iter()
            .map(|group| OptimizerGroup {
                params: group.params,
                lr: group.lr.unwrap_or_else(|| args.lr()),
                weight_decay: group.weight_decay.unwrap_or_else(|| args.weight_decay()),
                initial_lr: None,
            })
            .collect::<Vec<_>>();
        if let Some(group) = groups.iter().find(|g| g.lr < 0.0) {
            return Err(FactoryError::invalid_arguments(
                A::NAME,
                format!("invalid learning rate: {}", group.lr),
            ));
        }
        debug!(optimizer = A::NAME, groups = groups.len(), "Built optimizer");
        Ok(Self {
            args,
            groups,
            record: ConfigRecord::new(),
        })
    }

    pub fn args(&self) -> &A {
        &self.args
    }
}

impl<A: OptimizerArgs> Configurable for Optim<A> {
    fn config_record(&self) -> &ConfigRecord {
        &self.record
    }

    fn config_record_mut(&mut self) -> &mut ConfigRecord {
        &mut self.record
    }

    fn component_name(&self) -> &'static str {
        A::NAME
    }
}

impl<A: OptimizerArgs> Optimizer for Optim<A> {
    fn name(&self) -> &'static str {
        A::NAME
    }

    fn groups(&self) -> &[OptimizerGroup] {
        &self.groups
    }

    fn groups_mut(&mut self) -> &mut [OptimizerGroup] {
        &mut self.groups
    }

    fn hyper_parameters(&self) -> Value {
        serde_json::to_value(&self.args).unwrap_or(Value::Null)
    }
}

/// Keyword constructor for any optimizer kind.
pub fn build_optimizer<A: OptimizerArgs>(
    kwargs: Kwargs,
    groups: &mut Vec<ParamGroup>,
) -> Result<Box<dyn Optimizer>, FactoryError> {
    let args: A = parse_kwargs(A::NAME, kwargs)?;
    Ok(Box::new(Optim::new(args, groups.clone())?))
}

fn default_lr() -> f64 {
    1e-3
}

fn default_betas() -> (f64, f64) {
    (0.9, 0.999)
}

fn default_eps() -> f64 {
    1e-8
}

fn check_common(lr: f64, eps: f64, weight_decay: f64) -> Result<(), String> {
    if lr < 0.0 {
        return Err(format!("invalid learning rate: {lr}"));
    }
    if eps < 0.0 {
        return Err(format!("invalid epsilon value: {eps}"));
    }
    if weight_decay < 0.0 {
        return Err(format!("invalid weight_decay value: {weight_decay}"));
    }
    Ok(())
}

fn check_betas((beta1, beta2): (f64, f64)) -> Result<(), String> {
    if !(0.0..1.0).contains(&beta1) {
        return Err(format!("invalid beta parameter at index 0: {beta1}"));
    }
    if !(0.0..1.0).contains(&beta2) {
        return Err(format!("invalid beta parameter at index 1: {beta2}"));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SgdArgs {
    #[serde(default = "default_lr")]
    pub lr: f64,
    #[serde(default)]
    pub momentum: f64,
    #[serde(default)]
    pub dampening: f64,
    #[serde(default)]
    pub weight_decay: f64,
    #[serde(default)]
    pub nesterov: bool,
}

impl OptimizerArgs for SgdArgs {
    const NAME: &'static str = "SGD";

    fn lr(&self) -> f64 {
        self.lr
    }

    fn weight_decay(&self) -> f64 {
        self.weight_decay
    }

    fn validate(&self) -> Result<(), String> {
        check_common(self.lr, 0.0, self.weight_decay)?;
        if self.momentum < 0.0 {
            return Err(format!("invalid momentum value: {}", self.momentum));
        }
        if self.nesterov && (self.momentum <= 0.0 || self.dampening != 0.0) {
            return Err("nesterov momentum requires a momentum and zero dampening".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdamArgs {
    #[serde(default = "default_lr")]
    pub lr: f64,
    #[serde(default = "default_betas")]
    pub betas: (f64, f64),
    #[serde(default = "default_eps")]
    pub eps: f64,
    #[serde(default)]
    pub weight_decay: f64,
    #[serde(default)]
    pub amsgrad: bool,
}

impl OptimizerArgs for AdamArgs {
    const NAME: &'static str = "Adam";

    fn lr(&self) -> f64 {
        self.lr
    }

    fn weight_decay(&self) -> f64 {
        self.weight_decay
    }

    fn validate(&self) -> Result<(), String> {
        check_common(self.lr, self.eps, self.weight_decay)?;
        check_betas(self.betas)
    }
}

fn default_adamw_weight_decay() -> f64 {
    1e-2
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdamWArgs {
    #[serde(default = "default_lr")]
    pub lr: f64,
    #[serde(default = "default_betas")]
    pub betas: (f64, f64),
    #[serde(default = "default_eps")]
    pub eps: f64,
    #[serde(default = "default_adamw_weight_decay")]
    pub weight_decay: f64,
    #[serde(default)]
    pub amsgrad: bool,
}

impl OptimizerArgs for AdamWArgs {
    const NAME: &'static str = "AdamW";

    fn lr(&self) -> f64 {
        self.lr
    }

    fn weight_decay(&self) -> f64 {
        self.weight_decay
    }

    fn validate(&self) -> Result<(), String> {
        check_common(self.lr, self.eps, self.weight_decay)?;
        check_betas(self.betas)
    }
}

fn default_rmsprop_lr() -> f64 {
    1e-2
}

fn default_alpha() -> f64 {
    0.99
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RmsPropArgs {
    #[serde(default = "default_rmsprop_lr")]
    pub lr: f64,
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default = "default_eps")]
    pub eps: f64,
    #[serde(default)]
    pub weight_decay: f64,
    #[serde(default)]
    pub momentum: f64,
    #[serde(default)]
    pub centered: bool,
}

impl OptimizerArgs for RmsPropArgs {
    const NAME: &'static str = "RMSprop";

    fn lr(&self) -> f64 {
        self.lr
    }

    fn weight_decay(&self) -> f64 {
        self.weight_decay
    }

    fn validate(&self) -> Result<(), String> {
        check_common(self.lr, self.eps, self.weight_decay)?;
        if self.momentum < 0.0 {
            return Err(format!("invalid momentum value: {}", self.momentum));
        }
        if self.alpha < 0.0 {
            return Err(format!("invalid alpha value: {}", self.alpha));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RAdamArgs {
    #[serde(default = "default_lr")]
    pub lr: f64,
    #[serde(default = "default_betas")]
    pub betas: (f64, f64),
    #[serde(default = "default_eps")]
    pub eps: f64,
    #[serde(default)]
    pub weight_decay: f64,
}

impl OptimizerArgs for RAdamArgs {
    const NAME: &'static str = "RAdam";

    fn lr(&self) -> f64 {
        self.lr
    }

    fn weight_decay(&self) -> f64 {
        self.weight_decay
    }

    fn validate(&self) -> Result<(), String> {
        check_common(self.lr, self.eps, self.weight_decay)?;
        check_betas(self.betas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kwargs(value: Value) -> Kwargs {
        value.as_object().cloned().unwrap()
    }

    fn groups() -> Vec<ParamGroup> {
        vec![
            ParamGroup::new(vec!["backbone.weight".into()]).with_lr(1e-4),
            ParamGroup::new(vec!["head.weight".into()]),
        ]
    }

    #[test]
    fn test_group_overrides_default_lr() {
        let opt = build_optimizer::<AdamWArgs>(kwargs(json!({ "lr": 3e-3 })), &mut groups()).unwrap();
        assert_eq!(opt.name(), "AdamW");
        assert_eq!(opt.learning_rates(), vec![1e-4, 3e-3]);
        assert_eq!(opt.groups()[1].weight_decay, 1e-2);
    }

    #[test]
    fn test_defaults_fill_in() {
        let opt = build_optimizer::<RmsPropArgs>(Kwargs::new(), &mut groups()).unwrap();
        assert_eq!(opt.learning_rates()[1], 1e-2);
        assert_eq!(opt.hyper_parameters()["alpha"], json!(0.99));
    }

    #[test]
    fn test_nesterov_requires_momentum() {
        let err = build_optimizer::<SgdArgs>(kwargs(json!({ "nesterov": true })), &mut groups())
            .unwrap_err();
        match err {
            FactoryError::InvalidArguments { component, message } => {
                assert_eq!(component, "SGD");
                assert!(message.contains("nesterov"));
            }
            other => panic!("Expected InvalidArguments, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_bad_betas() {
        let err = build_optimizer::<AdamArgs>(kwargs(json!({ "betas": [0.9, 1.0] })), &mut groups())
            .unwrap_err();
        assert!(err.to_string().contains("beta"));
    }

    #[test]
    fn test_rejects_empty_groups() {
        let err = build_optimizer::<RAdamArgs>(Kwargs::new(), &mut Vec::new()).unwrap_err();
        assert!(err.to_string().contains("empty parameter list"));
    }

    #[test]
    fn test_rejects_unknown_field() {
        let err = build_optimizer::<SgdArgs>(kwargs(json!({ "lr": 0.1, "betas": [0.9, 0.99] })), &mut groups())
            .unwrap_err();
        assert!(matches!(err, FactoryError::InvalidArguments { .. }));
    }
}
