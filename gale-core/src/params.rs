//! Parameter inventory, freezing and parameter groups.
//!
//! Parameters here are bookkeeping entries (name, element count, whether
//! they receive gradients); the numeric payload lives in whatever framework
//! runs the forward pass.

use crate::error::FactoryError;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One named parameter tensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub numel: usize,
    pub requires_grad: bool,
}

impl Parameter {
    pub fn new(name: impl Into<String>, numel: usize) -> Self {
        Self {
            name: name.into(),
            numel,
            requires_grad: true,
        }
    }
}

/// A set of parameters handed to an optimizer, with optional per-group
/// hyper-parameter overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamGroup {
    pub params: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lr: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_decay: Option<f64>,
}

impl ParamGroup {
    pub fn new(params: Vec<String>) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    pub fn with_lr(mut self, lr: f64) -> Self {
        self.lr = Some(lr);
        self
    }

    pub fn from_parameters<'a>(params: impl IntoIterator<Item = &'a Parameter>) -> Self {
        Self::new(params.into_iter().map(|p| p.name.clone()).collect())
    }
}

/// Parameter inventory and freezing for anything that can be optimized.
pub trait Trainable {
    /// Every parameter, in registration order.
    fn parameters(&self) -> Vec<&Parameter>;

    fn parameters_mut(&mut self) -> Vec<&mut Parameter>;

    fn trainable_parameters(&self) -> Vec<&Parameter> {
        self.parameters()
            .into_iter()
            .filter(|p| p.requires_grad)
            .collect()
    }

    /// Total element count of parameters that receive gradients.
    fn num_trainable(&self) -> usize {
        self.trainable_parameters().iter().map(|p| p.numel).sum()
    }

    fn freeze(&mut self) {
        for param in self.parameters_mut() {
            param.requires_grad = false;
        }
    }

    fn unfreeze(&mut self) {
        for param in self.parameters_mut() {
            param.requires_grad = true;
        }
    }

    /// Freeze the first `n` parameters and unfreeze the rest. Negative `n`
    /// counts from the end.
    fn freeze_to(&mut self, n: isize) {
        let mut params = self.parameters_mut();
        let total = params.len();
        let frozen = if n >= 0 {
            n.unsigned_abs()
        } else {
            total.saturating_sub(n.unsigned_abs())
        };
        if frozen >= total {
            warn!(
                frozen,
                total, "Freezing past the last parameter; whole model is frozen"
            );
        }
        for (idx, param) in params.iter_mut().enumerate() {
            param.requires_grad = idx >= frozen;
        }
    }

    /// Groups handed to the optimizer. Defaults to a single group holding
    /// every trainable parameter.
    fn param_groups(&self) -> Vec<ParamGroup> {
        vec![ParamGroup::from_parameters(self.trainable_parameters())]
    }
}

impl<T: Trainable + ?Sized> Trainable for Box<T> {
    fn parameters(&self) -> Vec<&Parameter> {
        (**self).parameters()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        (**self).parameters_mut()
    }

    fn param_groups(&self) -> Vec<ParamGroup> {
        (**self).param_groups()
    }
}

/// `n` geometrically spaced values from `start` to `stop`.
pub fn even_mults(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![stop],
        _ => {
            let step = (stop / start).powf(1.0 / (n - 1) as f64);
            (0..n).map(|i| start * step.powi(i as i32)).collect()
        }
    }
}

/// Assign learning rates spaced geometrically from `lr_start` (default
/// `lr_stop / 100`) to `lr_stop` across `groups`, earliest group lowest.
pub fn build_discriminative_lrs(
    mut groups: Vec<ParamGroup>,
    lr_stop: f64,
    lr_start: Option<f64>,
) -> Result<(Vec<ParamGroup>, Vec<f64>), FactoryError> {
    if groups.is_empty() {
        return Err(FactoryError::invalid_arguments(
            "discriminative lrs",
            "no parameter groups to assign learning rates to",
        ));
    }
    if lr_stop <= 0.0 || lr_start.is_some_and(|lr| lr <= 0.0) {
        return Err(FactoryError::invalid_arguments(
            "discriminative lrs",
            "learning rates must be positive",
        ));
    }
    let lrs = even_mults(lr_start.unwrap_or(lr_stop / 100.0), lr_stop, groups.len());
    for (group, lr) in groups.iter_mut().zip(&lrs) {
        group.lr = Some(*lr);
    }
    Ok((groups, lrs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Stack {
        params: Vec<Parameter>,
    }

    impl Stack {
        fn new(n: usize) -> Self {
            Self {
                params: (0..n).map(|i| Parameter::new(format!("layer{i}.weight"), 10)).collect(),
            }
        }

        fn frozen(&self) -> Vec<bool> {
            self.params.iter().map(|p| !p.requires_grad).collect()
        }
    }

    impl Trainable for Stack {
        fn parameters(&self) -> Vec<&Parameter> {
            self.params.iter().collect()
        }

        fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
            self.params.iter_mut().collect()
        }
    }

    #[test]
    fn test_freeze_and_unfreeze() {
        let mut stack = Stack::new(3);
        stack.freeze();
        assert_eq!(stack.num_trainable(), 0);
        stack.unfreeze();
        assert_eq!(stack.num_trainable(), 30);
    }

    #[test]
    fn test_freeze_to_positive() {
        let mut stack = Stack::new(4);
        stack.freeze_to(2);
        assert_eq!(stack.frozen(), vec![true, true, false, false]);
    }

    #[test]
    fn test_freeze_to_negative_counts_from_end() {
        let mut stack = Stack::new(4);
        stack.freeze_to(-1);
        assert_eq!(stack.frozen(), vec![true, true, true, false]);
    }

    #[test]
    fn test_freeze_to_past_end_freezes_everything() {
        let mut stack = Stack::new(2);
        stack.freeze_to(5);
        assert_eq!(stack.frozen(), vec![true, true]);
        stack.freeze_to(0);
        assert_eq!(stack.frozen(), vec![false, false]);
    }

    #[test]
    fn test_default_param_groups_skip_frozen() {
        let mut stack = Stack::new(3);
        stack.freeze_to(1);
        let groups = stack.param_groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].params, vec!["layer1.weight", "layer2.weight"]);
    }

    #[test]
    fn test_even_mults() {
        let lrs = even_mults(1e-4, 1e-2, 3);
        assert_eq!(lrs.len(), 3);
        assert!((lrs[0] - 1e-4).abs() < 1e-12);
        assert!((lrs[1] - 1e-3).abs() < 1e-12);
        assert!((lrs[2] - 1e-2).abs() < 1e-12);
        assert_eq!(even_mults(0.1, 0.5, 1), vec![0.5]);
    }

    #[test]
    fn test_discriminative_lrs_default_start() {
        let groups = vec![ParamGroup::new(vec!["a".into()]), ParamGroup::new(vec!["b".into()])];
        let (groups, lrs) = build_discriminative_lrs(groups, 1e-2, None).unwrap();
        assert!((lrs[0] - 1e-4).abs() < 1e-12);
        assert_eq!(groups[1].lr, Some(lrs[1]));
    }

    #[test]
    fn test_discriminative_lrs_rejects_empty() {
        let err = build_discriminative_lrs(Vec::new(), 1e-2, None).unwrap_err();
        assert!(matches!(err, FactoryError::InvalidArguments { .. }));
    }
}
