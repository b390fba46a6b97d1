//! Classification heads.

use crate::builder::BuildContext;
use crate::config::Kwargs;
use crate::error::FactoryError;
use crate::factory::{ConfigRecord, Configurable, parse_kwargs};
use crate::modelling::{Activation, Head};
use crate::params::{Parameter, Trainable};
use crate::shape_spec::ShapeSpec;
use serde::{Deserialize, Serialize};

/// Global pooling applied to backbone features before the classifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolType {
    #[default]
    Avg,
    Max,
    AvgMax,
    CatAvgMax,
}

impl PoolType {
    /// Feature multiplier introduced by the pooling.
    pub fn feat_mult(self) -> usize {
        match self {
            Self::CatAvgMax => 2,
            _ => 1,
        }
    }
}

fn head_input_channels(component: &str, shape: ShapeSpec) -> Result<usize, FactoryError> {
    shape.channels.ok_or_else(|| {
        FactoryError::shape_mismatch(component, format!("input shape {shape} has no channel count"))
    })
}

fn check_classes(component: &str, num_classes: usize) -> Result<(), FactoryError> {
    if num_classes == 0 {
        return Err(FactoryError::invalid_arguments(component, "num_classes must be positive"));
    }
    Ok(())
}

fn check_dropout(component: &str, p: f64) -> Result<(), FactoryError> {
    if !(0.0..1.0).contains(&p) {
        return Err(FactoryError::invalid_arguments(
            component,
            format!("dropout probability must lie in [0, 1), got {p}"),
        ));
    }
    Ok(())
}

fn linear(prefix: &str, n_in: usize, n_out: usize) -> [Parameter; 2] {
    [
        Parameter::new(format!("{prefix}.weight"), n_in * n_out),
        Parameter::new(format!("{prefix}.bias"), n_out),
    ]
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FullyConnectedArgs {
    pub num_classes: usize,
    #[serde(default)]
    pub pool_type: PoolType,
    #[serde(default)]
    pub drop_rate: f64,
}

/// Pooling followed by a single linear classifier.
#[derive(Debug)]
pub struct FullyConnectedHead {
    input_shape: ShapeSpec,
    num_classes: usize,
    pool_type: PoolType,
    drop_rate: f64,
    params: Vec<Parameter>,
    record: ConfigRecord,
}

impl FullyConnectedHead {
    pub fn new(args: FullyConnectedArgs, input_shape: ShapeSpec) -> Result<Self, FactoryError> {
        let in_channels = head_input_channels("FullyConnectedHead", input_shape)?;
        check_classes("FullyConnectedHead", args.num_classes)?;
        check_dropout("FullyConnectedHead", args.drop_rate)?;
        let n_in = in_channels * args.pool_type.feat_mult();
        Ok(Self {
            input_shape,
            num_classes: args.num_classes,
            pool_type: args.pool_type,
            drop_rate: args.drop_rate,
            params: linear("fc", n_in, args.num_classes).into(),
            record: ConfigRecord::new(),
        })
    }

    pub fn pool_type(&self) -> PoolType {
        self.pool_type
    }

    pub fn drop_rate(&self) -> f64 {
        self.drop_rate
    }
}

impl Trainable for FullyConnectedHead {
    fn parameters(&self) -> Vec<&Parameter> {
        self.params.iter().collect()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        self.params.iter_mut().collect()
    }
}

impl Configurable for FullyConnectedHead {
    fn config_record(&self) -> &ConfigRecord {
        &self.record
    }

    fn config_record_mut(&mut self) -> &mut ConfigRecord {
        &mut self.record
    }
}

impl Head for FullyConnectedHead {
    fn input_shape(&self) -> ShapeSpec {
        self.input_shape
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}

pub fn fully_connected_head(kwargs: Kwargs, ctx: &mut BuildContext) -> Result<Box<dyn Head>, FactoryError> {
    let args: FullyConnectedArgs = parse_kwargs("FullyConnectedHead", kwargs)?;
    Ok(Box::new(FullyConnectedHead::new(args, ctx.input_shape)?))
}

fn default_lin_ftrs() -> Vec<usize> {
    vec![512]
}

fn default_ps() -> f64 {
    0.5
}

fn default_true() -> bool {
    true
}

fn default_act() -> String {
    "ReLU".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FastaiArgs {
    pub num_classes: usize,
    #[serde(default = "default_lin_ftrs")]
    pub lin_ftrs: Vec<usize>,
    #[serde(default = "default_ps")]
    pub ps: f64,
    #[serde(default = "default_true")]
    pub concat_pool: bool,
    #[serde(default = "default_true")]
    pub first_bn: bool,
    #[serde(default)]
    pub bn_final: bool,
    #[serde(default)]
    pub lin_first: bool,
    #[serde(default = "default_act")]
    pub act: String,
}

/// Concat-pooling head with batch-norm/dropout/linear blocks.
#[derive(Debug)]
pub struct FastaiHead {
    input_shape: ShapeSpec,
    num_classes: usize,
    act: Activation,
    dropout: Vec<f64>,
    params: Vec<Parameter>,
    record: ConfigRecord,
}

impl FastaiHead {
    pub fn new(args: FastaiArgs, input_shape: ShapeSpec, act: Activation) -> Result<Self, FactoryError> {
        let in_channels = head_input_channels("FastaiHead", input_shape)?;
        check_classes("FastaiHead", args.num_classes)?;
        check_dropout("FastaiHead", args.ps)?;

        let pooled = if args.concat_pool { 2 * in_channels } else { in_channels };
        let mut sizes = vec![pooled];
        sizes.extend(&args.lin_ftrs);
        sizes.push(args.num_classes);

        let blocks = sizes.len() - 1;
        // hidden blocks use half the final dropout
        let dropout: Vec<f64> = (0..blocks)
            .map(|i| if i + 1 == blocks { args.ps } else { args.ps / 2.0 })
            .collect();

        let mut params = Vec::new();
        for (idx, pair) in sizes.windows(2).enumerate() {
            let (n_in, n_out) = (pair[0], pair[1]);
            let with_bn = idx != 0 || args.first_bn;
            if with_bn && !args.lin_first {
                params.extend(linear(&format!("layers.{idx}.bn"), 1, n_in));
            }
            params.extend(linear(&format!("layers.{idx}.linear"), n_in, n_out));
            if with_bn && args.lin_first {
                params.extend(linear(&format!("layers.{idx}.bn"), 1, n_out));
            }
        }
        if args.bn_final {
            params.extend(linear("bn_final", 1, args.num_classes));
        }

        Ok(Self {
            input_shape,
            num_classes: args.num_classes,
            act,
            dropout,
            params,
            record: ConfigRecord::new(),
        })
    }

    pub fn activation(&self) -> Activation {
        self.act
    }

    /// Dropout probability per block.
    pub fn dropout(&self) -> &[f64] {
        &self.dropout
    }
}

impl Trainable for FastaiHead {
    fn parameters(&self) -> Vec<&Parameter> {
        self.params.iter().collect()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        self.params.iter_mut().collect()
    }
}

impl Configurable for FastaiHead {
    fn config_record(&self) -> &ConfigRecord {
        &self.record
    }

    fn config_record_mut(&mut self) -> &mut ConfigRecord {
        &mut self.record
    }
}

impl Head for FastaiHead {
    fn input_shape(&self) -> ShapeSpec {
        self.input_shape
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}

pub fn fastai_head(kwargs: Kwargs, ctx: &mut BuildContext) -> Result<Box<dyn Head>, FactoryError> {
    let args: FastaiArgs = parse_kwargs("FastaiHead", kwargs)?;
    let act = ctx.activation(&args.act)?;
    Ok(Box::new(FastaiHead::new(args, ctx.input_shape, act)?))
}
