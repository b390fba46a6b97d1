//! Backbone catalogue.
//!
//! Backbones describe their parameter inventory and output shape; the
//! weights themselves belong to the numeric backend.

use crate::builder::BuildContext;
use crate::config::Kwargs;
use crate::error::FactoryError;
use crate::factory::{ConfigRecord, Configurable, parse_kwargs};
use crate::modelling::{Activation, Backbone};
use crate::params::{Parameter, Trainable};
use crate::shape_spec::ShapeSpec;
use serde::Deserialize;
use tracing::debug;

const DEFAULT_IN_CHANNELS: usize = 3;

fn default_act() -> String {
    "ReLU".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    Basic,
    Bottleneck,
}

impl Block {
    fn expansion(self) -> usize {
        match self {
            Self::Basic => 1,
            Self::Bottleneck => 4,
        }
    }
}

/// Block type and blocks per stage for each supported depth.
fn resnet_layout(model_name: &str) -> Option<(Block, [usize; 4])> {
    match model_name {
        "resnet18" => Some((Block::Basic, [2, 2, 2, 2])),
        "resnet34" => Some((Block::Basic, [3, 4, 6, 3])),
        "resnet50" => Some((Block::Bottleneck, [3, 4, 6, 3])),
        "resnet101" => Some((Block::Bottleneck, [3, 4, 23, 3])),
        "resnet152" => Some((Block::Bottleneck, [3, 8, 36, 3])),
        _ => None,
    }
}

const RESNET_DEPTHS: &[&str] = &["resnet18", "resnet34", "resnet50", "resnet101", "resnet152"];
const STAGE_WIDTHS: [usize; 4] = [64, 128, 256, 512];

/// Convolution weight count of one residual stage. Norm layers are not
/// itemised.
fn stage_numel(block: Block, blocks: usize, in_width: usize, width: usize) -> usize {
    let out_width = width * block.expansion();
    let downsample = if in_width != out_width { in_width * out_width } else { 0 };
    let block_numel = |input: usize| match block {
        Block::Basic => input * width * 9 + width * width * 9,
        Block::Bottleneck => input * width + width * width * 9 + width * out_width,
    };
    block_numel(in_width) + downsample + (blocks - 1) * block_numel(out_width)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResNetArgs {
    pub model_name: String,
    #[serde(default)]
    pub pretrained: bool,
    #[serde(default = "default_act")]
    pub act: String,
}

/// Residual network of a fixed depth.
#[derive(Debug)]
pub struct ResNetBackbone {
    model_name: String,
    pretrained: bool,
    act: Activation,
    input_shape: ShapeSpec,
    out_channels: usize,
    params: Vec<Parameter>,
    record: ConfigRecord,
}

impl ResNetBackbone {
    pub fn new(args: ResNetArgs, input_shape: ShapeSpec, act: Activation) -> Result<Self, FactoryError> {
        let (block, depths) = resnet_layout(&args.model_name).ok_or_else(|| {
            FactoryError::invalid_arguments(
                "ResNetBackbone",
                format!(
                    "unsupported model_name '{}'; expected one of [{}]",
                    args.model_name,
                    RESNET_DEPTHS.join(", ")
                ),
            )
        })?;
        let in_channels = input_shape.channels.unwrap_or(DEFAULT_IN_CHANNELS);

        let mut params = vec![Parameter::new("stem.conv.weight", in_channels * 64 * 7 * 7)];
        let mut in_width = 64;
        for (idx, (blocks, width)) in depths.iter().zip(STAGE_WIDTHS).enumerate() {
            params.push(Parameter::new(
                format!("layer{}", idx + 1),
                stage_numel(block, *blocks, in_width, width),
            ));
            in_width = width * block.expansion();
        }

        debug!(model = %args.model_name, in_channels, out_channels = in_width, "Built ResNet backbone");
        Ok(Self {
            model_name: args.model_name,
            pretrained: args.pretrained,
            act,
            input_shape,
            out_channels: in_width,
            params,
            record: ConfigRecord::new(),
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn pretrained(&self) -> bool {
        self.pretrained
    }

    pub fn activation(&self) -> Activation {
        self.act
    }

    pub fn input_shape(&self) -> ShapeSpec {
        self.input_shape
    }
}

impl Trainable for ResNetBackbone {
    fn parameters(&self) -> Vec<&Parameter> {
        self.params.iter().collect()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        self.params.iter_mut().collect()
    }
}

impl Configurable for ResNetBackbone {
    fn config_record(&self) -> &ConfigRecord {
        &self.record
    }

    fn config_record_mut(&mut self) -> &mut ConfigRecord {
        &mut self.record
    }
}

impl Backbone for ResNetBackbone {
    fn output_shape(&self) -> ShapeSpec {
        ShapeSpec::channels(self.out_channels)
    }
}

pub fn resnet_backbone(kwargs: Kwargs, ctx: &mut BuildContext) -> Result<Box<dyn Backbone>, FactoryError> {
    let args: ResNetArgs = parse_kwargs("ResNetBackbone", kwargs)?;
    let act = ctx.activation(&args.act)?;
    Ok(Box::new(ResNetBackbone::new(args, ctx.input_shape, act)?))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimmArgs {
    pub model_name: String,
    pub num_features: usize,
    #[serde(default)]
    pub pretrained: bool,
    #[serde(default)]
    pub num_params: usize,
    #[serde(default)]
    pub act: Option<String>,
}

/// Any named feature extractor whose output width is declared up front.
#[derive(Debug)]
pub struct TimmBackboneBase {
    model_name: String,
    pretrained: bool,
    act: Option<Activation>,
    num_features: usize,
    params: Vec<Parameter>,
    record: ConfigRecord,
}

impl TimmBackboneBase {
    pub fn new(args: TimmArgs, act: Option<Activation>) -> Result<Self, FactoryError> {
        if args.num_features == 0 {
            return Err(FactoryError::invalid_arguments(
                "TimmBackboneBase",
                "num_features must be positive",
            ));
        }
        Ok(Self {
            params: vec![Parameter::new(format!("{}.body", args.model_name), args.num_params)],
            model_name: args.model_name,
            pretrained: args.pretrained,
            act,
            num_features: args.num_features,
            record: ConfigRecord::new(),
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn pretrained(&self) -> bool {
        self.pretrained
    }

    pub fn activation(&self) -> Option<Activation> {
        self.act
    }
}

impl Trainable for TimmBackboneBase {
    fn parameters(&self) -> Vec<&Parameter> {
        self.params.iter().collect()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        self.params.iter_mut().collect()
    }
}

impl Configurable for TimmBackboneBase {
    fn config_record(&self) -> &ConfigRecord {
        &self.record
    }

    fn config_record_mut(&mut self) -> &mut ConfigRecord {
        &mut self.record
    }
}

impl Backbone for TimmBackboneBase {
    fn output_shape(&self) -> ShapeSpec {
        ShapeSpec::channels(self.num_features)
    }
}

pub fn timm_backbone(kwargs: Kwargs, ctx: &mut BuildContext) -> Result<Box<dyn Backbone>, FactoryError> {
    let args: TimmArgs = parse_kwargs("TimmBackboneBase", kwargs)?;
    let act = args.act.as_deref().map(|name| ctx.activation(name)).transpose()?;
    Ok(Box::new(TimmBackboneBase::new(args, act)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(model_name: &str) -> ResNetArgs {
        ResNetArgs {
            model_name: model_name.into(),
            pretrained: false,
            act: default_act(),
        }
    }

    #[test]
    fn test_resnet_output_channels() {
        let r18 = ResNetBackbone::new(args("resnet18"), ShapeSpec::channels(3), Activation::Relu).unwrap();
        assert_eq!(r18.output_shape().channels, Some(512));
        let r50 = ResNetBackbone::new(args("resnet50"), ShapeSpec::channels(3), Activation::Relu).unwrap();
        assert_eq!(r50.output_shape().channels, Some(2048));
        assert_eq!(r50.parameters().len(), 5);
    }

    #[test]
    fn test_resnet_stem_follows_input_channels() {
        let grey = ResNetBackbone::new(args("resnet34"), ShapeSpec::channels(1), Activation::Relu).unwrap();
        assert_eq!(grey.parameters()[0].numel, 64 * 49);
    }

    #[test]
    fn test_resnet_rejects_unknown_depth() {
        let err = ResNetBackbone::new(args("resnet7"), ShapeSpec::default(), Activation::Relu).unwrap_err();
        assert!(err.to_string().contains("resnet18"));
    }

    #[test]
    fn test_timm_requires_features() {
        let err = TimmBackboneBase::new(
            TimmArgs {
                model_name: "efficientnet_b0".into(),
                num_features: 0,
                pretrained: false,
                num_params: 0,
                act: None,
            },
            None,
        )
        .unwrap_err();
        assert!(matches!(err, FactoryError::InvalidArguments { .. }));
    }
}
