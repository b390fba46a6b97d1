//! Meta-architectures: whole models assembled from the full configuration.

use crate::builder::{BuildContext, ComponentBuilder};
use crate::config::ConfigNode;
use crate::error::FactoryError;
use crate::factory::{ConfigRecord, Configurable};
use crate::modelling::{Backbone, Head, MetaArchitecture};
use crate::params::{ParamGroup, Parameter, Trainable};
use tracing::info;

/// Backbone followed by a classification head.
#[derive(Debug)]
pub struct GeneralizedImageClassifier {
    backbone: Box<dyn Backbone>,
    head: Box<dyn Head>,
    record: ConfigRecord,
}

impl GeneralizedImageClassifier {
    pub fn new(backbone: Box<dyn Backbone>, head: Box<dyn Head>) -> Self {
        Self {
            backbone,
            head,
            record: ConfigRecord::new(),
        }
    }

    pub fn backbone_mut(&mut self) -> &mut dyn Backbone {
        self.backbone.as_mut()
    }

    pub fn head_mut(&mut self) -> &mut dyn Head {
        self.head.as_mut()
    }
}

impl Trainable for GeneralizedImageClassifier {
    fn parameters(&self) -> Vec<&Parameter> {
        let mut params = self.backbone.parameters();
        params.extend(self.head.parameters());
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        let mut params = self.backbone.parameters_mut();
        params.extend(self.head.parameters_mut());
        params
    }

    /// One group for the backbone and one for the head, so each can get its
    /// own learning rate. Fully frozen parts are left out.
    fn param_groups(&self) -> Vec<ParamGroup> {
        [
            ParamGroup::from_parameters(self.backbone.trainable_parameters()),
            ParamGroup::from_parameters(self.head.trainable_parameters()),
        ]
        .into_iter()
        .filter(|group| !group.params.is_empty())
        .collect()
    }
}

impl Configurable for GeneralizedImageClassifier {
    fn config_record(&self) -> &ConfigRecord {
        &self.record
    }

    fn config_record_mut(&mut self) -> &mut ConfigRecord {
        &mut self.record
    }
}

impl MetaArchitecture for GeneralizedImageClassifier {
    fn backbone(&self) -> &dyn Backbone {
        self.backbone.as_ref()
    }

    fn head(&self) -> &dyn Head {
        self.head.as_ref()
    }
}

/// Structured constructor: receives the whole top-level config.
pub fn generalized_image_classifier(
    cfg: &ConfigNode,
    ctx: &mut BuildContext,
) -> Result<Box<dyn MetaArchitecture>, FactoryError> {
    let builder = ComponentBuilder::new(ctx.registries.clone());
    let backbone = builder.build_backbone(cfg, Some(ctx.input_shape))?;
    let head = builder.build_head(cfg, backbone.output_shape())?;
    info!(
        backbone = backbone.component_name(),
        head = head.component_name(),
        num_classes = head.num_classes(),
        "Assembled image classifier"
    );
    Ok(Box::new(GeneralizedImageClassifier::new(backbone, head)))
}
