//! Image-classification model components: backbones, heads and the
//! meta-architectures that wire them together.

pub mod activations;
pub mod backbones;
pub mod heads;
pub mod meta_arch;

pub use activations::Activation;
pub use backbones::{ResNetBackbone, TimmBackboneBase};
pub use heads::{FastaiHead, FullyConnectedHead};
pub use meta_arch::GeneralizedImageClassifier;

use crate::builder::Registries;
use crate::error::RegistryError;
use crate::factory::{Configurable, Constructor};
use crate::params::Trainable;
use crate::shape_spec::ShapeSpec;
use std::fmt;

/// Feature extractor feeding a head.
pub trait Backbone: Trainable + Configurable + Send + Sync + fmt::Debug {
    fn output_shape(&self) -> ShapeSpec;
}

/// Classifier on top of backbone features.
pub trait Head: Trainable + Configurable + Send + Sync + fmt::Debug {
    fn input_shape(&self) -> ShapeSpec;

    fn num_classes(&self) -> usize;
}

/// A complete model built from the whole configuration.
pub trait MetaArchitecture: Trainable + Configurable + Send + Sync + fmt::Debug {
    fn backbone(&self) -> &dyn Backbone;

    fn head(&self) -> &dyn Head;
}

/// Populate the model domains of `registries`.
pub fn register_defaults(registries: &mut Registries) -> Result<(), RegistryError> {
    activations::register_activations(&mut registries.activations)?;

    registries
        .backbones
        .register_type::<TimmBackboneBase>("TimmBackboneBase", Constructor::Keyword(backbones::timm_backbone))?;
    registries
        .backbones
        .register_type::<ResNetBackbone>("ResNetBackbone", Constructor::Keyword(backbones::resnet_backbone))?;

    registries
        .heads
        .register_type::<FastaiHead>("FastaiHead", Constructor::Keyword(heads::fastai_head))?;
    registries.heads.register_type::<FullyConnectedHead>(
        "FullyConnectedHead",
        Constructor::Keyword(heads::fully_connected_head),
    )?;

    registries.meta_architectures.register_type::<GeneralizedImageClassifier>(
        "GeneralizedImageClassifier",
        Constructor::Structured(meta_arch::generalized_image_classifier),
    )?;
    Ok(())
}
