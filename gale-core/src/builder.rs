//! Component registries and the domain builders that read them.
//!
//! [`Registries`] holds one [`Domain`] per component kind. Each domain maps
//! short names (`ResNetBackbone`, `AdamW`, ...) and fully-qualified
//! constructor paths to constructors. [`ComponentBuilder`] reads
//! `<domain>.name` / `<domain>.init_args` from a config, resolves the name
//! and hands the arguments to the configurable factory.

use crate::config::ConfigNode;
use crate::error::{FactoryError, RegistryError};
use crate::factory::{Configurable, Constructor, Injector, PathInjector, class_path, from_config, from_target};
use crate::modelling::{self, Activation, Backbone, Head, MetaArchitecture};
use crate::optim::{self, LrScheduler, Optimizer};
use crate::params::ParamGroup;
use crate::registry::Registry;
use crate::shape_spec::ShapeSpec;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

const DEFAULT_INPUT_CHANNELS: usize = 3;

/// Names and constructor paths for one component domain.
pub struct Domain<T, X: ?Sized> {
    names: Registry<Constructor<T, X>>,
    paths: PathInjector<T, X>,
}

impl<T, X: ?Sized> fmt::Debug for Domain<T, X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Domain")
            .field("domain", &self.names.domain())
            .field("names", &self.names.names())
            .finish()
    }
}

impl<T, X: ?Sized> Domain<T, X> {
    pub fn new(domain: &'static str) -> Self {
        Self {
            names: Registry::new(domain),
            paths: PathInjector::new(domain),
        }
    }

    pub fn domain(&self) -> &'static str {
        self.names.domain()
    }

    /// Register `constructor` under a short name and a constructor path.
    ///
    /// Either both keys are added or neither is.
    pub fn register(
        &mut self,
        name: &str,
        path: impl Into<String>,
        constructor: Constructor<T, X>,
    ) -> Result<(), RegistryError> {
        let path = path.into();
        let taken = if self.names.contains(name) {
            Some(name.to_string())
        } else if self.paths.contains_path(&path) {
            Some(path.clone())
        } else {
            None
        };
        if let Some(name) = taken {
            return Err(RegistryError::DuplicateKey {
                domain: self.domain().to_string(),
                name,
            });
        }
        self.names.register(name, constructor)?;
        self.paths.register_path(path, constructor)
    }

    /// Register the constructor of type `C` under `name` and `C`'s type path.
    pub fn register_type<C: ?Sized>(
        &mut self,
        name: &str,
        constructor: Constructor<T, X>,
    ) -> Result<(), RegistryError> {
        self.register(name, class_path::<C>(), constructor)
    }

    pub fn get(&self, name: &str) -> Result<&Constructor<T, X>, RegistryError> {
        self.names.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.names.names()
    }

    pub fn paths(&self) -> Vec<String> {
        self.paths.paths()
    }

    pub fn injector(&self) -> &dyn Injector<T, X> {
        &self.paths
    }

    /// Build `name` from `args`.
    ///
    /// The name is resolved before anything is constructed. Without a name,
    /// `args` must carry a `_target_` path.
    pub fn build(&self, name: Option<&str>, args: &ConfigNode, extras: &mut X, path: &str) -> Result<T, FactoryError>
    where
        T: Configurable,
    {
        match name {
            Some(name) => {
                let constructor = self.names.get(name).map_err(|source| FactoryError::UnknownComponent {
                    domain: self.domain().to_string(),
                    source,
                })?;
                debug!(domain = self.domain(), name, "Building component");
                from_config(constructor, args, extras, Some(&self.paths))
            }
            None if args.target().is_some() => from_target(args, extras, &self.paths),
            None => Err(FactoryError::MissingField {
                path: format!("{path}.name"),
            }),
        }
    }
}

/// Every component registry, built once at startup and shared read-only.
#[derive(Debug)]
pub struct Registries {
    pub backbones: Domain<Box<dyn Backbone>, BuildContext>,
    pub heads: Domain<Box<dyn Head>, BuildContext>,
    pub meta_architectures: Domain<Box<dyn MetaArchitecture>, BuildContext>,
    pub optimizers: Domain<Box<dyn Optimizer>, Vec<ParamGroup>>,
    pub schedulers: Domain<Box<dyn LrScheduler>, Box<dyn Optimizer>>,
    pub activations: Registry<Activation>,
}

impl Default for Registries {
    fn default() -> Self {
        Self::new()
    }
}

impl Registries {
    /// Empty registries.
    pub fn new() -> Self {
        Self {
            backbones: Domain::new("backbone"),
            heads: Domain::new("head"),
            meta_architectures: Domain::new("meta-architecture"),
            optimizers: Domain::new("optimizer"),
            schedulers: Domain::new("scheduler"),
            activations: Registry::new("activation"),
        }
    }

    /// Registries holding every built-in component.
    pub fn with_defaults() -> Result<Self, RegistryError> {
        let mut registries = Self::new();
        modelling::register_defaults(&mut registries)?;
        optim::register_defaults(&mut registries)?;
        info!(
            backbones = registries.backbones.names().len(),
            heads = registries.heads.names().len(),
            optimizers = registries.optimizers.names().len(),
            schedulers = registries.schedulers.names().len(),
            "Registries populated"
        );
        Ok(registries)
    }

    /// Registered names per domain, in a fixed order.
    pub fn catalogue(&self) -> Vec<(&'static str, Vec<String>)> {
        vec![
            (self.backbones.domain(), self.backbones.names()),
            (self.heads.domain(), self.heads.names()),
            (self.meta_architectures.domain(), self.meta_architectures.names()),
            (self.optimizers.domain(), self.optimizers.names()),
            (self.schedulers.domain(), self.schedulers.names()),
            (self.activations.domain(), self.activations.names()),
        ]
    }
}

/// Extras handed to model-component constructors.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub input_shape: ShapeSpec,
    pub registries: Arc<Registries>,
}

impl BuildContext {
    pub fn new(input_shape: ShapeSpec, registries: Arc<Registries>) -> Self {
        Self {
            input_shape,
            registries,
        }
    }

    /// Resolve an activation by registry name.
    pub fn activation(&self, name: &str) -> Result<Activation, FactoryError> {
        self.registries
            .activations
            .get(name)
            .copied()
            .map_err(|source| FactoryError::UnknownComponent {
                domain: "activation".into(),
                source,
            })
    }
}

/// `(name, init_args)` of the component configured at `path`.
fn component_spec(cfg: &ConfigNode, path: &str) -> Result<(Option<String>, ConfigNode), FactoryError> {
    let node = cfg.node(path).ok_or_else(|| FactoryError::MissingField {
        path: path.to_string(),
    })?;
    let name = node.get_str("name").map(str::to_string);
    let init_args = node.node("init_args").unwrap_or_default();
    Ok((name, init_args))
}

/// Builds domain components from configuration.
#[derive(Debug, Clone)]
pub struct ComponentBuilder {
    registries: Arc<Registries>,
}

impl ComponentBuilder {
    pub fn new(registries: Arc<Registries>) -> Self {
        Self { registries }
    }

    /// Builder over the built-in registries.
    pub fn with_defaults() -> Result<Self, RegistryError> {
        Ok(Self::new(Arc::new(Registries::with_defaults()?)))
    }

    pub fn registries(&self) -> &Arc<Registries> {
        &self.registries
    }

    /// Model input shape: `model.input_shape` when given, otherwise
    /// `input.channels` (default 3) with unknown spatial size.
    pub fn input_shape(cfg: &ConfigNode) -> Result<ShapeSpec, FactoryError> {
        if let Some(node) = cfg.node("model.input_shape") {
            return node.deserialize().map_err(|e| {
                FactoryError::invalid_arguments("model.input_shape", e.to_string())
            });
        }
        let channels = match cfg.lookup("input.channels") {
            None | Some(serde_json::Value::Null) => DEFAULT_INPUT_CHANNELS,
            Some(value) => value.as_u64().map(|c| c as usize).ok_or_else(|| {
                FactoryError::invalid_arguments(
                    "input.channels",
                    format!("expected a non-negative integer, got {value}"),
                )
            })?,
        };
        Ok(ShapeSpec::channels(channels))
    }

    fn context(&self, input_shape: ShapeSpec) -> BuildContext {
        BuildContext::new(input_shape, Arc::clone(&self.registries))
    }

    /// Build `model.backbone`. The backbone must report its output channels.
    pub fn build_backbone(
        &self,
        cfg: &ConfigNode,
        input_shape: Option<ShapeSpec>,
    ) -> Result<Box<dyn Backbone>, FactoryError> {
        let input_shape = match input_shape {
            Some(shape) => shape,
            None => Self::input_shape(cfg)?,
        };
        let (name, init_args) = component_spec(cfg, "model.backbone")?;
        let backbone = self.registries.backbones.build(
            name.as_deref(),
            &init_args,
            &mut self.context(input_shape),
            "model.backbone",
        )?;
        if backbone.output_shape().channels.is_none() {
            return Err(FactoryError::shape_mismatch(
                backbone.component_name(),
                "backbone does not report its output channels",
            ));
        }
        info!(
            backbone = backbone.component_name(),
            output_shape = %backbone.output_shape(),
            "Built backbone"
        );
        Ok(backbone)
    }

    /// Build `model.head` on top of features of `input_shape`.
    pub fn build_head(&self, cfg: &ConfigNode, input_shape: ShapeSpec) -> Result<Box<dyn Head>, FactoryError> {
        let (name, init_args) = component_spec(cfg, "model.head")?;
        let head = self.registries.heads.build(
            name.as_deref(),
            &init_args,
            &mut self.context(input_shape),
            "model.head",
        )?;
        if head.input_shape().channels != input_shape.channels {
            return Err(FactoryError::shape_mismatch(
                head.component_name(),
                format!(
                    "head expects input {} but backbone produces {input_shape}",
                    head.input_shape()
                ),
            ));
        }
        info!(head = head.component_name(), num_classes = head.num_classes(), "Built head");
        Ok(head)
    }

    /// Build the meta-architecture named by `model.meta_architecture.name`
    /// from the whole config.
    pub fn build_model(&self, cfg: &ConfigNode) -> Result<Box<dyn MetaArchitecture>, FactoryError> {
        let name = cfg
            .get_str("model.meta_architecture.name")
            .ok_or_else(|| FactoryError::MissingField {
                path: "model.meta_architecture.name".into(),
            })?;
        info!(meta_architecture = name, "Building model from config");
        let mut ctx = self.context(Self::input_shape(cfg)?);
        self.registries
            .meta_architectures
            .build(Some(name), cfg, &mut ctx, "model.meta_architecture")
    }

    /// Build optimizer `name` (or the `_target_` in `init_args`) over `groups`.
    pub fn build_optimizer(
        &self,
        name: Option<&str>,
        init_args: &ConfigNode,
        mut groups: Vec<ParamGroup>,
    ) -> Result<Box<dyn Optimizer>, FactoryError> {
        self.registries
            .optimizers
            .build(name, init_args, &mut groups, "optimization.optimizer")
    }

    /// Build scheduler `name` against `optimizer`, capturing its base rates.
    pub fn build_scheduler(
        &self,
        name: Option<&str>,
        init_args: &ConfigNode,
        optimizer: &mut Box<dyn Optimizer>,
    ) -> Result<Box<dyn LrScheduler>, FactoryError> {
        self.registries
            .schedulers
            .build(name, init_args, optimizer, "optimization.scheduler")
    }
}
