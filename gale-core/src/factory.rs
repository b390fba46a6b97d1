//! Configurable factory: builds component instances from config nodes.
//!
//! A config node either names a fully-qualified constructor path under
//! `_target_` (handed to an [`Injector`]), or is passed to the registered
//! [`Constructor`] in the argument shape that constructor declares. Every
//! instance built here keeps the node it came from as its configuration of
//! record.

use crate::config::{ConfigNode, Kwargs};
use crate::error::{FactoryError, RegistryError};
use crate::registry::Registry;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

/// How a constructor wants its configuration handed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentShape {
    /// The node as one structured argument.
    Structured,
    /// The node's fields expanded into keyword arguments.
    Keyword,
}

/// A registered constructor for `T`, taking domain extras `X`
/// (input shape, parameter groups, the optimizer to schedule, ...).
pub enum Constructor<T, X: ?Sized> {
    Structured(fn(&ConfigNode, &mut X) -> Result<T, FactoryError>),
    Keyword(fn(Kwargs, &mut X) -> Result<T, FactoryError>),
}

impl<T, X: ?Sized> Clone for Constructor<T, X> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, X: ?Sized> Copy for Constructor<T, X> {}

impl<T, X: ?Sized> std::fmt::Debug for Constructor<T, X> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Constructor::{:?}", self.shape())
    }
}

impl<T, X: ?Sized> Constructor<T, X> {
    pub fn shape(&self) -> ArgumentShape {
        match self {
            Self::Structured(_) => ArgumentShape::Structured,
            Self::Keyword(_) => ArgumentShape::Keyword,
        }
    }

    /// Invoke with `cfg` in whichever shape this constructor accepts.
    pub fn call(&self, cfg: &ConfigNode, extras: &mut X) -> Result<T, FactoryError> {
        match self {
            Self::Structured(build) => build(cfg, extras),
            Self::Keyword(build) => build(cfg.arguments(), extras),
        }
    }
}

/// The configuration an instance was built from, set at most once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigRecord {
    node: Option<ConfigNode>,
}

impl ConfigRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<&ConfigNode> {
        self.node.as_ref()
    }

    pub fn is_attached(&self) -> bool {
        self.node.is_some()
    }

    /// Attach `cfg` unless a record already exists. Returns whether it was
    /// attached.
    pub fn attach(&mut self, cfg: ConfigNode) -> bool {
        if self.node.is_some() {
            return false;
        }
        self.node = Some(cfg);
        true
    }
}

/// Anything that can carry a configuration of record.
pub trait Configurable {
    fn config_record(&self) -> &ConfigRecord;

    fn config_record_mut(&mut self) -> &mut ConfigRecord;

    fn component_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// The configuration of record. Fails for instances that were not built
    /// through the factory and never had one attached.
    fn to_config(&self) -> Result<&ConfigNode, FactoryError> {
        self.config_record()
            .get()
            .ok_or_else(|| FactoryError::NotConfigured {
                component: self.component_name().to_string(),
            })
    }
}

impl<C: Configurable + ?Sized> Configurable for Box<C> {
    fn config_record(&self) -> &ConfigRecord {
        (**self).config_record()
    }

    fn config_record_mut(&mut self) -> &mut ConfigRecord {
        (**self).config_record_mut()
    }

    fn component_name(&self) -> &'static str {
        (**self).component_name()
    }
}

/// Dependency-injection collaborator: builds an instance from a
/// fully-qualified constructor path and a flat argument set.
pub trait Injector<T, X: ?Sized> {
    fn instantiate(&self, target: &str, args: Kwargs, extras: &mut X) -> Result<T, FactoryError>;
}

/// An [`Injector`] backed by constructors registered under their type path.
#[derive(Debug)]
pub struct PathInjector<T, X: ?Sized> {
    constructors: Registry<Constructor<T, X>>,
}

impl<T, X: ?Sized> PathInjector<T, X> {
    pub fn new(domain: &'static str) -> Self {
        Self {
            constructors: Registry::new(domain),
        }
    }

    /// Register `constructor` under the fully-qualified path of `C`.
    pub fn register_type<C: ?Sized>(&mut self, constructor: Constructor<T, X>) -> Result<(), RegistryError> {
        self.register_path(class_path::<C>(), constructor)
    }

    /// Register `constructor` under an explicit path, for constructors that
    /// are functions rather than types.
    pub fn register_path(
        &mut self,
        path: impl Into<String>,
        constructor: Constructor<T, X>,
    ) -> Result<(), RegistryError> {
        self.constructors.register(path, constructor)
    }

    pub fn paths(&self) -> Vec<String> {
        self.constructors.names()
    }

    pub fn contains_path(&self, path: &str) -> bool {
        self.constructors.contains(path)
    }
}

impl<T, X: ?Sized> Injector<T, X> for PathInjector<T, X> {
    fn instantiate(&self, target: &str, args: Kwargs, extras: &mut X) -> Result<T, FactoryError> {
        let constructor =
            self.constructors
                .get(target)
                .map_err(|source| FactoryError::UnknownTarget {
                    target: target.to_string(),
                    source,
                })?;
        debug!(target = %target, "Instantiating from constructor path");
        match constructor {
            Constructor::Structured(build) => build(&ConfigNode::from(args), extras),
            Constructor::Keyword(build) => build(args, extras),
        }
    }
}

/// Fully-qualified type path of `C`, the key used for `_target_` lookups.
pub fn class_path<C: ?Sized>() -> &'static str {
    std::any::type_name::<C>()
}

/// Build an instance of `T` from `cfg`.
///
/// A `_target_` in `cfg` takes precedence over `constructor` and is resolved
/// through `injector`. The built instance gets `cfg` attached as its
/// configuration of record unless it already carries one.
pub fn from_config<T, X>(
    constructor: &Constructor<T, X>,
    cfg: &ConfigNode,
    extras: &mut X,
    injector: Option<&dyn Injector<T, X>>,
) -> Result<T, FactoryError>
where
    T: Configurable,
    X: ?Sized,
{
    let instance = match cfg.target() {
        Some(target) => {
            let injector = injector.ok_or_else(|| FactoryError::NoInjector {
                target: target.to_string(),
            })?;
            injector.instantiate(target, cfg.arguments(), extras)?
        }
        None => constructor.call(cfg, extras)?,
    };
    Ok(with_record(instance, cfg))
}

/// Build an instance of `T` purely from the `_target_` path in `cfg`.
pub fn from_target<T, X>(
    cfg: &ConfigNode,
    extras: &mut X,
    injector: &dyn Injector<T, X>,
) -> Result<T, FactoryError>
where
    T: Configurable,
    X: ?Sized,
{
    let target = cfg.target().ok_or_else(|| FactoryError::MissingField {
        path: crate::config::TARGET_KEY.to_string(),
    })?;
    let instance = injector.instantiate(target, cfg.arguments(), extras)?;
    Ok(with_record(instance, cfg))
}

fn with_record<T: Configurable>(mut instance: T, cfg: &ConfigNode) -> T {
    if instance.config_record_mut().attach(cfg.clone()) {
        debug!(component = instance.component_name(), "Attached configuration of record");
    }
    instance
}

/// Deserialize keyword arguments into a constructor's argument struct.
pub fn parse_kwargs<A: DeserializeOwned>(component: &str, kwargs: Kwargs) -> Result<A, FactoryError> {
    serde_json::from_value(Value::Object(kwargs))
        .map_err(|e| FactoryError::invalid_arguments(component, e.to_string()))
}
