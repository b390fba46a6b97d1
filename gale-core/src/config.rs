//! Configuration tree for gale.
//!
//! A [`ConfigNode`] is an immutable, nested `serde_json::Value` used both as
//! the blueprint for building components and as the configuration of record
//! kept by whatever was built from it. Loading uses `figment` for layered
//! configuration: defaults -> user config -> config files -> environment ->
//! explicit overrides.

use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized, Toml},
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};

/// Key naming a fully-qualified constructor path inside a config node.
pub const TARGET_KEY: &str = "_target_";

/// Config fields expanded as keyword arguments.
pub type Kwargs = Map<String, Value>;

/// Immutable nested configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigNode(Value);

impl Default for ConfigNode {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Value> for ConfigNode {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl From<Kwargs> for ConfigNode {
    fn from(fields: Kwargs) -> Self {
        Self(Value::Object(fields))
    }
}

impl fmt::Display for ConfigNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ConfigNode {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// An empty mapping.
    pub fn empty() -> Self {
        Self(Value::Object(Map::new()))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// `true` for an empty mapping or `null`.
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }

    /// Direct child value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.as_object().and_then(|map| map.get(key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Value at a dotted path such as `model.backbone.name`.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .filter(|segment| !segment.is_empty())
            .try_fold(&self.0, |value, segment| value.as_object()?.get(segment))
    }

    /// Sub-tree at a dotted path, if present and not `null`.
    pub fn node(&self, path: &str) -> Option<ConfigNode> {
        match self.lookup(path) {
            None | Some(Value::Null) => None,
            Some(value) => Some(Self(value.clone())),
        }
    }

    /// String at a dotted path; `null` reads as absent.
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.lookup(path).and_then(Value::as_str)
    }

    /// The `_target_` constructor path, when present.
    pub fn target(&self) -> Option<&str> {
        self.get(TARGET_KEY).and_then(Value::as_str)
    }

    /// Top-level fields as keyword arguments. Non-mapping nodes yield none.
    pub fn fields(&self) -> Kwargs {
        self.0.as_object().cloned().unwrap_or_default()
    }

    /// Fields without the `_target_` key.
    pub fn arguments(&self) -> Kwargs {
        let mut fields = self.fields();
        fields.remove(TARGET_KEY);
        fields
    }

    /// Returns a copy with `value` set at a dotted path, creating
    /// intermediate mappings as needed. `self` is left untouched.
    pub fn with_value(&self, path: &str, value: Value) -> ConfigNode {
        let mut root = self.0.clone();
        let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        set_path(&mut root, &segments, value);
        Self(root)
    }

    /// Deserialize the node into a typed view.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.0.clone())
    }

    /// Deserialize the sub-tree at `path`, falling back to `T::default()`
    /// when it is absent.
    pub fn section<T: DeserializeOwned + Default>(&self, path: &str) -> Result<T, serde_json::Error> {
        match self.node(path) {
            Some(node) => node.deserialize(),
            None => Ok(T::default()),
        }
    }
}

fn set_path(target: &mut Value, segments: &[&str], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *target = value;
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(map) = target {
        let child = map.entry(head.to_string()).or_insert(Value::Null);
        set_path(child, rest, value);
    }
}

/// Built-in defaults every loaded configuration starts from.
pub fn default_config() -> ConfigNode {
    ConfigNode::new(serde_json::json!({
        "input": { "channels": 3 },
        "trainer": {
            "max_epochs": null,
            "max_steps": null,
            "limit_train_batches": 1.0,
            "accumulate_grad_batches": 1,
            "gpus": 0,
            "num_processes": 1,
            "tpu_cores": null
        },
        "optimization": {
            "optimizer": { "name": null, "init_args": {} },
            "scheduler": { "name": null, "init_args": {}, "interval": "step", "monitor": null }
        }
    }))
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `GALE_`, nested with `__`)
/// 3. The given config files, later files winning (`.toml` or `.json`)
/// 4. User config (`~/.config/gale/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    files: &[PathBuf],
    overrides: Option<&ConfigNode>,
) -> Result<ConfigNode, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(default_config()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    for file in files {
        figment = merge_file(figment, file);
    }

    // GALE_TRAINER__MAX_EPOCHS=10, GALE_OPTIMIZATION__OPTIMIZER__NAME=AdamW, ...
    figment = figment.merge(Env::prefixed("GALE_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract::<Value>().map(ConfigNode).map_err(Box::new)
}

fn merge_file(figment: Figment, file: &Path) -> Figment {
    match file.extension().and_then(|ext| ext.to_str()) {
        Some("json") => figment.merge(Json::file(file)),
        _ => figment.merge(Toml::file(file)),
    }
}

/// Location of the user-level config file.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "gale", "gale")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample() -> ConfigNode {
        ConfigNode::new(json!({
            "model": {
                "backbone": { "name": "ResNetBackbone", "init_args": { "model_name": "resnet18" } }
            },
            "optimization": { "scheduler": { "init_args": { "max_iters": -1 } } }
        }))
    }

    #[test]
    fn test_lookup_dotted_path() {
        let cfg = sample();
        assert_eq!(cfg.get_str("model.backbone.name"), Some("ResNetBackbone"));
        assert_eq!(
            cfg.lookup("optimization.scheduler.init_args.max_iters"),
            Some(&json!(-1))
        );
        assert!(cfg.lookup("model.head.name").is_none());
    }

    #[test]
    fn test_with_value_is_copy_on_write() {
        let cfg = sample();
        let updated = cfg.with_value("optimization.scheduler.init_args.max_iters", json!(500));
        assert_eq!(
            updated.lookup("optimization.scheduler.init_args.max_iters"),
            Some(&json!(500))
        );
        assert_eq!(
            cfg.lookup("optimization.scheduler.init_args.max_iters"),
            Some(&json!(-1))
        );
    }

    #[test]
    fn test_with_value_creates_missing_parents() {
        let cfg = ConfigNode::empty().with_value("a.b.c", json!(true));
        assert_eq!(cfg.as_value(), &json!({ "a": { "b": { "c": true } } }));
    }

    #[test]
    fn test_arguments_strip_target() {
        let node = ConfigNode::new(json!({ "_target_": "x::Y", "lr": 0.1 }));
        assert_eq!(node.target(), Some("x::Y"));
        let args = node.arguments();
        assert_eq!(args.len(), 1);
        assert_eq!(args["lr"], json!(0.1));
    }

    #[test]
    fn test_node_treats_null_as_absent() {
        let node = ConfigNode::new(json!({ "scheduler": null }));
        assert!(node.node("scheduler").is_none());
        assert!(node.contains("scheduler"));
    }

    #[test]
    fn test_load_config_layers() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "train.toml",
                r#"
                [trainer]
                max_epochs = 10

                [optimization.optimizer]
                name = "SGD"
                "#,
            )?;
            jail.create_file("override.json", r#"{ "trainer": { "gpus": 2 } }"#)?;
            jail.set_env("GALE_OPTIMIZATION__OPTIMIZER__NAME", "AdamW");

            let cfg = load_config(
                &[PathBuf::from("train.toml"), PathBuf::from("override.json")],
                None,
            )
            .map_err(|e| e.to_string())?;

            assert_eq!(cfg.lookup("trainer.max_epochs"), Some(&json!(10)));
            assert_eq!(cfg.lookup("trainer.gpus"), Some(&json!(2)));
            assert_eq!(cfg.lookup("trainer.accumulate_grad_batches"), Some(&json!(1)));
            assert_eq!(cfg.get_str("optimization.optimizer.name"), Some("AdamW"));
            Ok(())
        });
    }

    #[test]
    fn test_load_config_explicit_overrides_win() {
        figment::Jail::expect_with(|_jail| {
            let overrides = ConfigNode::new(json!({ "input": { "channels": 1 } }));
            let cfg = load_config(&[], Some(&overrides)).map_err(|e| e.to_string())?;
            assert_eq!(cfg.lookup("input.channels"), Some(&json!(1)));
            Ok(())
        });
    }
}
