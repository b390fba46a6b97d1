//! Subcommand handlers.

use crate::{Commands, ConfigAction, TrainArgs};
use anyhow::Context;
use gale_core::config::default_config;
use gale_core::optimization::{OptimizationPlan, resolve_horizons};
use gale_core::{
    ComponentBuilder, ConfigNode, DataSample, DataSource, EpochDerivation, Horizons, InMemorySource, Interval,
    OptimizationConfig, OptimizationSetup, ParamGroup, SizedSource, TrainerSettings,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Dispatch a subcommand against the layered configuration.
pub fn handle_command(command: Commands, configs: &[PathBuf]) -> anyhow::Result<()> {
    match command {
        Commands::Config { action } => handle_config(action, configs),
        Commands::Plan { train } => {
            let cfg = load(configs)?;
            let source = train_source(&train)?;
            print!("{}", render_plan(&cfg, source.as_ref())?);
            Ok(())
        }
        Commands::Schedule { train, groups, every } => {
            let cfg = load(configs)?;
            let source = train_source(&train)?;
            print!("{}", render_schedule(&cfg, source.as_ref(), groups, every)?);
            Ok(())
        }
        Commands::Registry { domain } => {
            let builder = ComponentBuilder::with_defaults()?;
            print!("{}", render_registry(&builder, domain.as_deref())?);
            Ok(())
        }
    }
}

fn load(configs: &[PathBuf]) -> anyhow::Result<ConfigNode> {
    debug!(files = ?configs, "Loading configuration");
    gale_core::load_config(configs, None).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
}

fn train_source(train: &TrainArgs) -> anyhow::Result<Box<dyn DataSource>> {
    match (&train.samples, train.dataset_len) {
        (Some(path), _) => Ok(Box::new(load_samples(path)?)),
        (None, Some(len)) => Ok(Box::new(SizedSource(len))),
        (None, None) => anyhow::bail!("either --dataset-len or --samples is required"),
    }
}

/// Read a JSON list of tagged samples (`{"type": "path", ...}` or
/// `{"type": "labeled", ...}`).
fn load_samples(path: &Path) -> anyhow::Result<InMemorySource<DataSample>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read samples from {}", path.display()))?;
    let samples: Vec<DataSample> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse samples in {}", path.display()))?;
    let source = InMemorySource::new(samples);
    for (idx, sample) in source.iter() {
        debug!(idx, sample = %sample.describe(), label = ?sample.label(), "Training sample");
    }
    let labeled = source.batches().iter().filter(|s| s.label().is_some()).count();
    info!(samples = source.len(), labeled, "Loaded training samples");
    Ok(source)
}

fn handle_config(action: ConfigAction, configs: &[PathBuf]) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init { path } => {
            if path.exists() {
                println!("Configuration file already exists at: {}", path.display());
                return Ok(());
            }
            write_default_config(&path)?;
            println!("Created default configuration at: {}", path.display());
            Ok(())
        }
        ConfigAction::Show { json } => {
            let cfg = load(configs)?;
            if json {
                println!("{}", serde_json::to_string_pretty(cfg.as_value())?);
            } else {
                println!("{}", to_toml(&cfg)?);
            }
            Ok(())
        }
    }
}

fn write_default_config(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, to_toml(&default_config())?)?;
    Ok(())
}

/// TOML has no null, so unset keys are left out.
fn to_toml(cfg: &ConfigNode) -> anyhow::Result<String> {
    Ok(toml::to_string_pretty(&strip_nulls(cfg.as_value().clone()))?)
}

fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .filter(|v| !v.is_null())
                .map(strip_nulls)
                .collect(),
        ),
        other => other,
    }
}

fn render_horizons(out: &mut String, horizons: &Horizons) -> std::fmt::Result {
    writeln!(out, "Training horizons:")?;
    writeln!(out, "  batches per epoch:       {}", horizons.steps_per_epoch)?;
    writeln!(out, "  effective batch size:    {}", horizons.effective_batch_size)?;
    writeln!(out, "  optimizer steps / epoch: {}", horizons.optimizer_steps_per_epoch())?;
    writeln!(out, "  max steps:               {}", horizons.max_steps)?;
    writeln!(out, "  max epochs:              {}", horizons.max_epochs)
}

pub(crate) fn render_plan(cfg: &ConfigNode, train: &dyn DataSource) -> anyhow::Result<String> {
    let dataset_len = train.len();
    let limits = TrainerSettings::from_config(cfg)?;
    let mut out = String::new();
    let Some(config) = OptimizationConfig::from_config(cfg)? else {
        let horizons = resolve_horizons(dataset_len, &limits, EpochDerivation::default())?;
        render_horizons(&mut out, &horizons)?;
        writeln!(out, "No optimization section configured.")?;
        return Ok(out);
    };

    let plan = OptimizationPlan::resolve(config, dataset_len, &limits)?;
    render_horizons(&mut out, &plan.horizons)?;
    let optimization = &plan.optimization;
    if optimization.optimizer.is_configured() {
        writeln!(
            out,
            "Optimizer: {} {}",
            optimization.optimizer.label(),
            optimization.optimizer.init_args
        )?;
    } else {
        writeln!(out, "Optimizer: not configured")?;
    }
    let scheduler = &optimization.scheduler;
    if scheduler.component().is_configured() {
        writeln!(
            out,
            "Scheduler: {} (interval: {}) {}",
            scheduler.component().label(),
            scheduler.interval,
            scheduler.init_args
        )?;
    } else {
        writeln!(out, "Scheduler: not configured")?;
    }
    Ok(out)
}

pub(crate) fn render_schedule(
    cfg: &ConfigNode,
    train: &dyn DataSource,
    groups: usize,
    every: u64,
) -> anyhow::Result<String> {
    let limits = TrainerSettings::from_config(cfg)?;
    let config = OptimizationConfig::from_config(cfg)?
        .ok_or_else(|| anyhow::anyhow!("no optimization section configured"))?;
    let builder = ComponentBuilder::with_defaults()?;

    let mut setup = OptimizationSetup::new();
    let horizons = setup.resolve(config, train, &limits)?;
    let groups = (0..groups.max(1))
        .map(|i| ParamGroup::new(vec![format!("group{i}.weight")]))
        .collect();
    let mut built = setup.build(&builder, groups)?;

    let Some(binding) = built.scheduler.as_ref() else {
        anyhow::bail!("no scheduler configured; learning rates stay at {:?}", built.learning_rates());
    };
    if binding.scheduler.requires_metric() {
        anyhow::bail!(
            "scheduler '{}' follows a monitored metric and has no curve to preview",
            binding.scheduler.name()
        );
    }
    let interval = binding.interval;
    let total = match interval {
        Interval::Step => horizons.max_steps,
        Interval::Epoch => horizons.max_epochs,
    };

    let every = every.max(1);
    let mut out = String::new();
    writeln!(out, "{interval}\tlearning rates")?;
    writeln!(out, "0\t{}", format_rates(&built.learning_rates()))?;
    let metrics = BTreeMap::new();
    for idx in 1..=total {
        built.step_scheduler(interval, &metrics)?;
        if idx % every == 0 || idx == total {
            writeln!(out, "{idx}\t{}", format_rates(&built.learning_rates()))?;
        }
    }
    Ok(out)
}

fn format_rates(rates: &[f64]) -> String {
    rates
        .iter()
        .map(|lr| format!("{lr:.6e}"))
        .collect::<Vec<_>>()
        .join("\t")
}

pub(crate) fn render_registry(builder: &ComponentBuilder, domain: Option<&str>) -> anyhow::Result<String> {
    let catalogue = builder.registries().catalogue();
    let selected: Vec<_> = match domain {
        Some(wanted) => catalogue.into_iter().filter(|(d, _)| *d == wanted).collect(),
        None => catalogue,
    };
    if selected.is_empty() {
        anyhow::bail!("unknown domain '{}'", domain.unwrap_or_default());
    }

    let mut out = String::new();
    for (domain, names) in selected {
        writeln!(out, "{domain} ({}):", names.len())?;
        for name in names {
            writeln!(out, "  {name}")?;
        }
    }
    Ok(out)
}
