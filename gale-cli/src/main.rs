//! Gale CLI: inspect training configuration, resolved horizons, learning-rate
//! curves and the component registries.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Gale: configuration-driven training orchestration
#[derive(Parser, Debug)]
#[command(name = "gale", version, about, long_about = None)]
struct Cli {
    /// Configuration files (`.toml` or `.json`), later files win
    #[arg(short, long = "config", global = true)]
    configs: Vec<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum Commands {
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Resolve training horizons for a dataset and show the filled scheduler arguments
    Plan {
        #[command(flatten)]
        train: TrainArgs,
    },
    /// Build the configured optimizer and scheduler and print the learning-rate curve
    Schedule {
        #[command(flatten)]
        train: TrainArgs,
        /// Number of parameter groups handed to the optimizer
        #[arg(short, long, default_value = "1")]
        groups: usize,
        /// Print every n-th scheduler step
        #[arg(short, long, default_value = "1")]
        every: u64,
    },
    /// List registered components
    Registry {
        /// Only list this domain (backbone, head, meta-architecture, optimizer, scheduler, activation)
        domain: Option<String>,
    },
}

/// Where the training batches of one epoch come from.
#[derive(clap::Args, Debug)]
#[group(required = true, multiple = false)]
pub(crate) struct TrainArgs {
    /// Number of training batches per epoch
    #[arg(short, long)]
    pub dataset_len: Option<usize>,
    /// JSON list of training samples, one batch each
    #[arg(short, long)]
    pub samples: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Write the built-in defaults to a TOML file
    Init {
        /// Destination file
        #[arg(default_value = "gale.toml")]
        path: PathBuf,
    },
    /// Show the merged configuration
    Show {
        /// Print JSON instead of TOML
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "gale", "gale")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "gale.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    commands::handle_command(cli.command, &cli.configs)
}
