//! netlab CLI: drive the training engine from the terminal.
//!
//! Runs synthetic training scenarios, builds confusion reports and inspects
//! recorded sessions.

mod commands;
mod scenario;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// netlab: training orchestration and evaluation
#[derive(Parser, Debug)]
#[command(name = "netlab", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run a synthetic training scenario through the controller
    Train(TrainArgs),
    /// Build a confusion report from synthetic predictions
    Evaluate {
        /// Number of classes
        #[arg(short, long, default_value = "3")]
        classes: usize,
        /// Number of samples
        #[arg(short = 'n', long, default_value = "300")]
        samples: usize,
        /// Fraction of predictions that match the true class
        #[arg(long, default_value = "0.8")]
        skill: f64,
        /// Random seed
        #[arg(long, default_value = "7")]
        seed: u64,
    },
    /// List recorded training sessions
    Sessions {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug)]
struct TrainArgs {
    /// Number of epochs (defaults to the configured value)
    #[arg(short, long)]
    epochs: Option<usize>,

    /// Batch size (defaults to the configured value)
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Validation split in [0, 1) (defaults to the configured value)
    #[arg(long)]
    validation_split: Option<f64>,

    /// Number of training samples
    #[arg(short = 'n', long, default_value = "1000")]
    samples: usize,

    /// Shape of the loss curve
    #[arg(short, long, value_enum, default_value_t = scenario::Scenario::Improving)]
    scenario: scenario::Scenario,

    /// Random seed
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Disable early stopping
    #[arg(long)]
    no_early_stopping: bool,

    /// Disable plateau learning-rate reduction
    #[arg(long)]
    no_reduce_lr: bool,

    /// Append the run to the workspace session log
    #[arg(long)]
    record: bool,

    /// Session name used with --record
    #[arg(long)]
    name: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Write a default config file to the workspace
    Init,
    /// Print the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

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

    let log_dir = directories::ProjectDirs::from("dev", "netlab", "netlab")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "netlab.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace).await
}
