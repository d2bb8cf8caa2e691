//! mrclass CLI
//!
//! Trains an MR sequence classifier and runs batch inference, both driven by
//! a TOML configuration file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use mrclass::backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
use mrclass::config::AppConfig;
use mrclass::utils::logging::{init_logging, LogConfig};

/// MR image classification with Burn
#[derive(Parser, Debug)]
#[command(name = "mrclass")]
#[command(version)]
#[command(about = "Train and run an MR image classifier", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train a classifier and save the best checkpoint
    Train {
        /// Path to the TOML configuration file
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Classify the images of the configured input directory
    Infer {
        /// Path to the TOML configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };

    let _ = init_logging(&log_config);

    print_banner();
    info!("Backend: {}", backend_name());

    match cli.command {
        Commands::Train { config } => {
            let config = load_config(&config)?;
            let summary = mrclass::training::train::<TrainingBackend>(&config, &default_device())
                .context("Training failed")?;

            println!();
            println!("{}", "Training Complete!".green().bold());
            println!(
                "  Best validation accuracy: {:.2}%",
                summary.outcome.best_acc * 100.0
            );
            println!("  Epochs run: {}", summary.outcome.epochs_run);
            if summary.outcome.stopped_early {
                println!("  {}", "Stopped early".yellow());
            }
            println!("  Saved to: {:?}", summary.checkpoint);
        }

        Commands::Infer { config } => {
            let config = load_config(&config)?;
            let predictions = mrclass::inference::infer::<DefaultBackend>(&config, &default_device())
                .context("Inference failed")?;

            println!();
            for p in &predictions {
                println!(
                    "  {} -> {} ({:.1}%)",
                    p.path.display(),
                    p.class_name.cyan(),
                    p.confidence * 100.0
                );
            }
        }
    }

    println!("{}", "Done".green().bold());
    Ok(())
}

fn load_config(path: &Path) -> Result<AppConfig> {
    info!("Loading configuration from {:?}", path);
    AppConfig::load(path).with_context(|| format!("Invalid configuration {}", path.display()))
}

fn print_banner() {
    println!(
        "{}",
        r#"
 +------------------------------------------------+
 |   mrclass                                      |
 |   MR sequence classification with Burn + Rust  |
 +------------------------------------------------+
  "#
        .green()
    );
}
