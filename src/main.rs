//! # Faithful CNF CLI
//!
//! Command-line interface for training structure-faithful flows.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use faithful_cnf::prelude::*;

/// Structure-faithful continuous normalizing flows
#[derive(Parser)]
#[command(name = "faithful_cnf")]
#[command(version)]
#[command(about = "Amortized inference in graphical models with continuous normalizing flows")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a flow against a target model
    Train {
        /// Configuration file (JSON); defaults are used when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Target model identifier
        #[arg(short, long)]
        model: Option<String>,

        /// Connectivity mode
        #[arg(long)]
        connectivity: Option<String>,

        /// Loss choice
        #[arg(short, long)]
        loss: Option<String>,

        /// Number of training steps
        #[arg(short, long)]
        steps: Option<usize>,

        /// Random seed
        #[arg(long)]
        seed: Option<u64>,

        /// Directory for checkpoints and the final configuration
        #[arg(short, long, default_value = "runs")]
        output: PathBuf,
    },

    /// Print the first-layer weight mask of a model
    Mask {
        /// Target model identifier
        #[arg(short, long, default_value = "gaussian_bn")]
        model: String,

        /// Connectivity mode
        #[arg(long, default_value = "faithful")]
        connectivity: String,

        /// Latent dimensions to augment (comma-separated)
        #[arg(long, value_delimiter = ',')]
        augment: Vec<usize>,

        /// Random seed (random adjacency)
        #[arg(long, default_value = "0")]
        seed: u64,
    },

    /// Write the default configuration
    Config {
        /// Output file
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            config,
            model,
            connectivity,
            loss,
            steps,
            seed,
            output,
        } => {
            let mut config = match config {
                Some(path) => ExperimentConfig::load(&path)
                    .with_context(|| format!("failed to load {}", path.display()))?,
                None => ExperimentConfig::default(),
            };
            if let Some(model) = model {
                config.model = model;
            }
            if let Some(connectivity) = connectivity {
                config.connectivity = connectivity;
            }
            if let Some(loss) = loss {
                config.loss_choice = loss;
            }
            if let Some(steps) = steps {
                config.train_steps = steps;
            }
            if let Some(seed) = seed {
                config.seed = seed;
            }
            train(&config, output)?;
        }
        Commands::Mask {
            model,
            connectivity,
            augment,
            seed,
        } => {
            print_mask(&model, &connectivity, augment, seed)?;
        }
        Commands::Config { output } => {
            ExperimentConfig::default().save(&output)?;
            info!("Default configuration written to {}", output.display());
        }
    }

    Ok(())
}

fn train(config: &ExperimentConfig, output: PathBuf) -> Result<()> {
    fs::create_dir_all(&output)
        .with_context(|| format!("failed to create {}", output.display()))?;
    config.save(output.join("config.json"))?;

    let mut experiment = Experiment::setup(config)?;
    experiment.set_checkpoint_dir(&output);

    let summary = experiment.run(&mut TracingSink)?;

    println!("\nTraining finished after {} steps", summary.steps);
    println!("  forward KL:       {:.6}", summary.forward_kl);
    println!("  reverse KL:       {:.6}", summary.reverse_kl);
    println!("  moving sym. KL:   {:.6}", summary.moving_sym_kl);
    if let Some(path) = summary.final_checkpoint {
        println!("  final checkpoint: {}", path.display());
    }

    Ok(())
}

fn print_mask(model: &str, connectivity: &str, augment: Vec<usize>, seed: u64) -> Result<()> {
    let kind: ModelKind = model.parse()?;
    let connectivity: Connectivity = connectivity.parse()?;
    let mut rng = StdRng::seed_from_u64(seed);

    let mut target = kind.build(&mut rng)?;
    if !augment.is_empty() {
        target = Box::new(AugmentedModel::new(target, augment)?);
    }

    let network = connectivity.build_network(target.as_ref(), MaskPolicy::FirstLayer, &mut rng)?;
    let first = &network.layers()[0];

    println!(
        "{} ({} latent, {} observed), {} connectivity",
        target.name(),
        target.dim_latent(),
        target.dim_condition(),
        connectivity
    );
    match first.mask() {
        Some(mask) => {
            println!("{} of {} weights active", mask.active_count(), mask.dim_in() * mask.dim_out());
            println!("{}", mask);
        }
        None => println!("dense first layer, no mask"),
    }

    Ok(())
}
