//! sondar CLI — operator tooling for the adaptive testing engine.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "sondar", version, about = "Adaptive psychometric testing engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate adaptive sessions against a synthetic respondent
    Simulate {
        /// Path to a questionnaire bank TOML file
        #[arg(long)]
        bank: PathBuf,

        /// True latent trait of the synthetic respondent
        #[arg(long, default_value = "0.0")]
        true_theta: f64,

        /// RNG seed for reproducible runs
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Number of sessions to simulate
        #[arg(long, default_value = "1")]
        sessions: usize,

        /// Engine config TOML (defaults used when absent)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Validate questionnaire bank TOML files
    Validate {
        /// Path to a bank file or directory
        #[arg(long)]
        bank: PathBuf,
    },

    /// Create starter config and example bank
    Init,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sondar_core=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Simulate {
            bank,
            true_theta,
            seed,
            sessions,
            config,
        } => commands::simulate::execute(bank, true_theta, seed, sessions, config).await,
        Commands::Validate { bank } => commands::validate::execute(bank),
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
