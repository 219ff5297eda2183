//! volsched CLI
//!
//! Command-line interface for running node-aware volume backups.

mod commands;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use volsched_core::{VolschedConfig, VolumeId};

/// volsched - node-aware bulk volume backup scheduler for Element clusters
#[derive(Parser, Debug)]
#[command(name = "volsched")]
#[command(
    version,
    about,
    long_about = "Backs up volumes through on-cluster bulk reads while keeping each node \
                  under its bulk job limit. Run only one volsched per cluster: node load is \
                  tracked locally and jobs started elsewhere are not taken into account."
)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "volsched.toml", global = true)]
    config: PathBuf,

    /// Log level or filter directive, overrides RUST_LOG and the config file
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Back up a list of volumes
    Run {
        /// Comma-separated volume IDs
        #[arg(
            long,
            value_delimiter = ',',
            conflicts_with = "volumes_file",
            required_unless_present = "volumes_file"
        )]
        volumes: Vec<VolumeId>,

        /// File with one volume ID per line ('#' starts a comment)
        #[arg(long)]
        volumes_file: Option<PathBuf>,

        /// Backup destination URL (overrides [backup] destination)
        #[arg(long)]
        destination: Option<String>,

        /// Cancel the run after this many seconds
        #[arg(long)]
        deadline_secs: Option<u64>,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the cluster's bulk job limit and the effective per-node limit
    Limits,

    /// Show the volume to node mapping
    Topology,

    /// Validate the configuration file and print it with secrets redacted
    CheckConfig,
}

fn init_logging(cli_level: Option<&str>, config_level: &str) {
    let filter = match cli_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config_level)),
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config = VolschedConfig::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    init_logging(cli.log_level.as_deref(), &config.logging.level);

    let ok = match cli.command {
        Commands::Run {
            volumes,
            volumes_file,
            destination,
            deadline_secs,
            json,
        } => {
            let volumes = commands::collect_volumes(volumes, volumes_file.as_deref())?;
            commands::run(&config, volumes, destination, deadline_secs, json).await?
        }
        Commands::Limits => {
            commands::limits(&config).await?;
            true
        }
        Commands::Topology => {
            commands::topology(&config).await?;
            true
        }
        Commands::CheckConfig => {
            commands::check_config(&cli.config, &config);
            true
        }
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
