//! mqmesh CLI
//!
//! Plans and simulates multi-region broker cluster topologies.
//!
//! # Usage
//!
//! ```bash
//! mqmesh plan
//! mqmesh --config cluster.toml plan --format json
//! mqmesh --region northeurope --region westeurope plan
//! mqmesh simulate --seed 7
//! mqmesh validate
//! ```

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod output;

#[derive(Parser)]
#[command(name = "mqmesh")]
#[command(version)]
#[command(about = "Multi-region broker cluster topology planner", long_about = None)]
struct Cli {
    /// Cluster config file (TOML, or YAML by extension)
    #[arg(long, short, env = "MQMESH_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured regions, in order
    #[arg(long = "region")]
    regions: Vec<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    format: output::OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synthesize the topology and print the creation plan
    Plan {
        /// Handlebars template to render the plan with instead of the built-in one
        #[arg(long)]
        template: Option<PathBuf>,
    },
    /// Apply the plan against the in-process provisioner
    Simulate {
        /// Seed for generated values; random when omitted
        #[arg(long)]
        seed: Option<u64>,
        /// Make creation of this resource fail
        #[arg(long)]
        fail_on: Vec<String>,
    },
    /// Check the configuration and the synthesized graph
    Validate,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let result = match config::load(cli.config.as_deref(), &cli.regions) {
        Ok(cluster) => match cli.command {
            Commands::Plan { template } => commands::plan::handle(&cluster, template.as_deref(), cli.format),
            Commands::Simulate { seed, fail_on } => {
                commands::simulate::handle(&cluster, seed, fail_on, cli.format).await
            }
            Commands::Validate => commands::validate::handle(&cluster, cli.format),
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}
