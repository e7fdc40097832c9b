//! Kubernetes Opex Analytics CLI
//!
//! A command-line tool for browsing the node snapshot, usage trends and
//! cost histograms published by the opex agent.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::usage::{Period, Resource};
use commands::{nodes, status, usage};

/// Kubernetes Opex Analytics CLI
#[derive(Parser)]
#[command(name = "koa")]
#[command(author, version, about = "CLI for Kubernetes Opex Analytics", long_about = None)]
pub struct Cli {
    /// Agent API URL (can also be set via KOA_API_URL or `koa config set-url`)
    #[arg(long, env = "KOA_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the last node snapshot
    Nodes,

    /// Show hourly usage per namespace over the last 7 days
    Trends {
        /// Resource to show
        #[arg(long, short, value_enum, default_value = "cpu")]
        resource: Resource,
    },

    /// Show daily or monthly usage per namespace under the cost model
    Usage {
        /// Histogram period
        #[arg(long, short, value_enum, default_value = "14d")]
        period: Period,

        /// Resource to show
        #[arg(long, short, value_enum, default_value = "cpu")]
        resource: Resource,

        /// Show requests instead of usage
        #[arg(long)]
        requests: bool,

        /// Only show this namespace
        #[arg(long, short)]
        namespace: Option<String>,
    },

    /// Show agent health and readiness
    Health,

    /// List exported datasets and the cost settings
    Datasets,

    /// Manage CLI configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Save the agent API URL
    SetUrl {
        /// Agent API URL, e.g. http://localhost:5483
        url: String,
    },

    /// Show the effective configuration
    Show,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let file_config = config::Config::load()?;
    let api_url = config::resolve_api_url(cli.api_url.as_deref(), &file_config);

    if let Commands::Config(config_cmd) = &cli.command {
        match config_cmd {
            ConfigCommands::SetUrl { url } => status::set_api_url(url)?,
            ConfigCommands::Show => {
                println!("Config file: {}", config::Config::config_path()?.display());
                println!("API URL:     {}", api_url);
            }
        }
        return Ok(());
    }

    // Initialize client
    let client = client::ApiClient::new(&api_url)?;

    // Execute command
    match cli.command {
        Commands::Nodes => nodes::show_nodes(&client, cli.format).await?,
        Commands::Trends { resource } => usage::show_trends(&client, resource, cli.format).await?,
        Commands::Usage {
            period,
            resource,
            requests,
            namespace,
        } => {
            usage::show_usage(&client, resource, period, requests, namespace, cli.format).await?;
        }
        Commands::Health => status::show_health(&client, cli.format).await?,
        Commands::Datasets => status::show_datasets(&client, cli.format).await?,
        Commands::Config(_) => {}
    }

    Ok(())
}
