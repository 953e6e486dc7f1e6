//! `gmsconfig` - inspect and update the scoped GMS system configuration

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gmskube_sysconfig::central::DEFAULT_ENDPOINTS;
use gmskube_sysconfig::file::parse_properties;
use gmskube_sysconfig::{CentralRepository, CentralSettings, FileRepository, SystemConfig};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[clap(name = "gmsconfig", version, about = "Scoped GMS system configuration")]
struct Cli {
    /// Central store endpoints (`host[:port]`, comma-separated)
    #[clap(long, env = "GMS_SYSCONFIG_ENDPOINTS", default_value = DEFAULT_ENDPOINTS)]
    endpoints: String,

    /// Central store user
    #[clap(long, env = "GMS_SYSCONFIG_USER")]
    username: Option<String>,

    /// Central store password
    #[clap(long, env = "GMS_SYSCONFIG_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Property file whose values override the central store
    #[clap(long)]
    overrides: Option<PathBuf>,

    /// Enable debug logging
    #[clap(short, long, global = true)]
    verbose: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resolve a scoped key
    Get { key: String },

    /// Dump every resolved key
    Export {
        /// Print JSON instead of properties
        #[clap(long)]
        json: bool,
    },

    /// Set a literal key in the central store
    Set { key: String, value: String },

    /// Delete a literal key from the central store
    Delete { key: String },

    /// Load key/value pairs from a `.json` or property file
    Load {
        /// Delete all existing keys before loading
        #[clap(long)]
        clear: bool,

        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let settings = CentralSettings {
        endpoints: cli.endpoints,
        username: cli.username,
        password: cli.password,
    };
    let central = CentralRepository::connect(&settings)
        .await
        .context("Failed to configure central configuration repository")?;
    let overrides = cli
        .overrides
        .as_deref()
        .map(FileRepository::load)
        .transpose()?;
    let config = SystemConfig::new(central, overrides);

    match cli.command {
        Command::Get { key } => match config.get(&key).await {
            Some(value) => println!("{value}"),
            None => return Ok(ExitCode::FAILURE),
        },
        Command::Export { json } => {
            let values = config.export().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&values)?);
            } else {
                for (key, value) in &values {
                    println!("{key}={value}");
                }
            }
        }
        Command::Set { key, value } => config.central().set(&key, &value).await?,
        Command::Delete { key } => config.central().delete(&key).await?,
        Command::Load { clear, file } => {
            let values = read_values(&file)?;
            config.central().load(&values, clear).await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn read_values(path: &Path) -> Result<BTreeMap<String, String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    } else {
        Ok(parse_properties(&content))
    }
}
