//! cutover — deploy container images to configured environments.
//!
//! # Usage
//!
//! ```text
//! cutover deploy production registry.local/app:v2
//! cutover rollback production registry.local/app:v1
//! cutover history production --limit 5
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use cutover_core::{ConfigError, StrategyKind};

mod commands;

use commands::OutputFormat;

const DEFAULT_LOG_FILTER: &str = "info,cutover=info";

#[derive(Parser)]
#[command(
    name = "cutover",
    about = "cutover — zero-downtime container deployments",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Configuration file.
    #[arg(long, global = true, env = "CUTOVER_CONFIG", default_value = "cutover.toml")]
    config: PathBuf,

    /// Log line format (logs go to stderr).
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy an image to every service of an environment.
    Deploy {
        environment: String,
        image: String,
        /// Override the environment's strategy (zero_downtime, basic, legacy).
        #[arg(short, long, value_parser = parse_strategy)]
        strategy: Option<StrategyKind>,
        #[arg(short, long, value_enum, default_value_t)]
        format: OutputFormat,
    },
    /// Redeploy a previously deployed version.
    Rollback {
        environment: String,
        version: String,
        #[arg(short, long, value_enum, default_value_t)]
        format: OutputFormat,
    },
    /// Show instances and traffic routing for an environment.
    Status {
        environment: String,
        #[arg(short, long, value_enum, default_value_t)]
        format: OutputFormat,
    },
    /// Show recent deployments and statistics.
    History {
        environment: String,
        #[arg(short, long, default_value = "10")]
        limit: usize,
        #[arg(short, long, value_enum, default_value_t)]
        format: OutputFormat,
    },
    /// Print the normalized configuration as JSON.
    Config,
    /// Print the version.
    Version,
}

fn parse_strategy(s: &str) -> Result<StrategyKind, ConfigError> {
    s.parse()
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.config;
    match cli.command {
        Commands::Deploy {
            environment,
            image,
            strategy,
            format,
        } => commands::deploy::deploy(&config, &environment, &image, strategy, format).await,
        Commands::Rollback {
            environment,
            version,
            format,
        } => commands::deploy::rollback(&config, &environment, &version, format).await,
        Commands::Status { environment, format } => {
            commands::inspect::status(&config, &environment, format).await
        }
        Commands::History {
            environment,
            limit,
            format,
        } => commands::inspect::history(&config, &environment, limit, format),
        Commands::Config => commands::inspect::config(&config),
        Commands::Version => {
            commands::inspect::version();
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("✗ {e}");
            ExitCode::FAILURE
        }
    }
}
