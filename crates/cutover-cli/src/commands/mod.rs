use std::path::Path;

use clap::ValueEnum;
use tracing::debug;

use cutover_core::DeployConfig;
use cutover_deployer::Deployer;
use cutover_ledger::Ledger;

pub mod deploy;
pub mod inspect;

/// How command results are printed on stdout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Load the configuration and open its ledger.
pub fn open_deployer(config_path: &Path) -> anyhow::Result<Deployer> {
    let config = DeployConfig::from_file(config_path)?;
    let ledger = Ledger::open(&config.ledger_path);
    debug!(ledger = %config.ledger_path.display(), "deployer ready");
    Ok(Deployer::new(config, ledger))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
