use std::fmt::Write as _;
use std::path::Path;

use serde::Serialize;

use cutover_core::DeployConfig;
use cutover_deployer::EnvironmentStatus;
use cutover_ledger::{LedgerEntry, Statistics};

use super::{open_deployer, print_json, OutputFormat};

pub async fn status(config_path: &Path, environment: &str, format: OutputFormat) -> anyhow::Result<()> {
    let deployer = open_deployer(config_path)?;
    let status = deployer.status(environment).await?;
    match format {
        OutputFormat::Json => print_json(&status),
        OutputFormat::Text => {
            print!("{}", render_status(&status));
            Ok(())
        }
    }
}

#[derive(Serialize)]
struct HistoryView {
    entries: Vec<LedgerEntry>,
    statistics: Statistics,
}

pub fn history(
    config_path: &Path,
    environment: &str,
    limit: usize,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let deployer = open_deployer(config_path)?;
    let ledger = deployer.ledger();
    let view = HistoryView {
        entries: ledger.history(Some(environment), Some(limit))?,
        statistics: ledger.statistics(Some(environment))?,
    };
    match format {
        OutputFormat::Json => print_json(&view),
        OutputFormat::Text => {
            print!("{}", render_history(environment, &view.entries, &view.statistics));
            Ok(())
        }
    }
}

pub fn config(config_path: &Path) -> anyhow::Result<()> {
    let config = DeployConfig::from_file(config_path)?;
    print_json(&config)
}

pub fn version() {
    println!("cutover {}", env!("CARGO_PKG_VERSION"));
}

fn render_status(status: &EnvironmentStatus) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Environment: {} ({})", status.environment, status.provider);
    for service in &status.services {
        let _ = writeln!(out, "  {}", service.service);
        if service.instances.is_empty() {
            let _ = writeln!(out, "    (no instances)");
        }
        for inst in &service.instances {
            let _ = writeln!(
                out,
                "    {:<20} {:<10} {}  {}",
                inst.id,
                inst.status.to_string(),
                inst.created_at.to_rfc3339(),
                inst.address
            );
        }
    }
    match &status.traffic {
        Some(traffic) => {
            let _ = writeln!(out, "Traffic: {} ({})", traffic.kind, traffic.status);
            for (service, upstreams) in &traffic.upstreams {
                let _ = writeln!(out, "  {service} → {}", upstreams.join(", "));
            }
        }
        None => {
            let _ = writeln!(out, "Traffic: no proxy configured");
        }
    }
    out
}

fn render_history(environment: &str, entries: &[LedgerEntry], stats: &Statistics) -> String {
    let mut out = String::new();
    if entries.is_empty() {
        let _ = writeln!(out, "No deployments recorded for {environment}");
    }
    for entry in entries {
        let _ = write!(
            out,
            "{}  {:<8} {:<14} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.status.to_string(),
            entry.strategy,
            entry.image
        );
        if let Some(error) = &entry.error {
            let _ = write!(out, "  ({error})");
        }
        out.push('\n');
    }
    let _ = writeln!(
        out,
        "\n{} deployments: {} successful, {} failed, {} started ({:.2}% success)",
        stats.total, stats.successful, stats.failed, stats.started, stats.success_rate
    );
    out
}
