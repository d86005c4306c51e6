use std::fmt::Write as _;
use std::path::Path;

use tracing::warn;

use cutover_core::{cancel_pair, CancelSignal, StrategyKind};
use cutover_deployer::DeployReport;

use super::{open_deployer, print_json, OutputFormat};

pub async fn deploy(
    config_path: &Path,
    environment: &str,
    image: &str,
    strategy: Option<StrategyKind>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let deployer = open_deployer(config_path)?;
    let report = deployer
        .deploy_with_cancel(environment, image, strategy, cancel_on_interrupt())
        .await?;
    print_report(&report, format)
}

pub async fn rollback(
    config_path: &Path,
    environment: &str,
    version: &str,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let deployer = open_deployer(config_path)?;
    let report = deployer
        .rollback_with_cancel(environment, version, cancel_on_interrupt())
        .await?;
    print_report(&report, format)
}

/// Ctrl-C cancels the run; the in-flight service aborts and is recorded as failed.
fn cancel_on_interrupt() -> CancelSignal {
    let (handle, signal) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling deployment");
            handle.cancel();
        }
    });
    signal
}

fn print_report(report: &DeployReport, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Text => {
            print!("{}", render_report(report));
            Ok(())
        }
    }
}

pub fn render_report(report: &DeployReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "✓ Deployed {} to {} ({})",
        report.image, report.environment, report.strategy
    );
    for service in &report.services {
        let result = &service.result;
        let _ = writeln!(
            out,
            "  {:<16} {}",
            result.service,
            result.new_instance.as_deref().unwrap_or("-")
        );
        if !result.superseded.is_empty() {
            let _ = writeln!(out, "    replaced: {}", result.superseded.join(", "));
        }
        if !service.removed.is_empty() {
            let _ = writeln!(out, "    removed:  {}", service.removed.join(", "));
        }
        let _ = writeln!(out, "    phases:   {}", service.phase_trail());
    }
    out
}
