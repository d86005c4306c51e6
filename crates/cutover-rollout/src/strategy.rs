//! The strategy contract and strategy selection.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, Instrument};

use cutover_core::{ServiceSpec, StrategyKind};

use crate::basic::Basic;
use crate::context::DeployContext;
use crate::error::{DeploymentError, RolloutResult};
use crate::legacy::Legacy;
use crate::phase::ServiceReport;
use crate::zero_downtime::ZeroDowntime;

/// Drives the deployment of services in an environment.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Whether old instances keep serving until the new one takes over.
    /// Informational only; the orchestrator logs it but never branches on it.
    fn zero_downtime(&self) -> bool {
        false
    }

    /// Deploy `ctx.image` for one service.
    async fn deploy_service(&self, ctx: &DeployContext, service: &ServiceSpec) -> RolloutResult<ServiceReport>;

    /// Deploy every service in declaration order, stopping at the first
    /// failure or once the run is cancelled.
    async fn deploy_all(&self, ctx: &DeployContext, services: &[ServiceSpec]) -> RolloutResult<Vec<ServiceReport>> {
        let mut reports = Vec::with_capacity(services.len());
        for service in services {
            ctx.cancel
                .check(ctx.clock.now())
                .map_err(|reason| DeploymentError::Cancelled {
                    service: service.name.clone(),
                    reason,
                })?;

            let span = tracing::info_span!(parent: &ctx.span, "service", service = %service.name, strategy = self.name());
            let report = self.deploy_service(ctx, service).instrument(span).await?;
            info!(
                parent: &ctx.span,
                service = %service.name,
                phases = %report.phase_trail(),
                "service deployed"
            );
            reports.push(report);
        }
        Ok(reports)
    }
}

/// Instantiate the strategy for `kind`.
pub fn build_strategy(kind: StrategyKind) -> Arc<dyn Strategy> {
    match kind {
        StrategyKind::ZeroDowntime => Arc::new(ZeroDowntime),
        StrategyKind::Basic => Arc::new(Basic),
        StrategyKind::Legacy => Arc::new(Legacy),
    }
}
