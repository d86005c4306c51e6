//! Basic strategy: stop everything, then start the new version.
//!
//! No overlap and no traffic switch. The service is down from the first
//! stop until the new instance is ready.

use async_trait::async_trait;
use tracing::info;

use cutover_core::{DeploymentResult, ServiceSpec, StrategyKind};

use crate::context::DeployContext;
use crate::error::RolloutResult;
use crate::phase::{Phase, PhaseLog, ServiceReport};
use crate::steps;
use crate::strategy::Strategy;

#[derive(Debug, Clone, Copy, Default)]
pub struct Basic;

#[async_trait]
impl Strategy for Basic {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Basic
    }

    async fn deploy_service(&self, ctx: &DeployContext, service: &ServiceSpec) -> RolloutResult<ServiceReport> {
        let mut phases = PhaseLog::new();

        phases.enter(Phase::Discover);
        let old = steps::discover(ctx, service).await;

        phases.enter(Phase::Drain);
        let stopped = steps::drain(ctx, service, &old).await;
        if !old.is_empty() {
            info!(service = %service.name, stopped, total = old.len(), "old instances stopped, service is down");
        }

        phases.enter(Phase::Start);
        let new = steps::start_new(ctx, service, self.name()).await?;

        phases.enter(Phase::AwaitReady);
        if let Err(cause) = steps::await_ready(ctx, service, &new).await {
            phases.enter(Phase::Aborted);
            return Err(steps::abort(ctx, service, &new, cause).await);
        }

        phases.enter(Phase::Reconcile);
        let removed = steps::reconcile(ctx, service, &new.id).await;

        phases.enter(Phase::Done);
        Ok(ServiceReport {
            result: DeploymentResult::success(
                &service.name,
                old.into_iter().map(|i| i.id).collect(),
                Some(new.id),
            ),
            phases: phases.into_vec(),
            removed,
        })
    }
}
