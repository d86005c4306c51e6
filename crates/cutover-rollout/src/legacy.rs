//! Legacy strategy: hand the whole deployment to the backend.
//!
//! For backends that deploy atomically on their own. No discovery, health
//! polling, or traffic switch happens here; the backend's per-service
//! results are passed through.

use std::slice;

use async_trait::async_trait;
use tracing::info;

use cutover_core::{DeploymentResult, ServiceSpec, StrategyKind};

use crate::context::{DeployContext, DeployMode};
use crate::error::{DeploymentError, RolloutResult};
use crate::phase::{Phase, ServiceReport};
use crate::strategy::Strategy;

#[derive(Debug, Clone, Copy, Default)]
pub struct Legacy;

impl Legacy {
    async fn delegate(&self, ctx: &DeployContext, services: &[ServiceSpec]) -> RolloutResult<Vec<ServiceReport>> {
        let (operation, outcome) = match ctx.mode {
            DeployMode::Deploy => (
                "deploy",
                ctx.workload.deploy(&ctx.image, &ctx.environment, services).await,
            ),
            DeployMode::Rollback => (
                "rollback",
                ctx.workload.rollback(&ctx.image, &ctx.environment, services).await,
            ),
        };
        let results = outcome.map_err(|source| DeploymentError::Legacy { operation, source })?;
        info!(backend = ctx.workload.name(), operation, services = results.len(), "backend deployment finished");

        results.into_iter().map(into_report).collect()
    }
}

fn into_report(result: DeploymentResult) -> RolloutResult<ServiceReport> {
    if !result.is_success() {
        return Err(DeploymentError::ServiceFailed {
            message: result.error.unwrap_or_else(|| "no detail reported".to_string()),
            service: result.service,
        });
    }
    Ok(ServiceReport {
        result,
        phases: vec![Phase::Delegated, Phase::Done],
        removed: Vec::new(),
    })
}

#[async_trait]
impl Strategy for Legacy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Legacy
    }

    async fn deploy_service(&self, ctx: &DeployContext, service: &ServiceSpec) -> RolloutResult<ServiceReport> {
        let mut reports = self.delegate(ctx, slice::from_ref(service)).await?;
        reports.pop().ok_or_else(|| DeploymentError::ServiceFailed {
            service: service.name.clone(),
            message: "backend returned no result".to_string(),
        })
    }

    /// One backend call for the whole environment.
    async fn deploy_all(&self, ctx: &DeployContext, services: &[ServiceSpec]) -> RolloutResult<Vec<ServiceReport>> {
        self.delegate(ctx, services).await
    }
}
