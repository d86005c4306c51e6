//! Zero-downtime strategy.
//!
//! ```text
//! Discover → Start → AwaitReady → Cutover → Drain → Reconcile → Done
//!                        │            │
//!                        └── Abort ◄──┘   (new instance force-stopped,
//!                                          old instances untouched)
//! ```
//!
//! Old instances keep serving until the new one is ready and traffic has
//! been moved onto it.

use async_trait::async_trait;

use cutover_core::{DeploymentResult, InstanceRecord, ServiceSpec, StrategyKind};

use crate::context::DeployContext;
use crate::error::RolloutResult;
use crate::phase::{Phase, PhaseLog, ServiceReport};
use crate::steps;
use crate::strategy::Strategy;

#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroDowntime;

impl ZeroDowntime {
    /// AwaitReady and Cutover; any error here triggers an abort.
    async fn activate(
        &self,
        ctx: &DeployContext,
        service: &ServiceSpec,
        old: &[InstanceRecord],
        new: &InstanceRecord,
        phases: &mut PhaseLog,
    ) -> RolloutResult<()> {
        phases.enter(Phase::AwaitReady);
        steps::await_ready(ctx, service, new).await?;

        phases.enter(Phase::Cutover);
        steps::cutover(ctx, service, old, new).await
    }
}

#[async_trait]
impl Strategy for ZeroDowntime {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ZeroDowntime
    }

    fn zero_downtime(&self) -> bool {
        true
    }

    async fn deploy_service(&self, ctx: &DeployContext, service: &ServiceSpec) -> RolloutResult<ServiceReport> {
        let mut phases = PhaseLog::new();

        phases.enter(Phase::Discover);
        let old = steps::discover(ctx, service).await;

        phases.enter(Phase::Start);
        let new = steps::start_new(ctx, service, self.name()).await?;

        if let Err(cause) = self.activate(ctx, service, &old, &new, &mut phases).await {
            phases.enter(Phase::Aborted);
            return Err(steps::abort(ctx, service, &new, cause).await);
        }

        phases.enter(Phase::Drain);
        steps::drain(ctx, service, &old).await;

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

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{TimeDelta, Utc};
    use cutover_core::{
        cancel_pair, CancelSignal, Clock, HealthCheckKind, HealthCheckSpec, InstanceStatus, ManualClock, WorkloadPort,
    };
    use cutover_proxy::{RouterSwitch, TrafficCutover};
    use cutover_workload::MemoryWorkload;

    use crate::error::DeploymentError;

    fn ctx(workload: Arc<MemoryWorkload>) -> DeployContext {
        DeployContext::new("production", "app:v2", workload).with_clock(Arc::new(ManualClock::new()))
    }

    #[tokio::test]
    async fn cold_start_without_proxy() {
        let workload = Arc::new(MemoryWorkload::new());
        let report = ZeroDowntime
            .deploy_service(&ctx(workload.clone()), &ServiceSpec::new("web"))
            .await
            .unwrap();

        assert!(report.result.is_success());
        assert!(report.result.superseded.is_empty());
        assert_eq!(
            report.phases,
            vec![
                Phase::Discover,
                Phase::Start,
                Phase::AwaitReady,
                Phase::Cutover,
                Phase::Drain,
                Phase::Reconcile,
                Phase::Done
            ]
        );
        let new_id = report.result.new_instance.unwrap();
        assert_eq!(workload.image_of(&new_id).as_deref(), Some("app:v2"));
        assert!(workload.stop_calls().is_empty());
    }

    #[tokio::test]
    async fn switches_traffic_then_drains_old() {
        let workload = Arc::new(MemoryWorkload::new());
        let old = workload.seed_instance("web", "app:v1", InstanceStatus::Running, Utc::now() - TimeDelta::hours(1));
        let router = Arc::new(RouterSwitch::default());
        let ctx = ctx(workload.clone()).with_cutover(Some(TrafficCutover::new(router.clone())));

        let report = ZeroDowntime.deploy_service(&ctx, &ServiceSpec::new("web")).await.unwrap();

        let new_id = report.result.new_instance.clone().unwrap();
        assert_eq!(report.result.superseded, vec![old.id.clone()]);
        assert_eq!(router.router().get_backends("web")[0].instance_id, new_id);
        assert_eq!(workload.instance(&old.id).unwrap().status, InstanceStatus::Exited);
        assert_eq!(workload.instance(&new_id).unwrap().status, InstanceStatus::Running);
    }

    #[tokio::test]
    async fn unconfirmed_switch_routes_back_to_old_and_aborts() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let proxy = cutover_core::ProxyConfig {
            kind: "router".to_string(),
            domain: Some(format!("127.0.0.1:{port}")),
            ssl: false,
            health_check_path: "/".to_string(),
            verify_attempts: 2,
            verify_interval_secs: 1,
            verify_header: None,
            verify_status_min: 200,
            verify_status_max: 399,
            settings: Default::default(),
        };
        let workload = Arc::new(MemoryWorkload::new());
        let old = workload.seed_instance("web", "app:v1", InstanceStatus::Running, Utc::now() - TimeDelta::hours(1));
        let router = Arc::new(RouterSwitch::default());
        router
            .router()
            .update_service("web", vec![cutover_proxy::Backend::for_instance(&old)]);
        let cutover = TrafficCutover::new(router.clone())
            .with_verifier(cutover_proxy::Verifier::from_config(&proxy).unwrap().unwrap());
        let ctx = ctx(workload.clone()).with_cutover(Some(cutover));

        let err = ZeroDowntime
            .deploy_service(&ctx, &ServiceSpec::new("web"))
            .await
            .unwrap_err();

        assert!(matches!(err.root_cause(), DeploymentError::Cutover { .. }));
        let backends = router.router().get_backends("web");
        assert_eq!(backends.len(), 1);
        assert_eq!(backends[0].instance_id, old.id);
        assert_eq!(workload.instance(&old.id).unwrap().status, InstanceStatus::Running);
        let remaining = workload.list_all_instances("web").await.unwrap();
        assert_eq!(remaining.len(), 1);
    }

    #[tokio::test]
    async fn failed_health_check_aborts_and_leaves_old_running() {
        let workload = Arc::new(MemoryWorkload::new());
        let old = workload.seed_instance("web", "app:v1", InstanceStatus::Running, Utc::now());
        workload.set_exec_exit_code(1);
        let mut service = ServiceSpec::new("web");
        service.health_check = Some(HealthCheckSpec {
            kind: HealthCheckKind::Command {
                command: "false".to_string(),
            },
            max_attempts: 3,
            interval_secs: 1,
        });

        let err = ZeroDowntime
            .deploy_service(&ctx(workload.clone()), &service)
            .await
            .unwrap_err();

        assert!(err.is_health_check_timeout());
        let instances = workload.list_all_instances("web").await.unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].id, old.id);
        assert_eq!(instances[0].status, InstanceStatus::Running);
    }

    #[tokio::test]
    async fn start_failure_needs_no_cleanup() {
        let workload = Arc::new(MemoryWorkload::new());
        workload.fail_start(true);

        let err = ZeroDowntime
            .deploy_service(&ctx(workload.clone()), &ServiceSpec::new("web"))
            .await
            .unwrap_err();

        assert!(matches!(err, DeploymentError::Start { .. }));
        assert!(workload.stop_calls().is_empty());
    }

    #[tokio::test]
    async fn cancellation_during_wait_aborts() {
        let workload = Arc::new(MemoryWorkload::new());
        workload.set_start_status(InstanceStatus::Starting);
        let (handle, signal) = cancel_pair();
        handle.cancel();
        let ctx = ctx(workload.clone()).with_cancel(signal);

        let err = ZeroDowntime
            .deploy_service(&ctx, &ServiceSpec::new("web"))
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(workload.list_all_instances("web").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deploy_all_stops_at_first_failure() {
        let workload = Arc::new(MemoryWorkload::new());
        workload.set_exec_exit_code(1);
        let mut api = ServiceSpec::new("api");
        api.health_check = Some(HealthCheckSpec {
            kind: HealthCheckKind::Command {
                command: "false".to_string(),
            },
            max_attempts: 1,
            interval_secs: 1,
        });
        let services = vec![ServiceSpec::new("web"), api, ServiceSpec::new("worker")];

        let err = ZeroDowntime
            .deploy_all(&ctx(workload.clone()), &services)
            .await
            .unwrap_err();

        assert!(err.is_health_check_timeout());
        assert_eq!(workload.list_all_instances("web").await.unwrap().len(), 1);
        assert!(workload.list_all_instances("worker").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deadline_passed_before_service_is_cancelled() {
        let workload = Arc::new(MemoryWorkload::new());
        let clock = Arc::new(ManualClock::new());
        let deadline = clock.now();
        clock.advance(Duration::from_secs(1));
        let ctx = DeployContext::new("production", "app:v2", workload.clone())
            .with_clock(clock)
            .with_cancel(CancelSignal::never().with_deadline(deadline));

        let err = ZeroDowntime
            .deploy_all(&ctx, &[ServiceSpec::new("web")])
            .await
            .unwrap_err();

        assert!(matches!(err, DeploymentError::Cancelled { .. }));
        assert!(workload.list_all_instances("web").await.unwrap().is_empty());
    }
}
