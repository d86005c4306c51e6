//! Building blocks shared by the strategies.
//!
//! Discover, drain, and reconcile are partial-failure tolerant: they log
//! and carry on. Start, await-ready, and cutover return errors that the
//! calling strategy turns into an abort.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use cutover_core::*;
use cutover_health::{PollOutcome, RetryPolicy};
use cutover_proxy::SwitchError;

use crate::context::DeployContext;
use crate::error::{DeploymentError, RolloutResult};

/// Slack on top of a drain timeout before a stop call is abandoned.
pub const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Instances currently serving `service`. Enumeration failure counts as
/// a cold start.
pub async fn discover(ctx: &DeployContext, service: &ServiceSpec) -> Vec<InstanceRecord> {
    match ctx.workload.list_running_instances(&service.name).await {
        Ok(instances) => {
            debug!(service = %service.name, count = instances.len(), "discovered running instances");
            instances
        }
        Err(e) => {
            warn!(service = %service.name, error = %e, "could not list running instances, treating as cold start");
            Vec::new()
        }
    }
}

/// Launch configuration for a new instance of `service`.
pub fn launch_spec(ctx: &DeployContext, service: &ServiceSpec, strategy: &str) -> LaunchSpec {
    let deployed_at = Utc::now();
    let stamp = deployed_at.format("%Y%m%d%H%M%S%3f").to_string();
    let deployed_at = deployed_at.to_rfc3339();

    let mut env = service.env.clone();
    env.insert("SERVICE".to_string(), service.name.clone());
    env.insert("ENVIRONMENT".to_string(), ctx.environment.clone());
    env.insert("DEPLOYED_AT".to_string(), deployed_at.clone());

    let mut labels = service.labels.clone();
    labels.insert(LABEL_SERVICE.to_string(), service.name.clone());
    labels.insert(LABEL_ENVIRONMENT.to_string(), ctx.environment.clone());
    labels.insert(LABEL_STRATEGY.to_string(), strategy.to_string());
    labels.insert(LABEL_DEPLOYED_AT.to_string(), deployed_at);

    LaunchSpec {
        service: service.name.clone(),
        name: format!("{}-{}-{stamp}", service.name, ctx.environment),
        image: ctx.image.clone(),
        ports: service.ports.clone(),
        env,
        volumes: service.volumes.clone(),
        command: service.command.clone(),
        labels,
        restart: service.restart,
    }
}

pub async fn start_new(
    ctx: &DeployContext,
    service: &ServiceSpec,
    strategy: &str,
) -> RolloutResult<InstanceRecord> {
    let spec = launch_spec(ctx, service, strategy);
    let instance = ctx
        .workload
        .start_instance(&spec)
        .await
        .map_err(|source| DeploymentError::Start {
            service: service.name.clone(),
            source,
        })?;
    info!(service = %service.name, instance = %instance.id, image = %ctx.image, "new instance started");
    Ok(instance)
}

/// Wait until `instance` is ready. Returns the number of probes it took.
///
/// With a health check the checker is polled under the check's attempt
/// budget and the environment's hard health timeout; without one the raw
/// runtime status is polled until it is up or the startup timeout passes.
pub async fn await_ready(
    ctx: &DeployContext,
    service: &ServiceSpec,
    instance: &InstanceRecord,
) -> RolloutResult<u32> {
    let clock = ctx.clock.as_ref();
    let start = clock.now();

    let outcome = match &service.health_check {
        Some(check) => {
            let policy = RetryPolicy::for_health_check(check, ctx.health_timeout);
            debug!(service = %service.name, kind = check.kind.name(), ?policy, "awaiting health check");
            policy
                .poll(clock, &ctx.cancel, |attempt| async move {
                    let result = ctx.checker.check(instance, check).await;
                    debug!(instance = %instance.id, attempt, ?result, "health probe");
                    result.is_healthy()
                })
                .await
        }
        None => {
            let policy = RetryPolicy::for_startup(ctx.startup_timeout);
            policy
                .poll(clock, &ctx.cancel, |attempt| async move {
                    match ctx.workload.instance_status(&instance.id).await {
                        Ok(status) => {
                            debug!(instance = %instance.id, attempt, %status, "startup probe");
                            status.is_up()
                        }
                        Err(e) => {
                            debug!(instance = %instance.id, attempt, error = %e, "status lookup failed");
                            false
                        }
                    }
                })
                .await
        }
    };

    match outcome {
        PollOutcome::Ready { attempts } => {
            info!(service = %service.name, instance = %instance.id, attempts, "instance ready");
            Ok(attempts)
        }
        PollOutcome::Exhausted { attempts } => Err(DeploymentError::HealthCheckTimeout {
            service: service.name.clone(),
            attempts,
            elapsed: clock.now().saturating_duration_since(start),
        }),
        PollOutcome::TimedOut { attempts, elapsed } => Err(DeploymentError::HealthCheckTimeout {
            service: service.name.clone(),
            attempts,
            elapsed,
        }),
        PollOutcome::Interrupted { reason, .. } => Err(DeploymentError::Cancelled {
            service: service.name.clone(),
            reason,
        }),
    }
}

/// Route traffic from `old` to `new`, if the environment has a switch.
pub async fn cutover(
    ctx: &DeployContext,
    service: &ServiceSpec,
    old: &[InstanceRecord],
    new: &InstanceRecord,
) -> RolloutResult<()> {
    let Some(cutover) = &ctx.cutover else {
        info!(service = %service.name, instance = %new.id, "no traffic switch configured, skipping cutover");
        return Ok(());
    };

    cutover
        .run(&service.name, old, new, ctx.clock.as_ref(), &ctx.cancel)
        .await
        .map_err(|e| match e {
            SwitchError::Interrupted(reason) => DeploymentError::Cancelled {
                service: service.name.clone(),
                reason,
            },
            source => DeploymentError::Cutover {
                service: service.name.clone(),
                source,
            },
        })?;
    info!(service = %service.name, instance = %new.id, backend = cutover.kind(), "traffic switched");
    Ok(())
}

/// Gracefully stop each old instance. Failures are logged and skipped.
///
/// A stop that outlives the drain timeout plus [`DRAIN_GRACE`] on the
/// context clock is abandoned. Cancellation abandons the current stop and
/// leaves the remaining old instances running.
pub async fn drain(ctx: &DeployContext, service: &ServiceSpec, old: &[InstanceRecord]) -> usize {
    let timeout = Duration::from_secs(service.drain_timeout);
    let clock = ctx.clock.as_ref();
    let mut stopped = 0;
    for (idx, inst) in old.iter().enumerate() {
        let waited = match ctx.cancel.check(clock.now()) {
            Err(reason) => Err(reason),
            Ok(()) => {
                tokio::select! {
                    biased;
                    result = ctx.workload.stop_instance(&inst.id, true, timeout) => {
                        match result {
                            Ok(()) => {
                                stopped += 1;
                                info!(service = %service.name, instance = %inst.id, "old instance drained");
                            }
                            Err(e) => {
                                warn!(service = %service.name, instance = %inst.id, error = %e, "failed to drain old instance, continuing");
                            }
                        }
                        continue;
                    }
                    waited = ctx.cancel.sleep(clock, timeout + DRAIN_GRACE) => waited,
                }
            }
        };

        if let Err(reason) = waited {
            let skipped: Vec<&str> = old[idx..].iter().map(|i| i.id.as_str()).collect();
            warn!(service = %service.name, %reason, ?skipped, "drain interrupted, leaving old instances running");
            break;
        }
        warn!(
            service = %service.name,
            instance = %inst.id,
            timeout_secs = service.drain_timeout,
            "drain did not finish in time, continuing"
        );
    }
    stopped
}

/// Remove superseded instances beyond the retention count, oldest first.
/// `current` is never touched. Returns the removed ids.
pub async fn reconcile(ctx: &DeployContext, service: &ServiceSpec, current: &str) -> Vec<InstanceId> {
    let mut instances = match ctx.workload.list_all_instances(&service.name).await {
        Ok(instances) => instances,
        Err(e) => {
            warn!(service = %service.name, error = %e, "could not list instances for cleanup");
            return Vec::new();
        }
    };
    instances.retain(|i| i.id != current);
    instances.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let mut removed = Vec::new();
    for inst in instances.iter().skip(ctx.retain_instances) {
        if inst.status.is_up() {
            // Stop leftovers that were never drained before deleting them.
            if let Err(e) = ctx.workload.stop_instance(&inst.id, false, Duration::ZERO).await {
                warn!(service = %service.name, instance = %inst.id, error = %e, "failed to stop superseded instance");
            }
        }
        match ctx.workload.remove_instance(&inst.id).await {
            Ok(()) => {
                debug!(service = %service.name, instance = %inst.id, "removed superseded instance");
                removed.push(inst.id.clone());
            }
            Err(e) => {
                warn!(service = %service.name, instance = %inst.id, error = %e, "failed to remove superseded instance");
            }
        }
    }
    if !removed.is_empty() {
        info!(
            service = %service.name,
            removed = removed.len(),
            retained = ctx.retain_instances,
            "superseded instances cleaned up"
        );
    }
    removed
}

/// Force-stop and remove the new instance, then wrap `cause`.
pub async fn abort(
    ctx: &DeployContext,
    service: &ServiceSpec,
    new: &InstanceRecord,
    cause: DeploymentError,
) -> DeploymentError {
    warn!(service = %service.name, instance = %new.id, error = %cause, "aborting deployment");
    if let Err(e) = ctx.workload.stop_instance(&new.id, false, Duration::ZERO).await {
        warn!(instance = %new.id, error = %e, "failed to force-stop new instance");
    }
    if let Err(e) = ctx.workload.remove_instance(&new.id).await {
        warn!(instance = %new.id, error = %e, "failed to remove new instance");
    }
    DeploymentError::Aborted {
        service: service.name.clone(),
        instance: new.id.clone(),
        cause: Box::new(cause),
    }
}
