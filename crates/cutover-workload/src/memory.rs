//! In-process simulated workload backend.
//!
//! Instances live in a map guarded by a mutex; nothing is actually run.
//! Used for dry runs (`provider = "memory"`) and as the backend of every
//! cross-crate test, so it carries fault-injection knobs (failing or
//! hanging stops for a given instance, failing starts and enumeration,
//! exec exit codes, runtime health).

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use cutover_core::*;

/// A recorded `stop_instance` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopCall {
    pub id: InstanceId,
    pub graceful: bool,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
struct SimInstance {
    record: InstanceRecord,
    image: String,
    env: BTreeMap<String, String>,
    labels: BTreeMap<String, String>,
}

#[derive(Debug)]
struct SimState {
    instances: BTreeMap<InstanceId, SimInstance>,
    next_id: u64,
    last_created: DateTime<Utc>,
    // Fault injection.
    fail_start: bool,
    fail_listing: bool,
    fail_stop: HashSet<InstanceId>,
    hang_stop: HashSet<InstanceId>,
    start_status: InstanceStatus,
    exec_exit_code: i32,
    runtime_health: RuntimeHealth,
    // Call log.
    stops: Vec<StopCall>,
    removals: Vec<InstanceId>,
    legacy_calls: Vec<(String, String, String)>,
}

/// Simulated backend holding instances in memory.
#[derive(Debug)]
pub struct MemoryWorkload {
    address: String,
    state: Mutex<SimState>,
}

impl MemoryWorkload {
    pub fn new() -> Self {
        Self::with_address("127.0.0.1")
    }

    /// Every instance reports `address` as its network address.
    pub fn with_address(address: &str) -> Self {
        Self {
            address: address.to_string(),
            state: Mutex::new(SimState {
                instances: BTreeMap::new(),
                next_id: 1,
                last_created: DateTime::<Utc>::MIN_UTC,
                fail_start: false,
                fail_listing: false,
                fail_stop: HashSet::new(),
                hang_stop: HashSet::new(),
                start_status: InstanceStatus::Running,
                exec_exit_code: 0,
                runtime_health: RuntimeHealth::NotConfigured,
                stops: Vec::new(),
                removals: Vec::new(),
                legacy_calls: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a pre-existing instance of `service` running `image`.
    pub fn seed_instance(
        &self,
        service: &str,
        image: &str,
        status: InstanceStatus,
        created_at: DateTime<Utc>,
    ) -> InstanceRecord {
        let mut state = self.lock();
        let id = format!("sim-{}", state.next_id);
        state.next_id += 1;
        let record = InstanceRecord {
            id: id.clone(),
            name: format!("{service}-{id}"),
            service: service.to_string(),
            status,
            created_at,
            address: self.address.clone(),
            ports: Vec::new(),
        };
        state.instances.insert(
            id,
            SimInstance {
                record: record.clone(),
                image: image.to_string(),
                env: BTreeMap::new(),
                labels: BTreeMap::new(),
            },
        );
        record
    }

    pub fn fail_start(&self, fail: bool) {
        self.lock().fail_start = fail;
    }

    pub fn fail_listing(&self, fail: bool) {
        self.lock().fail_listing = fail;
    }

    /// Make every stop of instance `id` fail.
    pub fn fail_stop_for(&self, id: &str) {
        self.lock().fail_stop.insert(id.to_string());
    }

    /// Make every stop of instance `id` pend forever.
    pub fn hang_stop_for(&self, id: &str) {
        self.lock().hang_stop.insert(id.to_string());
    }

    /// Status new instances report right after start.
    pub fn set_start_status(&self, status: InstanceStatus) {
        self.lock().start_status = status;
    }

    pub fn set_exec_exit_code(&self, code: i32) {
        self.lock().exec_exit_code = code;
    }

    pub fn set_runtime_health(&self, health: RuntimeHealth) {
        self.lock().runtime_health = health;
    }

    pub fn instance(&self, id: &str) -> Option<InstanceRecord> {
        self.lock().instances.get(id).map(|i| i.record.clone())
    }

    pub fn image_of(&self, id: &str) -> Option<String> {
        self.lock().instances.get(id).map(|i| i.image.clone())
    }

    pub fn env_of(&self, id: &str) -> Option<BTreeMap<String, String>> {
        self.lock().instances.get(id).map(|i| i.env.clone())
    }

    pub fn labels_of(&self, id: &str) -> Option<BTreeMap<String, String>> {
        self.lock().instances.get(id).map(|i| i.labels.clone())
    }

    pub fn stop_calls(&self) -> Vec<StopCall> {
        self.lock().stops.clone()
    }

    pub fn removed(&self) -> Vec<InstanceId> {
        self.lock().removals.clone()
    }

    /// `(operation, image, environment)` for every legacy deploy/rollback.
    pub fn legacy_calls(&self) -> Vec<(String, String, String)> {
        self.lock().legacy_calls.clone()
    }

    fn set_status(state: &mut SimState, id: &str, next: InstanceStatus) -> WorkloadResult<()> {
        let inst = state
            .instances
            .get_mut(id)
            .ok_or_else(|| WorkloadError::NotFound(id.to_string()))?;
        let current = inst.record.status;
        if !current.can_transition_to(next) {
            return Err(WorkloadError::InvalidTransition {
                id: id.to_string(),
                from: current,
                to: next,
            });
        }
        inst.record.status = next;
        Ok(())
    }

    fn list(&self, service: &str, running_only: bool) -> WorkloadResult<Vec<InstanceRecord>> {
        let state = self.lock();
        if state.fail_listing {
            return Err(WorkloadError::Backend("instance listing unavailable".to_string()));
        }
        Ok(state
            .instances
            .values()
            .filter(|i| i.record.service == service)
            .filter(|i| {
                !running_only
                    || matches!(i.record.status, InstanceStatus::Starting)
                    || i.record.status.is_up()
            })
            .map(|i| i.record.clone())
            .collect())
    }

    /// Replace every instance of each service with one running `image`.
    async fn replace_all(
        &self,
        operation: &str,
        image: &str,
        environment: &str,
        services: &[ServiceSpec],
    ) -> WorkloadResult<Vec<DeploymentResult>> {
        self.lock().legacy_calls.push((
            operation.to_string(),
            image.to_string(),
            environment.to_string(),
        ));
        let mut results = Vec::with_capacity(services.len());
        for svc in services {
            let old = self.list(&svc.name, false)?;
            for inst in &old {
                self.stop_instance(&inst.id, true, Duration::from_secs(svc.drain_timeout))
                    .await?;
                self.remove_instance(&inst.id).await?;
            }
            let spec = LaunchSpec {
                service: svc.name.clone(),
                name: format!("{}-{environment}", svc.name),
                image: image.to_string(),
                ports: svc.ports.clone(),
                env: svc.env.clone(),
                volumes: svc.volumes.clone(),
                command: svc.command.clone(),
                labels: svc.labels.clone(),
                restart: svc.restart,
            };
            let new = self.start_instance(&spec).await?;
            results.push(DeploymentResult::success(
                &svc.name,
                old.into_iter().map(|i| i.id).collect(),
                Some(new.id),
            ));
        }
        Ok(results)
    }
}

impl Default for MemoryWorkload {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkloadPort for MemoryWorkload {
    fn name(&self) -> &str {
        "memory"
    }

    async fn start_instance(&self, spec: &LaunchSpec) -> WorkloadResult<InstanceRecord> {
        let mut state = self.lock();
        if state.fail_start {
            return Err(WorkloadError::Backend(format!("cannot start {}", spec.name)));
        }
        let id = format!("sim-{}", state.next_id);
        state.next_id += 1;

        // Keep creation times strictly increasing so ordering is stable.
        let now = Utc::now();
        let created_at = if now > state.last_created {
            now
        } else {
            state.last_created + TimeDelta::milliseconds(1)
        };
        state.last_created = created_at;

        let record = InstanceRecord {
            id: id.clone(),
            name: spec.name.clone(),
            service: spec.service.clone(),
            status: state.start_status,
            created_at,
            address: self.address.clone(),
            ports: spec.ports.clone(),
        };
        state.instances.insert(
            id.clone(),
            SimInstance {
                record: record.clone(),
                image: spec.image.clone(),
                env: spec.env.clone(),
                labels: spec.labels.clone(),
            },
        );
        debug!(%id, service = %spec.service, image = %spec.image, "simulated instance started");
        Ok(record)
    }

    async fn stop_instance(&self, id: &str, graceful: bool, timeout: Duration) -> WorkloadResult<()> {
        let hang = {
            let mut state = self.lock();
            state.stops.push(StopCall {
                id: id.to_string(),
                graceful,
                timeout,
            });
            state.hang_stop.contains(id)
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let mut state = self.lock();
        if state.fail_stop.contains(id) {
            return Err(WorkloadError::Backend(format!("stop of {id} failed")));
        }
        let current = state
            .instances
            .get(id)
            .map(|i| i.record.status)
            .ok_or_else(|| WorkloadError::NotFound(id.to_string()))?;
        if graceful && current.can_transition_to(InstanceStatus::Draining) {
            Self::set_status(&mut state, id, InstanceStatus::Draining)?;
        }
        if current.can_transition_to(InstanceStatus::Exited) {
            Self::set_status(&mut state, id, InstanceStatus::Exited)?;
        }
        Ok(())
    }

    async fn remove_instance(&self, id: &str) -> WorkloadResult<()> {
        let mut state = self.lock();
        state
            .instances
            .remove(id)
            .ok_or_else(|| WorkloadError::NotFound(id.to_string()))?;
        state.removals.push(id.to_string());
        Ok(())
    }

    async fn list_running_instances(&self, service: &str) -> WorkloadResult<Vec<InstanceRecord>> {
        self.list(service, true)
    }

    async fn list_all_instances(&self, service: &str) -> WorkloadResult<Vec<InstanceRecord>> {
        self.list(service, false)
    }

    async fn instance_status(&self, id: &str) -> WorkloadResult<InstanceStatus> {
        self.lock()
            .instances
            .get(id)
            .map(|i| i.record.status)
            .ok_or_else(|| WorkloadError::NotFound(id.to_string()))
    }

    async fn instance_health(&self, id: &str) -> WorkloadResult<RuntimeHealth> {
        let state = self.lock();
        if !state.instances.contains_key(id) {
            return Err(WorkloadError::NotFound(id.to_string()));
        }
        Ok(state.runtime_health)
    }

    async fn exec_in_instance(&self, id: &str, command: &str) -> WorkloadResult<ExecOutput> {
        let state = self.lock();
        let inst = state
            .instances
            .get(id)
            .ok_or_else(|| WorkloadError::NotFound(id.to_string()))?;
        if !inst.record.status.is_up() {
            return Err(WorkloadError::Command {
                command: command.to_string(),
                message: format!("instance {id} is {}", inst.record.status),
            });
        }
        Ok(ExecOutput {
            exit_code: state.exec_exit_code,
            stdout: String::new(),
            stderr: String::new(),
        })
    }

    async fn deploy(
        &self,
        image: &str,
        environment: &str,
        services: &[ServiceSpec],
    ) -> WorkloadResult<Vec<DeploymentResult>> {
        self.replace_all("deploy", image, environment, services).await
    }

    async fn rollback(
        &self,
        version: &str,
        environment: &str,
        services: &[ServiceSpec],
    ) -> WorkloadResult<Vec<DeploymentResult>> {
        self.replace_all("rollback", version, environment, services).await
    }
}
