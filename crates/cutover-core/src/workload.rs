//! Workload Port — the contract between the orchestrator and a compute
//! backend (container runtime, cloud API, simulated pool).
//!
//! The core never talks to a runtime directly; strategies and the health
//! checker go through a `dyn WorkloadPort` selected from configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::WorkloadResult;
use crate::types::*;

/// Everything a backend needs to launch one new instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LaunchSpec {
    pub service: String,
    /// Instance name (unique per launch).
    pub name: String,
    pub image: String,
    pub ports: Vec<PortMapping>,
    pub env: BTreeMap<String, String>,
    pub volumes: Vec<String>,
    pub command: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub restart: RestartPolicy,
}

/// Output of a command run inside an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// The runtime's own health verdict for an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Healthy,
    Unhealthy,
    Starting,
    /// The image defines no health check of its own.
    NotConfigured,
}

/// Instances of one service as reported by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceStatus {
    pub service: String,
    pub instances: Vec<InstanceRecord>,
}

/// Start/stop/inspect running instances of a service.
#[async_trait]
pub trait WorkloadPort: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Launch a new instance and return its handle.
    async fn start_instance(&self, spec: &LaunchSpec) -> WorkloadResult<InstanceRecord>;

    /// Stop an instance. A graceful stop gives it `timeout` to exit before
    /// the backend kills it; a non-graceful stop kills immediately.
    async fn stop_instance(&self, id: &str, graceful: bool, timeout: Duration) -> WorkloadResult<()>;

    /// Delete a stopped instance.
    async fn remove_instance(&self, id: &str) -> WorkloadResult<()>;

    /// Instances of `service` that are currently up.
    async fn list_running_instances(&self, service: &str) -> WorkloadResult<Vec<InstanceRecord>>;

    /// All instances of `service`, running or stopped.
    async fn list_all_instances(&self, service: &str) -> WorkloadResult<Vec<InstanceRecord>>;

    async fn instance_status(&self, id: &str) -> WorkloadResult<InstanceStatus>;

    async fn instance_health(&self, id: &str) -> WorkloadResult<RuntimeHealth>;

    /// Run `command` inside the instance.
    async fn exec_in_instance(&self, id: &str, command: &str) -> WorkloadResult<ExecOutput>;

    /// Deploy `image` for every service in one backend-native operation.
    async fn deploy(
        &self,
        image: &str,
        environment: &str,
        services: &[ServiceSpec],
    ) -> WorkloadResult<Vec<DeploymentResult>>;

    /// Roll every service back to `version` in one backend-native operation.
    async fn rollback(
        &self,
        version: &str,
        environment: &str,
        services: &[ServiceSpec],
    ) -> WorkloadResult<Vec<DeploymentResult>>;

    /// Current instances per service.
    async fn status(&self, services: &[ServiceSpec]) -> WorkloadResult<Vec<ServiceStatus>> {
        let mut out = Vec::with_capacity(services.len());
        for svc in services {
            out.push(ServiceStatus {
                service: svc.name.clone(),
                instances: self.list_all_instances(&svc.name).await?,
            });
        }
        Ok(out)
    }
}
