//! Docker workload backend driving the `docker` CLI.
//!
//! Every container started here carries `cutover.service` and
//! `cutover.environment` labels; discovery filters on them, so containers
//! not launched by cutover are never touched.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use cutover_core::*;

/// Workload Port over a local or remote Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerWorkload {
    environment: String,
    binary: String,
    network: Option<String>,
    /// Value for `DOCKER_HOST`, if set.
    host: Option<String>,
}

impl DockerWorkload {
    /// Build from `provider_settings` (`binary`, `network`, `host`).
    pub fn from_settings(environment: &str, settings: &BTreeMap<String, String>) -> Self {
        Self {
            environment: environment.to_string(),
            binary: settings
                .get("binary")
                .cloned()
                .unwrap_or_else(|| "docker".to_string()),
            network: settings.get("network").cloned(),
            host: settings.get("host").cloned(),
        }
    }

    async fn run(&self, args: &[String]) -> WorkloadResult<String> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);
        if let Some(host) = &self.host {
            cmd.env("DOCKER_HOST", host);
        }
        let output = cmd.output().await?;
        if !output.status.success() {
            return Err(WorkloadError::Command {
                command: format!("{} {}", self.binary, args.first().map(String::as_str).unwrap_or("")),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn inspect(&self, ids: &[String]) -> WorkloadResult<Vec<ContainerInspect>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut args = vec!["inspect".to_string()];
        args.extend(ids.iter().cloned());
        let out = self.run(&args).await?;
        serde_json::from_str(&out)
            .map_err(|e| WorkloadError::Backend(format!("unreadable docker inspect output: {e}")))
    }

    async fn inspect_one(&self, id: &str) -> WorkloadResult<ContainerInspect> {
        self.inspect(&[id.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| WorkloadError::NotFound(id.to_string()))
    }

    async fn list(&self, service: &str, all: bool) -> WorkloadResult<Vec<InstanceRecord>> {
        let mut args = vec!["ps".to_string(), "-q".to_string(), "--no-trunc".to_string()];
        if all {
            args.push("-a".to_string());
        }
        args.push("--filter".to_string());
        args.push(format!("label={LABEL_SERVICE}={service}"));
        args.push("--filter".to_string());
        args.push(format!("label={LABEL_ENVIRONMENT}={}", self.environment));

        let out = self.run(&args).await?;
        let ids: Vec<String> = out.lines().map(str::trim).filter(|l| !l.is_empty()).map(String::from).collect();
        Ok(self
            .inspect(&ids)
            .await?
            .into_iter()
            .map(|c| c.into_record(service))
            .collect())
    }
}

/// `docker run` arguments for a launch spec. A command override is split
/// into words and passed as the container's argv, without a shell.
fn run_args(spec: &LaunchSpec, environment: &str, network: Option<&str>) -> WorkloadResult<Vec<String>> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        spec.name.clone(),
        "--restart".to_string(),
        spec.restart.as_str().to_string(),
        "--label".to_string(),
        format!("{LABEL_SERVICE}={}", spec.service),
        "--label".to_string(),
        format!("{LABEL_ENVIRONMENT}={environment}"),
    ];
    for (k, v) in &spec.labels {
        args.push("--label".to_string());
        args.push(format!("{k}={v}"));
    }
    for (k, v) in &spec.env {
        args.push("-e".to_string());
        args.push(format!("{k}={v}"));
    }
    for port in &spec.ports {
        args.push("-p".to_string());
        args.push(port.to_string());
    }
    for volume in &spec.volumes {
        args.push("-v".to_string());
        args.push(volume.clone());
    }
    if let Some(network) = network {
        args.push("--network".to_string());
        args.push(network.to_string());
    }
    args.push(spec.image.clone());
    if let Some(command) = &spec.command {
        let words = shell_words::split(command)
            .map_err(|e| WorkloadError::Backend(format!("invalid command for {}: {e}", spec.service)))?;
        args.extend(words);
    }
    Ok(args)
}

// ── docker inspect output ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerInspect {
    id: String,
    name: String,
    created: DateTime<Utc>,
    state: InspectState,
    #[serde(default)]
    network_settings: InspectNetwork,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    status: String,
    health: Option<InspectHealth>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectHealth {
    status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectNetwork {
    #[serde(default)]
    networks: HashMap<String, InspectEndpoint>,
}

#[derive(Debug, Deserialize)]
struct InspectEndpoint {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
}

impl ContainerInspect {
    fn status(&self) -> InstanceStatus {
        let healthy = self
            .state
            .health
            .as_ref()
            .is_some_and(|h| h.status == "healthy");
        match self.state.status.as_str() {
            "created" | "restarting" => InstanceStatus::Starting,
            "running" | "paused" if healthy => InstanceStatus::Healthy,
            "running" | "paused" => InstanceStatus::Running,
            _ => InstanceStatus::Exited,
        }
    }

    fn runtime_health(&self) -> RuntimeHealth {
        match self.state.health.as_ref().map(|h| h.status.as_str()) {
            None | Some("none") => RuntimeHealth::NotConfigured,
            Some("healthy") => RuntimeHealth::Healthy,
            Some("starting") => RuntimeHealth::Starting,
            Some(_) => RuntimeHealth::Unhealthy,
        }
    }

    fn address(&self) -> String {
        self.network_settings
            .networks
            .values()
            .map(|n| n.ip_address.as_str())
            .find(|ip| !ip.is_empty())
            .unwrap_or("127.0.0.1")
            .to_string()
    }

    fn into_record(self, service: &str) -> InstanceRecord {
        InstanceRecord {
            status: self.status(),
            address: self.address(),
            name: self.name.trim_start_matches('/').to_string(),
            id: self.id,
            service: service.to_string(),
            created_at: self.created,
            ports: Vec::new(),
        }
    }
}

#[async_trait]
impl WorkloadPort for DockerWorkload {
    fn name(&self) -> &str {
        "docker"
    }

    async fn start_instance(&self, spec: &LaunchSpec) -> WorkloadResult<InstanceRecord> {
        let args = run_args(spec, &self.environment, self.network.as_deref())?;
        let id = self.run(&args).await?;
        debug!(%id, service = %spec.service, image = %spec.image, "container started");
        let mut record = self.inspect_one(&id).await?.into_record(&spec.service);
        record.ports = spec.ports.clone();
        Ok(record)
    }

    async fn stop_instance(&self, id: &str, graceful: bool, timeout: Duration) -> WorkloadResult<()> {
        let args = if graceful {
            vec![
                "stop".to_string(),
                "-t".to_string(),
                timeout.as_secs().to_string(),
                id.to_string(),
            ]
        } else {
            vec!["kill".to_string(), id.to_string()]
        };
        self.run(&args).await.map(|_| ())
    }

    async fn remove_instance(&self, id: &str) -> WorkloadResult<()> {
        self.run(&["rm".to_string(), "-f".to_string(), id.to_string()])
            .await
            .map(|_| ())
    }

    async fn list_running_instances(&self, service: &str) -> WorkloadResult<Vec<InstanceRecord>> {
        self.list(service, false).await
    }

    async fn list_all_instances(&self, service: &str) -> WorkloadResult<Vec<InstanceRecord>> {
        self.list(service, true).await
    }

    async fn instance_status(&self, id: &str) -> WorkloadResult<InstanceStatus> {
        Ok(self.inspect_one(id).await?.status())
    }

    async fn instance_health(&self, id: &str) -> WorkloadResult<RuntimeHealth> {
        Ok(self.inspect_one(id).await?.runtime_health())
    }

    async fn exec_in_instance(&self, id: &str, command: &str) -> WorkloadResult<ExecOutput> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["exec", id, "sh", "-c", command]);
        if let Some(host) = &self.host {
            cmd.env("DOCKER_HOST", host);
        }
        let output = cmd.output().await?;
        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn deploy(
        &self,
        _image: &str,
        _environment: &str,
        _services: &[ServiceSpec],
    ) -> WorkloadResult<Vec<DeploymentResult>> {
        Err(WorkloadError::Unsupported {
            backend: "docker".to_string(),
            operation: "deploy (use the zero_downtime or basic strategy)".to_string(),
        })
    }

    async fn rollback(
        &self,
        _version: &str,
        _environment: &str,
        _services: &[ServiceSpec],
    ) -> WorkloadResult<Vec<DeploymentResult>> {
        Err(WorkloadError::Unsupported {
            backend: "docker".to_string(),
            operation: "rollback (use the zero_downtime or basic strategy)".to_string(),
        })
    }
}
