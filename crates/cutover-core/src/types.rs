//! Domain types shared by every cutover crate.
//!
//! These types describe what is being deployed (`ServiceSpec`), how its
//! readiness is judged (`HealthCheckSpec`), what is running
//! (`InstanceRecord`), and what happened (`DeploymentResult`). All of them
//! serialize to JSON so they can be printed by the CLI and persisted.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Runtime-assigned identifier of an instance (opaque to the core).
pub type InstanceId = String;

/// Default graceful-stop budget for old instances.
pub const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 30;

/// Status codes accepted by an http check when none are configured.
pub const DEFAULT_EXPECTED_STATUS: [u16; 2] = [200, 204];

// Labels stamped on every instance cutover launches.
pub const LABEL_SERVICE: &str = "cutover.service";
pub const LABEL_ENVIRONMENT: &str = "cutover.environment";
pub const LABEL_STRATEGY: &str = "cutover.strategy";
pub const LABEL_DEPLOYED_AT: &str = "cutover.deployed_at";

// ── Service ───────────────────────────────────────────────────────

/// Declarative description of one deployable unit within an environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceSpec {
    pub name: String,
    /// Ordered `host:container` pairs.
    pub ports: Vec<PortMapping>,
    pub env: BTreeMap<String, String>,
    pub volumes: Vec<String>,
    /// Overrides the image's default command.
    pub command: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub restart: RestartPolicy,
    pub health_check: Option<HealthCheckSpec>,
    /// Seconds an old instance is given to finish in-flight work.
    pub drain_timeout: u64,
}

impl ServiceSpec {
    /// A service with no ports, env, or health check.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ports: Vec::new(),
            env: BTreeMap::new(),
            volumes: Vec::new(),
            command: None,
            labels: BTreeMap::new(),
            restart: RestartPolicy::default(),
            health_check: None,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT_SECS,
        }
    }

    /// First container port, used as the http check port when none is set.
    pub fn primary_container_port(&self) -> Option<u16> {
        self.ports.first().map(|p| p.container)
    }
}

/// A `host:container` port pair. Serialized as the string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
}

impl FromStr for PortMapping {
    type Err = ConfigError;

    /// Accepts `"8080:3000"` or a bare `"3000"` (same port on both sides).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |part: &str| {
            part.trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort(s.to_string()))
        };
        match s.split_once(':') {
            Some((host, container)) => Ok(Self {
                host: parse(host)?,
                container: parse(container)?,
            }),
            None => {
                let port = parse(s)?;
                Ok(Self {
                    host: port,
                    container: port,
                })
            }
        }
    }
}

impl TryFrom<String> for PortMapping {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PortMapping> for String {
    fn from(value: PortMapping) -> Self {
        value.to_string()
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.container)
    }
}

/// Container restart policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    No,
    Always,
    OnFailure,
    #[default]
    UnlessStopped,
}

impl RestartPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::No => "no",
            Self::Always => "always",
            Self::OnFailure => "on-failure",
            Self::UnlessStopped => "unless-stopped",
        }
    }
}

// ── Health check ──────────────────────────────────────────────────

/// How readiness of a new instance is judged, plus the polling budget the
/// calling strategy applies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthCheckSpec {
    pub kind: HealthCheckKind,
    /// Failed probes tolerated before giving up.
    pub max_attempts: u32,
    /// Seconds between probes.
    pub interval_secs: u64,
}

/// The probe to run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HealthCheckKind {
    /// GET `http://{address}:{port}{path}`.
    Http(HttpCheck),
    /// Run a shell command inside the instance; exit 0 means healthy.
    Command { command: String },
    /// Ask the runtime for its own health verdict.
    Docker,
    /// A kind this build does not know; probed as http.
    Unknown { name: String, http: HttpCheck },
}

impl HealthCheckKind {
    pub fn name(&self) -> &str {
        match self {
            Self::Http(_) => "http",
            Self::Command { .. } => "command",
            Self::Docker => "docker",
            Self::Unknown { name, .. } => name,
        }
    }
}

/// Parameters of an http probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpCheck {
    pub path: String,
    pub port: u16,
    pub expected_status: BTreeSet<u16>,
}

impl HttpCheck {
    pub fn accepts(&self, status: u16) -> bool {
        self.expected_status.contains(&status)
    }
}

// ── Instance ──────────────────────────────────────────────────────

/// Runtime handle to one running container/instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceRecord {
    pub id: InstanceId,
    pub name: String,
    /// Owning service name.
    pub service: String,
    pub status: InstanceStatus,
    pub created_at: DateTime<Utc>,
    /// Reachable ip or hostname.
    pub address: String,
    pub ports: Vec<PortMapping>,
}

/// Lifecycle status of an instance.
///
/// Statuses only move forward: `Starting → Running → Healthy → Draining →
/// Exited → Removed`, skipping steps is allowed, going back is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Starting,
    Running,
    Healthy,
    Draining,
    Exited,
    Removed,
}

impl InstanceStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Starting => 0,
            Self::Running => 1,
            Self::Healthy => 2,
            Self::Draining => 3,
            Self::Exited => 4,
            Self::Removed => 5,
        }
    }

    /// Whether moving from `self` to `next` respects the lifecycle order.
    pub fn can_transition_to(self, next: InstanceStatus) -> bool {
        next.rank() >= self.rank()
    }

    /// Running or better, i.e. able to serve traffic.
    pub fn is_up(self) -> bool {
        matches!(self, Self::Running | Self::Healthy)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Healthy => "healthy",
            Self::Draining => "draining",
            Self::Exited => "exited",
            Self::Removed => "removed",
        };
        f.write_str(s)
    }
}

// ── Results ───────────────────────────────────────────────────────

/// Terminal status of one service within a deployment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Success,
    Failed,
}

/// Per-service outcome of a deployment run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentResult {
    pub service: String,
    /// Instances the new one replaced.
    pub superseded: Vec<InstanceId>,
    /// `None` when the backend deployed atomically and reported no handle.
    pub new_instance: Option<InstanceId>,
    pub status: DeploymentStatus,
    pub error: Option<String>,
}

impl DeploymentResult {
    pub fn success(service: &str, superseded: Vec<InstanceId>, new_instance: Option<InstanceId>) -> Self {
        Self {
            service: service.to_string(),
            superseded,
            new_instance,
            status: DeploymentStatus::Success,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == DeploymentStatus::Success
    }
}

// ── Strategy selection ────────────────────────────────────────────

/// Which deployment strategy drives a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    ZeroDowntime,
    Basic,
    Legacy,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ZeroDowntime => "zero_downtime",
            Self::Basic => "basic",
            Self::Legacy => "legacy",
        }
    }
}

impl FromStr for StrategyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "zero_downtime" | "zerodowntime" => Ok(Self::ZeroDowntime),
            "basic" => Ok(Self::Basic),
            "legacy" => Ok(Self::Legacy),
            _ => Err(ConfigError::UnknownStrategy(s.to_string())),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
