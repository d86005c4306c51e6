//! `cutover.toml` configuration parser.
//!
//! The file is deserialized into loose `Raw*` structs (everything optional,
//! env values may be any scalar) and then normalized into the strongly
//! typed [`DeployConfig`]. Nothing past this module sees raw TOML.
//!
//! ```toml
//! ledger_path = ".cutover/history.json"
//!
//! [environments.production]
//! provider = "docker"
//! strategy = "zero_downtime"
//!
//! [environments.production.proxy]
//! type = "file"
//! domain = "app.example.com"
//! settings = { path = "/etc/cutover/upstreams.json" }
//!
//! [[environments.production.services]]
//! name = "web"
//! ports = ["8080:3000"]
//! health_check = { type = "http", path = "/health", port = 3000 }
//! ```

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::types::*;

const DEFAULT_LEDGER_PATH: &str = ".cutover/history.json";
const DEFAULT_RETAIN_INSTANCES: usize = 2;
const DEFAULT_HEALTH_TIMEOUT_SECS: u64 = 300;
const DEFAULT_STARTUP_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_ATTEMPTS: u32 = 30;
const DEFAULT_INTERVAL_SECS: u64 = 2;
const DEFAULT_HEALTH_PATH: &str = "/health";

/// Normalized configuration for every environment.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DeployConfig {
    pub ledger_path: PathBuf,
    pub environments: BTreeMap<String, EnvironmentConfig>,
}

/// One named deployment target.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EnvironmentConfig {
    pub name: String,
    /// Workload backend identifier (`docker`, `memory`).
    pub provider: String,
    pub provider_settings: BTreeMap<String, String>,
    pub strategy: StrategyKind,
    /// Superseded instances kept around for fast rollback.
    pub retain_instances: usize,
    /// Hard budget for health-check polling.
    pub health_timeout_secs: u64,
    /// Budget for reaching `running` when no health check is configured.
    pub startup_timeout_secs: u64,
    /// Overall budget for one deploy invocation.
    pub deploy_timeout_secs: Option<u64>,
    pub proxy: Option<ProxyConfig>,
    /// Declaration order is deployment order.
    pub services: Vec<ServiceSpec>,
}

/// Traffic switch settings for an environment.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProxyConfig {
    /// Backend type (`router`, `file`).
    pub kind: String,
    /// Externally reachable domain. Verification is skipped without one.
    pub domain: Option<String>,
    pub ssl: bool,
    pub health_check_path: String,
    pub verify_attempts: u32,
    pub verify_interval_secs: u64,
    pub verify_header: Option<HeaderExpectation>,
    pub verify_status_min: u16,
    pub verify_status_max: u16,
    /// Backend-specific settings.
    pub settings: BTreeMap<String, String>,
}

impl ProxyConfig {
    /// URL polled after a switch, if a domain is configured.
    pub fn verification_url(&self) -> Option<String> {
        let domain = self.domain.as_deref()?;
        let scheme = if self.ssl { "https" } else { "http" };
        Some(format!("{scheme}://{domain}{}", self.health_check_path))
    }
}

/// A response header that must carry a given value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeaderExpectation {
    pub name: String,
    pub value: String,
}

impl DeployConfig {
    /// Load and normalize a config file. A relative `ledger_path` is
    /// resolved against the file's directory.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&content)?;
        if config.ledger_path.is_relative() {
            if let Some(dir) = path.parent() {
                config.ledger_path = dir.join(&config.ledger_path);
            }
        }
        debug!(?path, environments = config.environments.len(), "config loaded");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let raw: RawConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        raw.normalize()
    }

    /// Look up an environment by name.
    pub fn environment(&self, name: &str) -> ConfigResult<&EnvironmentConfig> {
        self.environments
            .get(name)
            .ok_or_else(|| ConfigError::UnknownEnvironment(name.to_string()))
    }
}

// ── Raw (file) shapes ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawConfig {
    ledger_path: Option<PathBuf>,
    #[serde(default)]
    environments: BTreeMap<String, RawEnvironment>,
}

#[derive(Debug, Deserialize)]
struct RawEnvironment {
    provider: Option<String>,
    #[serde(default)]
    provider_settings: BTreeMap<String, toml::Value>,
    strategy: Option<String>,
    retain_instances: Option<usize>,
    health_timeout_secs: Option<u64>,
    startup_timeout_secs: Option<u64>,
    deploy_timeout_secs: Option<u64>,
    proxy: Option<RawProxy>,
    #[serde(default)]
    services: Vec<RawService>,
}

#[derive(Debug, Deserialize)]
struct RawProxy {
    #[serde(rename = "type")]
    kind: String,
    domain: Option<String>,
    #[serde(default)]
    ssl: bool,
    health_check_path: Option<String>,
    verify_attempts: Option<u32>,
    verify_interval_secs: Option<u64>,
    verify_header: Option<HeaderExpectation>,
    verify_status_min: Option<u16>,
    verify_status_max: Option<u16>,
    #[serde(default)]
    settings: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Deserialize)]
struct RawService {
    name: String,
    #[serde(default)]
    ports: Vec<toml::Value>,
    #[serde(default)]
    env: BTreeMap<String, toml::Value>,
    #[serde(default)]
    volumes: Vec<String>,
    command: Option<String>,
    #[serde(default)]
    labels: BTreeMap<String, toml::Value>,
    restart: Option<RestartPolicy>,
    health_check: Option<RawHealthCheck>,
    drain_timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawHealthCheck {
    #[serde(rename = "type")]
    kind: Option<String>,
    path: Option<String>,
    port: Option<u16>,
    expected_status: Option<Vec<u16>>,
    max_attempts: Option<u32>,
    interval: Option<u64>,
    command: Option<String>,
}

// ── Normalization ─────────────────────────────────────────────────

impl RawConfig {
    fn normalize(self) -> ConfigResult<DeployConfig> {
        if self.environments.is_empty() {
            return Err(ConfigError::Parse("no environments defined".to_string()));
        }
        let mut environments = BTreeMap::new();
        for (name, raw) in self.environments {
            let env = raw.normalize(&name)?;
            environments.insert(name, env);
        }
        Ok(DeployConfig {
            ledger_path: self
                .ledger_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LEDGER_PATH)),
            environments,
        })
    }
}

impl RawEnvironment {
    fn normalize(self, name: &str) -> ConfigResult<EnvironmentConfig> {
        let invalid = |message: String| ConfigError::Invalid {
            environment: name.to_string(),
            message,
        };

        let provider = self
            .provider
            .map(|p| p.trim().to_ascii_lowercase())
            .filter(|p| !p.is_empty())
            .ok_or_else(|| invalid("provider is required".to_string()))?;

        let strategy = match self.strategy {
            Some(s) => s.parse()?,
            None => StrategyKind::default(),
        };

        let mut seen = HashSet::new();
        let mut services = Vec::with_capacity(self.services.len());
        for raw in self.services {
            if !seen.insert(raw.name.clone()) {
                return Err(invalid(format!("duplicate service name '{}'", raw.name)));
            }
            services.push(raw.normalize().map_err(|e| match e {
                ConfigError::Invalid { message, .. } => invalid(message),
                other => other,
            })?);
        }

        Ok(EnvironmentConfig {
            name: name.to_string(),
            provider,
            provider_settings: stringify_map(self.provider_settings),
            strategy,
            retain_instances: self.retain_instances.unwrap_or(DEFAULT_RETAIN_INSTANCES),
            health_timeout_secs: self.health_timeout_secs.unwrap_or(DEFAULT_HEALTH_TIMEOUT_SECS),
            startup_timeout_secs: self
                .startup_timeout_secs
                .unwrap_or(DEFAULT_STARTUP_TIMEOUT_SECS),
            deploy_timeout_secs: self.deploy_timeout_secs,
            proxy: self.proxy.map(RawProxy::normalize),
            services,
        })
    }
}

impl RawProxy {
    fn normalize(self) -> ProxyConfig {
        ProxyConfig {
            kind: self.kind.trim().to_ascii_lowercase(),
            domain: self.domain.filter(|d| !d.trim().is_empty()),
            ssl: self.ssl,
            health_check_path: self.health_check_path.unwrap_or_else(|| "/".to_string()),
            verify_attempts: self.verify_attempts.unwrap_or(5),
            verify_interval_secs: self.verify_interval_secs.unwrap_or(2),
            verify_header: self.verify_header,
            verify_status_min: self.verify_status_min.unwrap_or(200),
            verify_status_max: self.verify_status_max.unwrap_or(399),
            settings: stringify_map(self.settings),
        }
    }
}

impl RawService {
    fn normalize(self) -> ConfigResult<ServiceSpec> {
        let ports = self
            .ports
            .iter()
            .map(|p| scalar_to_string(p).parse::<PortMapping>())
            .collect::<ConfigResult<Vec<_>>>()?;

        let mut spec = ServiceSpec {
            name: self.name,
            ports,
            env: stringify_map(self.env),
            volumes: self.volumes,
            command: self.command,
            labels: stringify_map(self.labels),
            restart: self.restart.unwrap_or_default(),
            health_check: None,
            drain_timeout: self.drain_timeout.unwrap_or(DEFAULT_DRAIN_TIMEOUT_SECS),
        };
        if let Some(raw) = self.health_check {
            spec.health_check = Some(raw.normalize(&spec)?);
        }
        Ok(spec)
    }
}

impl RawHealthCheck {
    fn normalize(self, service: &ServiceSpec) -> ConfigResult<HealthCheckSpec> {
        let invalid = |message: &str| ConfigError::Invalid {
            environment: String::new(),
            message: format!("service '{}': {message}", service.name),
        };

        let kind_name = self
            .kind
            .map(|k| k.trim().to_ascii_lowercase())
            .unwrap_or_else(|| "http".to_string());

        let http = || -> ConfigResult<HttpCheck> {
            let port = self
                .port
                .or_else(|| service.primary_container_port())
                .ok_or_else(|| invalid("http health check needs a port"))?;
            let expected_status: BTreeSet<u16> = match &self.expected_status {
                Some(codes) if !codes.is_empty() => codes.iter().copied().collect(),
                _ => DEFAULT_EXPECTED_STATUS.into_iter().collect(),
            };
            Ok(HttpCheck {
                path: self
                    .path
                    .clone()
                    .unwrap_or_else(|| DEFAULT_HEALTH_PATH.to_string()),
                port,
                expected_status,
            })
        };

        let kind = match kind_name.as_str() {
            "http" => HealthCheckKind::Http(http()?),
            "command" => HealthCheckKind::Command {
                command: self
                    .command
                    .clone()
                    .filter(|c| !c.trim().is_empty())
                    .ok_or_else(|| invalid("command health check needs a command"))?,
            },
            "docker" => HealthCheckKind::Docker,
            _ => HealthCheckKind::Unknown {
                name: kind_name.clone(),
                http: http()?,
            },
        };

        Ok(HealthCheckSpec {
            kind,
            max_attempts: self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS).max(1),
            interval_secs: self.interval.unwrap_or(DEFAULT_INTERVAL_SECS),
        })
    }
}

/// Render a TOML scalar the way a shell would see it.
fn scalar_to_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn stringify_map(map: BTreeMap<String, toml::Value>) -> BTreeMap<String, String> {
    map.into_iter()
        .map(|(k, v)| (k, scalar_to_string(&v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
ledger_path = "/var/lib/cutover/history.json"

[environments.production]
provider = "Docker"
retain_instances = 3

[environments.production.provider_settings]
network = "web"

[environments.production.proxy]
type = "file"
domain = "app.example.com"
ssl = true
health_check_path = "/up"
settings = { path = "/tmp/upstreams.json" }

[[environments.production.services]]
name = "web"
ports = ["8080:3000", 9090]
env = { RAILS_ENV = "production", WORKERS = 4 }
health_check = { type = "http", path = "/health", expected_status = [200] }

[[environments.production.services]]
name = "worker"
command = "bin/jobs"
drain_timeout = 120
health_check = { type = "command", command = "pgrep jobs" }
"#;

    #[test]
    fn parses_and_normalizes_sample() {
        let config = DeployConfig::from_toml_str(SAMPLE).unwrap();
        let env = config.environment("production").unwrap();

        assert_eq!(env.provider, "docker");
        assert_eq!(env.strategy, StrategyKind::ZeroDowntime);
        assert_eq!(env.retain_instances, 3);
        assert_eq!(env.health_timeout_secs, 300);
        assert_eq!(env.provider_settings["network"], "web");

        let names: Vec<_> = env.services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["web", "worker"]);

        let web = &env.services[0];
        assert_eq!(web.ports[1], PortMapping { host: 9090, container: 9090 });
        assert_eq!(web.env["WORKERS"], "4");
        let check = web.health_check.as_ref().unwrap();
        match &check.kind {
            HealthCheckKind::Http(http) => {
                // Port falls back to the first container port.
                assert_eq!(http.port, 3000);
                assert!(http.accepts(200));
                assert!(!http.accepts(204));
            }
            other => panic!("expected http check, got {other:?}"),
        }
        assert_eq!(check.max_attempts, 30);

        let worker = &env.services[1];
        assert_eq!(worker.drain_timeout, 120);
        assert!(matches!(
            worker.health_check.as_ref().unwrap().kind,
            HealthCheckKind::Command { .. }
        ));
    }

    #[test]
    fn proxy_verification_url() {
        let config = DeployConfig::from_toml_str(SAMPLE).unwrap();
        let proxy = config.environments["production"].proxy.clone().unwrap();
        assert_eq!(proxy.verification_url().unwrap(), "https://app.example.com/up");
        assert_eq!(proxy.settings["path"], "/tmp/upstreams.json");
    }

    #[test]
    fn rejects_duplicate_service_names() {
        let toml = r#"
[environments.staging]
provider = "memory"
[[environments.staging.services]]
name = "web"
[[environments.staging.services]]
name = "web"
"#;
        let err = DeployConfig::from_toml_str(toml).unwrap_err();
        assert!(err.to_string().contains("duplicate service name"));
    }

    #[test]
    fn rejects_missing_provider() {
        let toml = r#"
[environments.staging]
strategy = "basic"
"#;
        let err = DeployConfig::from_toml_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn http_check_without_port_is_invalid() {
        let toml = r#"
[environments.staging]
provider = "memory"
[[environments.staging.services]]
name = "web"
health_check = { type = "http" }
"#;
        let err = DeployConfig::from_toml_str(toml).unwrap_err();
        assert!(err.to_string().contains("needs a port"));
    }

    #[test]
    fn unknown_check_kind_keeps_http_parameters() {
        let toml = r#"
[environments.staging]
provider = "memory"
[[environments.staging.services]]
name = "web"
ports = ["80:8080"]
health_check = { type = "tcp" }
"#;
        let config = DeployConfig::from_toml_str(toml).unwrap();
        let check = config.environments["staging"].services[0]
            .health_check
            .clone()
            .unwrap();
        match check.kind {
            HealthCheckKind::Unknown { name, http } => {
                assert_eq!(name, "tcp");
                assert_eq!(http.port, 8080);
                assert_eq!(http.path, "/health");
            }
            other => panic!("expected unknown kind, got {other:?}"),
        }
    }

    #[test]
    fn unknown_environment_is_config_error() {
        let config = DeployConfig::from_toml_str(SAMPLE).unwrap();
        assert!(matches!(
            config.environment("qa"),
            Err(ConfigError::UnknownEnvironment(_))
        ));
    }

    #[test]
    fn relative_ledger_path_resolves_next_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cutover.toml");
        std::fs::write(&path, "[environments.dev]\nprovider = \"memory\"\n").unwrap();

        let config = DeployConfig::from_file(&path).unwrap();
        assert_eq!(config.ledger_path, dir.path().join(".cutover/history.json"));
    }
}
