//! Health check probe logic.
//!
//! Dispatches on the configured check kind. Network failures, non-zero
//! exit codes, and backend errors all count as a failed probe; nothing in
//! here returns an error to the caller.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use cutover_core::{HealthCheckKind, HealthCheckSpec, HttpCheck, InstanceRecord, RuntimeHealth, WorkloadPort};

/// Result of a single health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The instance answered and is ready.
    Healthy,
    /// The instance answered but is not ready (bad status, non-zero exit).
    Unhealthy,
    /// The probe could not be executed (connection error, backend error).
    Failed,
}

impl ProbeResult {
    pub fn is_healthy(self) -> bool {
        self == Self::Healthy
    }
}

/// Upper bound for a single http health request.
const HTTP_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs one probe against one instance.
#[derive(Clone)]
pub struct HealthChecker {
    workload: Arc<dyn WorkloadPort>,
}

impl HealthChecker {
    pub fn new(workload: Arc<dyn WorkloadPort>) -> Self {
        Self { workload }
    }

    /// Probe `instance` once according to `spec`.
    pub async fn check(&self, instance: &InstanceRecord, spec: &HealthCheckSpec) -> ProbeResult {
        match &spec.kind {
            HealthCheckKind::Http(http) => self.check_http(instance, http).await,
            HealthCheckKind::Command { command } => self.check_command(instance, command).await,
            HealthCheckKind::Docker => self.check_runtime(instance).await,
            HealthCheckKind::Unknown { name, http } => {
                warn!(kind = %name, instance = %instance.id, "unknown health check kind, probing over http");
                self.check_http(instance, http).await
            }
        }
    }

    async fn check_http(&self, instance: &InstanceRecord, http: &HttpCheck) -> ProbeResult {
        let address = format!("{}:{}", instance.address, http.port);
        http_probe(&address, &http.path, &http.expected_status, HTTP_CHECK_TIMEOUT).await
    }

    async fn check_command(&self, instance: &InstanceRecord, command: &str) -> ProbeResult {
        match self.workload.exec_in_instance(&instance.id, command).await {
            Ok(output) if output.success() => ProbeResult::Healthy,
            Ok(output) => {
                debug!(
                    instance = %instance.id,
                    exit_code = output.exit_code,
                    stderr = %output.stderr.trim(),
                    "health command exited non-zero"
                );
                ProbeResult::Unhealthy
            }
            Err(e) => {
                debug!(instance = %instance.id, error = %e, "health command could not run");
                ProbeResult::Failed
            }
        }
    }

    async fn check_runtime(&self, instance: &InstanceRecord) -> ProbeResult {
        match self.workload.instance_health(&instance.id).await {
            Ok(RuntimeHealth::Healthy) => ProbeResult::Healthy,
            Ok(RuntimeHealth::Unhealthy) | Ok(RuntimeHealth::Starting) => ProbeResult::Unhealthy,
            Ok(RuntimeHealth::NotConfigured) => {
                // No runtime-level check: running is good enough.
                match self.workload.instance_status(&instance.id).await {
                    Ok(status) if status.is_up() => ProbeResult::Healthy,
                    Ok(_) => ProbeResult::Unhealthy,
                    Err(e) => {
                        debug!(instance = %instance.id, error = %e, "status lookup failed");
                        ProbeResult::Failed
                    }
                }
            }
            Err(e) => {
                debug!(instance = %instance.id, error = %e, "runtime health lookup failed");
                ProbeResult::Failed
            }
        }
    }
}

/// Perform an HTTP GET against `http://{address}{path}`.
///
/// Returns `Healthy` if the status is in `accepted`, `Unhealthy` for any
/// other status, or `Failed` if the connection fails or times out.
pub async fn http_probe(
    address: &str,
    path: &str,
    accepted: &BTreeSet<u16>,
    timeout: Duration,
) -> ProbeResult {
    let uri = format!("http://{address}{path}");

    let result = tokio::time::timeout(timeout, async {
        let stream = match tokio::net::TcpStream::connect(address).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %uri, "health probe connection failed");
                return ProbeResult::Failed;
            }
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, %uri, "health probe handshake failed");
                return ProbeResult::Failed;
            }
        };

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = match http::Request::builder()
            .method("GET")
            .uri(path)
            .header("host", address)
            .header("user-agent", "cutover-health/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
        {
            Ok(req) => req,
            Err(e) => {
                debug!(error = %e, %uri, "health probe request invalid");
                return ProbeResult::Failed;
            }
        };

        match sender.send_request(req).await {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if accepted.contains(&status) {
                    ProbeResult::Healthy
                } else {
                    debug!(status, %uri, "health probe status not accepted");
                    ProbeResult::Unhealthy
                }
            }
            Err(e) => {
                debug!(error = %e, %uri, "health probe request failed");
                ProbeResult::Failed
            }
        }
    })
    .await;

    match result {
        Ok(probe) => probe,
        Err(_) => {
            debug!(%uri, "health probe timed out");
            ProbeResult::Failed
        }
    }
}
