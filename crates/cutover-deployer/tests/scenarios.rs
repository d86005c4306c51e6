//! End-to-end deployment scenarios.
//!
//! Every test runs the real orchestrator, strategies, health checker, and
//! ledger against the in-memory workload backend on virtual time.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use cutover_core::*;
use cutover_deployer::*;
use cutover_ledger::{EntryStatus, Ledger, LedgerEntry};
use cutover_proxy::{RouterSwitch, TrafficCutover};
use cutover_rollout::{DeploymentError, Phase};
use cutover_workload::MemoryWorkload;

const SINGLE_WEB: &str = r#"
[environments.production]
provider = "memory"

[[environments.production.services]]
name = "web"
ports = ["8080:3000"]
"#;

struct Harness {
    deployer: Deployer,
    workload: Arc<MemoryWorkload>,
    router: Arc<RouterSwitch>,
}

fn harness(toml: &str, with_proxy: bool) -> Harness {
    let config = DeployConfig::from_toml_str(toml).unwrap();
    let workload = Arc::new(MemoryWorkload::new());
    let router = Arc::new(RouterSwitch::default());
    let cutover = with_proxy.then(|| TrafficCutover::new(router.clone()));
    let deployer = Deployer::new(config, Ledger::in_memory())
        .with_providers(Arc::new(Providers::new(workload.clone(), cutover)))
        .with_clock(Arc::new(ManualClock::new()));
    Harness {
        deployer,
        workload,
        router,
    }
}

fn statuses(ledger: &Ledger, environment: &str) -> Vec<EntryStatus> {
    ledger
        .history(Some(environment), None)
        .unwrap()
        .into_iter()
        .rev()
        .map(|e| e.status)
        .collect()
}

/// Answer every request with `status`. Returns the port and a hit counter.
async fn canned_server(status: u16) -> (u16, Arc<AtomicU32>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let hits = Arc::new(AtomicU32::new(0));
    let counter = hits.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let response =
                    format!("HTTP/1.1 {status} Status\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    (port, hits)
}

#[tokio::test]
async fn cold_start_without_health_check_or_proxy() {
    let h = harness(SINGLE_WEB, false);

    let report = h.deployer.deploy("production", "app:v1", None).await.unwrap();

    assert_eq!(report.strategy, "zero_downtime");
    assert!(report.zero_downtime);
    assert_eq!(report.services.len(), 1);
    let service = &report.services[0];
    assert!(service.result.superseded.is_empty());
    assert_eq!(service.phases.last(), Some(&Phase::Done));

    let new_id = service.result.new_instance.clone().unwrap();
    assert_eq!(h.workload.image_of(&new_id).as_deref(), Some("app:v1"));
    assert_eq!(h.workload.env_of(&new_id).unwrap()["ENVIRONMENT"], "production");
    assert!(h.workload.stop_calls().is_empty());

    assert_eq!(
        statuses(h.deployer.ledger(), "production"),
        vec![EntryStatus::Started, EntryStatus::Success]
    );
}

#[tokio::test]
async fn failing_http_health_check_times_out_after_max_attempts() {
    let (port, hits) = canned_server(500).await;
    let toml = format!(
        r#"
[environments.production]
provider = "memory"

[[environments.production.services]]
name = "web"
ports = ["8080:3000"]
health_check = {{ type = "http", path = "/health", port = {port}, expected_status = [200, 204], max_attempts = 3, interval = 1 }}
"#
    );
    let h = harness(&toml, false);
    let old = h
        .workload
        .seed_instance("web", "app:v1", InstanceStatus::Running, Utc::now() - TimeDelta::hours(1));

    let err = h.deployer.deploy("production", "app:v2", None).await.unwrap_err();

    let deployment = err.deployment().expect("deployment error");
    match deployment.root_cause() {
        DeploymentError::HealthCheckTimeout { attempts, .. } => assert_eq!(*attempts, 3),
        other => panic!("expected health check timeout, got {other:?}"),
    }
    assert_eq!(hits.load(Ordering::SeqCst), 3);

    // The new instance was force-stopped and is gone; the old one still runs.
    let forced: Vec<_> = h.workload.stop_calls().into_iter().filter(|c| !c.graceful).collect();
    assert_eq!(forced.len(), 1);
    let remaining = h.workload.list_all_instances("web").await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, old.id);
    assert_eq!(remaining[0].status, InstanceStatus::Running);

    let history = h.deployer.ledger().history(Some("production"), None).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status, EntryStatus::Failed);
    assert!(history[0].error.as_deref().unwrap().contains("not ready after 3 attempts"));
    assert_eq!(history[1].status, EntryStatus::Started);
}

#[tokio::test]
async fn drain_failure_on_one_old_instance_does_not_fail_deploy() {
    let h = harness(SINGLE_WEB, true);
    let base = Utc::now() - TimeDelta::hours(1);
    let stuck = h.workload.seed_instance("web", "app:v1", InstanceStatus::Running, base);
    let fine = h
        .workload
        .seed_instance("web", "app:v1", InstanceStatus::Running, base + TimeDelta::minutes(1));
    h.workload.fail_stop_for(&stuck.id);

    let report = h.deployer.deploy("production", "app:v2", None).await.unwrap();

    let result = &report.services[0].result;
    assert!(result.is_success());
    assert_eq!(result.superseded.len(), 2);

    let attempted: Vec<_> = h.workload.stop_calls().into_iter().map(|c| c.id).collect();
    assert!(attempted.contains(&stuck.id));
    assert!(attempted.contains(&fine.id));
    assert_eq!(h.workload.instance(&fine.id).unwrap().status, InstanceStatus::Exited);

    let new_id = result.new_instance.clone().unwrap();
    let backends = h.router.router().get_backends("web");
    assert_eq!(backends.len(), 1);
    assert_eq!(backends[0].instance_id, new_id);

    assert_eq!(
        statuses(h.deployer.ledger(), "production"),
        vec![EntryStatus::Started, EntryStatus::Success]
    );
}

#[tokio::test]
async fn every_invocation_adds_one_started_and_one_terminal_entry() {
    let h = harness(SINGLE_WEB, false);

    h.deployer.deploy("production", "app:v1", None).await.unwrap();
    h.workload.fail_start(true);
    h.deployer.deploy("production", "app:v2", None).await.unwrap_err();
    h.workload.fail_start(false);
    h.deployer.deploy("production", "app:v3", Some(StrategyKind::Basic)).await.unwrap();

    let stats = h.deployer.ledger().statistics(Some("production")).unwrap();
    assert_eq!(stats.started, 3);
    assert_eq!(stats.successful, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.success_rate, 66.67);

    let history = h.deployer.ledger().history(Some("production"), None).unwrap();
    assert_eq!(history[0].strategy, "basic");
    assert_eq!(
        h.deployer.ledger().available_versions("production").unwrap(),
        vec!["app:v3", "app:v1"]
    );
}

#[tokio::test]
async fn configuration_errors_write_nothing() {
    let h = harness(SINGLE_WEB, false);

    let err = h.deployer.deploy("staging", "app:v1", None).await.unwrap_err();
    assert!(err.is_configuration());

    let config = DeployConfig::from_toml_str("[environments.production]\nprovider = \"nomad\"\n").unwrap();
    let deployer = Deployer::new(config, Ledger::in_memory());
    let err = deployer.deploy("production", "app:v1", None).await.unwrap_err();
    assert!(err.is_configuration());
    assert!(deployer.ledger().entries().unwrap().is_empty());
    assert!(h.deployer.ledger().entries().unwrap().is_empty());
}

#[tokio::test]
async fn rollback_redeploys_recorded_version() {
    let h = harness(SINGLE_WEB, true);
    h.deployer.deploy("production", "app:v1", None).await.unwrap();
    h.deployer.deploy("production", "app:v2", None).await.unwrap();

    let report = h.deployer.rollback("production", "app:v1").await.unwrap();

    assert_eq!(report.strategy, "rollback");
    let new_id = report.services[0].result.new_instance.clone().unwrap();
    assert_eq!(h.workload.image_of(&new_id).as_deref(), Some("app:v1"));
    assert_eq!(h.router.router().get_backends("web")[0].instance_id, new_id);

    let latest: LedgerEntry = h.deployer.ledger().history(Some("production"), Some(1)).unwrap().remove(0);
    assert_eq!(latest.strategy, "rollback");
    assert_eq!(latest.status, EntryStatus::Success);

    // Unknown versions only warn.
    h.deployer.rollback("production", "app:v0").await.unwrap();
}

#[tokio::test]
async fn rollback_with_legacy_strategy_calls_backend_rollback() {
    let toml = r#"
[environments.production]
provider = "memory"
strategy = "legacy"

[[environments.production.services]]
name = "web"
"#;
    let h = harness(toml, false);

    let report = h.deployer.rollback("production", "app:v1").await.unwrap();

    assert!(!report.zero_downtime);
    assert_eq!(
        h.workload.legacy_calls(),
        vec![("rollback".to_string(), "app:v1".to_string(), "production".to_string())]
    );
}

#[tokio::test]
async fn status_reports_instances_and_traffic() {
    let h = harness(SINGLE_WEB, true);
    h.deployer.deploy("production", "app:v1", None).await.unwrap();

    let status = h.deployer.status("production").await.unwrap();

    assert_eq!(status.provider, "memory");
    assert_eq!(status.services.len(), 1);
    assert_eq!(status.services[0].instances.len(), 1);
    let traffic = status.traffic.unwrap();
    assert_eq!(traffic.kind, "router");
    assert_eq!(traffic.upstreams["web"], vec!["127.0.0.1:3000"]);
}

#[tokio::test]
async fn deploy_timeout_interrupts_and_records_failure() {
    let toml = r#"
[environments.production]
provider = "memory"
deploy_timeout_secs = 5

[[environments.production.services]]
name = "web"
"#;
    let h = harness(toml, false);
    h.workload.set_start_status(InstanceStatus::Starting);

    let err = h.deployer.deploy("production", "app:v1", None).await.unwrap_err();

    assert!(err.deployment().unwrap().is_cancelled());
    assert!(h.workload.list_all_instances("web").await.unwrap().is_empty());
    assert_eq!(
        statuses(h.deployer.ledger(), "production"),
        vec![EntryStatus::Started, EntryStatus::Failed]
    );
}

#[tokio::test]
async fn cancelled_run_skips_remaining_services() {
    let toml = r#"
[environments.production]
provider = "memory"

[[environments.production.services]]
name = "web"

[[environments.production.services]]
name = "worker"
"#;
    let h = harness(toml, false);
    let (handle, signal) = cancel_pair();
    handle.cancel();

    let err = h
        .deployer
        .deploy_with_cancel("production", "app:v1", None, signal)
        .await
        .unwrap_err();

    assert!(err.deployment().unwrap().is_cancelled());
    assert!(h.workload.list_all_instances("web").await.unwrap().is_empty());
    assert!(h.workload.list_all_instances("worker").await.unwrap().is_empty());
}

/// Memory backend whose starts hand the scheduler back several times, so
/// two unserialized runs would interleave. Tracks overlapping starts.
struct YieldingWorkload {
    inner: Arc<MemoryWorkload>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl YieldingWorkload {
    fn new(inner: Arc<MemoryWorkload>) -> Self {
        Self {
            inner,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl WorkloadPort for YieldingWorkload {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn start_instance(&self, spec: &LaunchSpec) -> WorkloadResult<InstanceRecord> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        let started = self.inner.start_instance(spec).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        started
    }

    async fn stop_instance(&self, id: &str, graceful: bool, timeout: Duration) -> WorkloadResult<()> {
        tokio::task::yield_now().await;
        self.inner.stop_instance(id, graceful, timeout).await
    }

    async fn remove_instance(&self, id: &str) -> WorkloadResult<()> {
        self.inner.remove_instance(id).await
    }

    async fn list_running_instances(&self, service: &str) -> WorkloadResult<Vec<InstanceRecord>> {
        tokio::task::yield_now().await;
        self.inner.list_running_instances(service).await
    }

    async fn list_all_instances(&self, service: &str) -> WorkloadResult<Vec<InstanceRecord>> {
        self.inner.list_all_instances(service).await
    }

    async fn instance_status(&self, id: &str) -> WorkloadResult<InstanceStatus> {
        tokio::task::yield_now().await;
        self.inner.instance_status(id).await
    }

    async fn instance_health(&self, id: &str) -> WorkloadResult<RuntimeHealth> {
        self.inner.instance_health(id).await
    }

    async fn exec_in_instance(&self, id: &str, command: &str) -> WorkloadResult<ExecOutput> {
        self.inner.exec_in_instance(id, command).await
    }

    async fn deploy(
        &self,
        image: &str,
        environment: &str,
        services: &[ServiceSpec],
    ) -> WorkloadResult<Vec<DeploymentResult>> {
        self.inner.deploy(image, environment, services).await
    }

    async fn rollback(
        &self,
        version: &str,
        environment: &str,
        services: &[ServiceSpec],
    ) -> WorkloadResult<Vec<DeploymentResult>> {
        self.inner.rollback(version, environment, services).await
    }
}

#[tokio::test]
async fn runs_on_one_environment_are_serialized() {
    let config = DeployConfig::from_toml_str(SINGLE_WEB).unwrap();
    let memory = Arc::new(MemoryWorkload::new());
    let workload = Arc::new(YieldingWorkload::new(memory.clone()));
    let deployer = Deployer::new(config, Ledger::in_memory())
        .with_providers(Arc::new(Providers::new(workload.clone(), None)))
        .with_clock(Arc::new(ManualClock::new()));

    let (a, b) = tokio::join!(
        deployer.deploy("production", "app:v1", None),
        deployer.deploy("production", "app:v2", None),
    );
    let first = a.unwrap().services[0].result.new_instance.clone().unwrap();
    let second = b.unwrap().services[0].result.new_instance.clone().unwrap();

    assert_eq!(workload.max_in_flight.load(Ordering::SeqCst), 1);
    let entries: Vec<_> = deployer
        .ledger()
        .history(Some("production"), None)
        .unwrap()
        .into_iter()
        .rev()
        .map(|e| (e.status, e.image))
        .collect();
    assert_eq!(
        entries,
        vec![
            (EntryStatus::Started, "app:v1".to_string()),
            (EntryStatus::Success, "app:v1".to_string()),
            (EntryStatus::Started, "app:v2".to_string()),
            (EntryStatus::Success, "app:v2".to_string()),
        ]
    );
    // The second run saw the first run's instance and drained it with the default timeout.
    let calls = memory.stop_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].id, first);
    assert_eq!(calls[0].timeout, Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS));
    assert!(memory.stop_calls().iter().all(|c| c.id != second));
}

#[tokio::test]
async fn file_ledger_keeps_history_across_deployers() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join(".cutover").join("history.json");
    let config = DeployConfig::from_toml_str(SINGLE_WEB).unwrap();
    let workload = Arc::new(MemoryWorkload::new());
    let providers = Arc::new(Providers::new(workload, None));

    let first = Deployer::new(config.clone(), Ledger::open(&path))
        .with_providers(providers.clone())
        .with_clock(Arc::new(ManualClock::new()));
    first.deploy("production", "app:v1", None).await.unwrap();

    let second = Deployer::new(config, Ledger::open(&path))
        .with_providers(providers)
        .with_clock(Arc::new(ManualClock::new()));
    assert_eq!(
        second.ledger().last_successful("production").unwrap().unwrap().image,
        "app:v1"
    );
    second.rollback("production", "app:v1").await.unwrap();
    assert_eq!(second.ledger().entries().unwrap().len(), 4);
}
