//! Everything a strategy needs for one deployment invocation.

use std::sync::Arc;
use std::time::Duration;

use tracing::Span;

use cutover_core::{CancelSignal, Clock, EnvironmentConfig, SystemClock, WorkloadPort};
use cutover_health::HealthChecker;
use cutover_proxy::TrafficCutover;

/// Whether the run moves forward to a new image or back to a recorded one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployMode {
    Deploy,
    Rollback,
}

/// Collaborators and limits for one deploy or rollback.
///
/// Built once per invocation by the orchestrator and shared by reference
/// across every service in the run.
#[derive(Clone)]
pub struct DeployContext {
    pub environment: String,
    /// Image (or recorded version) being rolled out.
    pub image: String,
    pub mode: DeployMode,
    pub workload: Arc<dyn WorkloadPort>,
    pub checker: HealthChecker,
    /// `None` when the environment has no proxy block.
    pub cutover: Option<TrafficCutover>,
    pub clock: Arc<dyn Clock>,
    pub cancel: CancelSignal,
    /// Superseded instances kept for fast rollback.
    pub retain_instances: usize,
    pub health_timeout: Duration,
    pub startup_timeout: Duration,
    /// Parent span for every event of this run.
    pub span: Span,
}

impl DeployContext {
    pub fn new(environment: &str, image: &str, workload: Arc<dyn WorkloadPort>) -> Self {
        Self {
            environment: environment.to_string(),
            image: image.to_string(),
            mode: DeployMode::Deploy,
            checker: HealthChecker::new(workload.clone()),
            workload,
            cutover: None,
            clock: Arc::new(SystemClock),
            cancel: CancelSignal::never(),
            retain_instances: 2,
            health_timeout: Duration::from_secs(300),
            startup_timeout: Duration::from_secs(60),
            span: Span::none(),
        }
    }

    /// Take retention and timeouts from the environment's configuration.
    pub fn with_limits(mut self, env: &EnvironmentConfig) -> Self {
        self.retain_instances = env.retain_instances;
        self.health_timeout = Duration::from_secs(env.health_timeout_secs);
        self.startup_timeout = Duration::from_secs(env.startup_timeout_secs);
        self
    }

    pub fn with_mode(mut self, mode: DeployMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_cutover(mut self, cutover: Option<TrafficCutover>) -> Self {
        self.cutover = cutover;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}
