//! Deployer — runs deploys and rollbacks for named environments.
//!
//! Each invocation resolves the environment's backends, records a
//! `started` ledger entry, runs the strategy over every service in
//! declaration order, and records exactly one terminal entry before
//! returning. Invocations against the same environment are serialized.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, info_span, warn, Instrument, Span};

use cutover_core::*;
use cutover_ledger::{Ledger, LedgerEntry, LedgerError, ROLLBACK_STRATEGY};
use cutover_proxy::SwitchStatus;
use cutover_rollout::{build_strategy, DeployContext, DeployMode, ServiceReport};

use crate::error::{DeployerError, DeployerResult};
use crate::providers::{ConfiguredProviders, ProviderFactory};

/// Outcome of a successful deploy or rollback.
#[derive(Debug, Clone, Serialize)]
pub struct DeployReport {
    pub environment: String,
    pub image: String,
    /// Strategy name as recorded in the ledger.
    pub strategy: String,
    pub zero_downtime: bool,
    pub services: Vec<ServiceReport>,
}

/// Current state of an environment.
#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentStatus {
    pub environment: String,
    pub provider: String,
    pub services: Vec<ServiceStatus>,
    /// `None` when no proxy is configured.
    pub traffic: Option<SwitchStatus>,
}

/// The orchestrator.
pub struct Deployer {
    config: DeployConfig,
    ledger: Ledger,
    providers: Arc<dyn ProviderFactory>,
    clock: Arc<dyn Clock>,
    /// One lock per environment name.
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Deployer {
    /// Create a deployer that builds backends from `config`.
    pub fn new(config: DeployConfig, ledger: Ledger) -> Self {
        Self {
            config,
            ledger,
            providers: Arc::new(ConfiguredProviders::new()),
            clock: Arc::new(SystemClock),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_providers(mut self, providers: Arc<dyn ProviderFactory>) -> Self {
        self.providers = providers;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Deploy `image` to every service of `environment`.
    ///
    /// `strategy` overrides the environment's configured strategy.
    pub async fn deploy(
        &self,
        environment: &str,
        image: &str,
        strategy: Option<StrategyKind>,
    ) -> DeployerResult<DeployReport> {
        self.deploy_with_cancel(environment, image, strategy, CancelSignal::never())
            .await
    }

    pub async fn deploy_with_cancel(
        &self,
        environment: &str,
        image: &str,
        strategy: Option<StrategyKind>,
        cancel: CancelSignal,
    ) -> DeployerResult<DeployReport> {
        self.run(environment, image, strategy, DeployMode::Deploy, cancel)
            .await
    }

    /// Redeploy a previously recorded `version` to `environment`.
    pub async fn rollback(&self, environment: &str, version: &str) -> DeployerResult<DeployReport> {
        self.rollback_with_cancel(environment, version, CancelSignal::never())
            .await
    }

    pub async fn rollback_with_cancel(
        &self,
        environment: &str,
        version: &str,
        cancel: CancelSignal,
    ) -> DeployerResult<DeployReport> {
        self.run(environment, version, None, DeployMode::Rollback, cancel)
            .await
    }

    /// Instances per service, plus the traffic switch state if configured.
    pub async fn status(&self, environment: &str) -> DeployerResult<EnvironmentStatus> {
        let env = self.config.environment(environment)?;
        let providers = self.providers.resolve(env)?;

        let services = providers.workload.status(&env.services).await?;
        let traffic = match &providers.cutover {
            Some(cutover) => Some(cutover.status().await?),
            None => None,
        };
        Ok(EnvironmentStatus {
            environment: env.name.clone(),
            provider: providers.workload.name().to_string(),
            services,
            traffic,
        })
    }

    async fn run(
        &self,
        environment: &str,
        image: &str,
        strategy: Option<StrategyKind>,
        mode: DeployMode,
        cancel: CancelSignal,
    ) -> DeployerResult<DeployReport> {
        // Nothing is recorded until configuration has resolved.
        let env = self.config.environment(environment)?;
        let providers = self.providers.resolve(env)?;
        let strategy = build_strategy(strategy.unwrap_or(env.strategy));
        let recorded_strategy = match mode {
            DeployMode::Deploy => strategy.name(),
            DeployMode::Rollback => ROLLBACK_STRATEGY,
        };

        let lock = self.environment_lock(&env.name);
        let _guard = lock.lock().await;

        if mode == DeployMode::Rollback {
            self.check_rollback_candidate(&env.name, image).await?;
        }

        let span = info_span!("deploy", environment = %env.name, image = %image, strategy = recorded_strategy);
        self.record(&span, LedgerEntry::started(&env.name, image, recorded_strategy))
            .await?;

        let cancel = match env.deploy_timeout_secs {
            Some(secs) => cancel.with_deadline(self.clock.now() + Duration::from_secs(secs)),
            None => cancel,
        };
        let ctx = DeployContext::new(&env.name, image, providers.workload)
            .with_limits(env)
            .with_mode(mode)
            .with_cutover(providers.cutover)
            .with_clock(self.clock.clone())
            .with_cancel(cancel)
            .with_span(span.clone());

        info!(
            parent: &span,
            zero_downtime = strategy.zero_downtime(),
            services = env.services.len(),
            "deployment started"
        );
        let outcome = strategy
            .deploy_all(&ctx, &env.services)
            .instrument(span.clone())
            .await;

        match outcome {
            Ok(services) => {
                self.record(&span, LedgerEntry::success(&env.name, image, recorded_strategy))
                    .await?;
                info!(parent: &span, services = services.len(), "deployment succeeded");
                Ok(DeployReport {
                    environment: env.name.clone(),
                    image: image.to_string(),
                    strategy: recorded_strategy.to_string(),
                    zero_downtime: strategy.zero_downtime(),
                    services,
                })
            }
            Err(e) => {
                warn!(parent: &span, error = %e, "deployment failed");
                let entry = LedgerEntry::failed(&env.name, image, recorded_strategy, &e.to_string());
                self.record(&span, entry).await?;
                Err(DeployerError::Deployment(e))
            }
        }
    }

    /// Warn when `version` is not a known good image. It may have been
    /// evicted from the ledger, so the rollback still proceeds.
    async fn check_rollback_candidate(&self, environment: &str, version: &str) -> DeployerResult<()> {
        let ledger = self.ledger.clone();
        let env = environment.to_string();
        let candidates = tokio::task::spawn_blocking(move || ledger.available_versions(&env))
            .await
            .map_err(|e| LedgerError::Read(format!("ledger task failed: {e}")))??;
        if !candidates.iter().any(|v| v == version) {
            warn!(
                %environment,
                %version,
                known = ?candidates,
                "rollback target is not a recorded successful version"
            );
        }
        Ok(())
    }

    /// Append `entry` on the blocking pool; the ledger does synchronous file I/O.
    async fn record(&self, span: &Span, entry: LedgerEntry) -> DeployerResult<()> {
        let ledger = self.ledger.clone();
        let span = span.clone();
        tokio::task::spawn_blocking(move || span.in_scope(|| ledger.record(entry)))
            .await
            .map_err(|e| LedgerError::Write(format!("ledger task failed: {e}")))??;
        Ok(())
    }

    fn environment_lock(&self, environment: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(environment.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}
