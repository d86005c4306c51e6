//! Resolving an environment's backends.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use cutover_core::{ConfigResult, EnvironmentConfig, WorkloadPort};
use cutover_proxy::TrafficCutover;

/// The backends one environment runs against.
#[derive(Clone)]
pub struct Providers {
    pub workload: Arc<dyn WorkloadPort>,
    pub cutover: Option<TrafficCutover>,
}

impl Providers {
    pub fn new(workload: Arc<dyn WorkloadPort>, cutover: Option<TrafficCutover>) -> Self {
        Self { workload, cutover }
    }
}

/// Maps environment configuration to backends.
pub trait ProviderFactory: Send + Sync {
    /// Unknown provider or proxy types are configuration errors.
    fn resolve(&self, env: &EnvironmentConfig) -> ConfigResult<Providers>;
}

/// A fixed set of backends used for every environment.
impl ProviderFactory for Providers {
    fn resolve(&self, _env: &EnvironmentConfig) -> ConfigResult<Providers> {
        Ok(self.clone())
    }
}

/// Builds backends from configuration and keeps them per environment, so
/// an in-process router or simulated pool survives between runs.
#[derive(Default)]
pub struct ConfiguredProviders {
    cache: Mutex<HashMap<String, Providers>>,
}

impl ConfiguredProviders {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProviderFactory for ConfiguredProviders {
    fn resolve(&self, env: &EnvironmentConfig) -> ConfigResult<Providers> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(providers) = cache.get(&env.name) {
            return Ok(providers.clone());
        }

        let providers = Providers {
            workload: cutover_workload::build_workload(env)?,
            cutover: cutover_proxy::build_cutover(env)?,
        };
        debug!(
            environment = %env.name,
            provider = %env.provider,
            proxy = ?providers.cutover.as_ref().map(|c| c.kind()),
            "providers resolved"
        );
        cache.insert(env.name.clone(), providers.clone());
        Ok(providers)
    }
}
