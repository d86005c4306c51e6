//! cutover-workload — concrete Workload Port backends.
//!
//! - **`docker`** — drives the `docker` CLI (`provider = "docker"`)
//! - **`memory`** — simulated instances held in process (`provider = "memory"`)
//!
//! [`build_workload`] is the configuration-driven factory the orchestrator
//! calls; an unknown provider is a configuration error.

pub mod docker;
pub mod memory;

use std::sync::Arc;

use cutover_core::{ConfigError, ConfigResult, EnvironmentConfig, WorkloadPort};

pub use docker::DockerWorkload;
pub use memory::{MemoryWorkload, StopCall};

/// Select the Workload Port for an environment.
pub fn build_workload(env: &EnvironmentConfig) -> ConfigResult<Arc<dyn WorkloadPort>> {
    match env.provider.as_str() {
        "docker" => Ok(Arc::new(DockerWorkload::from_settings(
            &env.name,
            &env.provider_settings,
        ))),
        "memory" => Ok(Arc::new(match env.provider_settings.get("address") {
            Some(address) => MemoryWorkload::with_address(address),
            None => MemoryWorkload::new(),
        })),
        other => Err(ConfigError::UnknownProvider {
            environment: env.name.clone(),
            provider: other.to_string(),
        }),
    }
}
