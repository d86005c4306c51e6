//! cutover-proxy — moving live traffic from old instances to a new one.
//!
//! # Components
//!
//! - **`switch`** — the `TrafficSwitch` port contract and its error type
//! - **`router`** — in-process upstream table with round-robin selection
//! - **`file`** — JSON upstream manifest for an external proxy to watch
//! - **`verify`** — post-switch polling of the public health URL
//! - **`cutover`** — the switch protocol: switch, then verify if a domain is set
//!
//! Backends are selected by [`build_switch`] from the environment's
//! `[proxy]` block. No proxy block means no switch: the strategy logs and
//! leaves routing to whatever is wired up externally.

pub mod cutover;
pub mod file;
pub mod router;
pub mod switch;
pub mod verify;

use std::sync::Arc;

use cutover_core::{ConfigError, ConfigResult, EnvironmentConfig};

pub use cutover::TrafficCutover;
pub use file::FileSwitch;
pub use router::{Backend, Router, RouterSwitch};
pub use switch::{upstream_endpoint, SwitchError, SwitchResult, SwitchStatus, TrafficSwitch};
pub use verify::Verifier;

/// Select the traffic switch backend for an environment, if it has one.
pub fn build_switch(env: &EnvironmentConfig) -> ConfigResult<Option<Arc<dyn TrafficSwitch>>> {
    let Some(proxy) = &env.proxy else {
        return Ok(None);
    };
    let switch: Arc<dyn TrafficSwitch> = match proxy.kind.as_str() {
        "router" => Arc::new(RouterSwitch::new(Router::new())),
        "file" => {
            let path = proxy.settings.get("path").ok_or_else(|| ConfigError::Invalid {
                environment: env.name.clone(),
                message: "file proxy needs settings.path".to_string(),
            })?;
            Arc::new(FileSwitch::new(path))
        }
        other => {
            return Err(ConfigError::UnknownProxy {
                environment: env.name.clone(),
                kind: other.to_string(),
            });
        }
    };
    Ok(Some(switch))
}

/// Build the full cutover protocol (switch plus optional verification).
pub fn build_cutover(env: &EnvironmentConfig) -> ConfigResult<Option<TrafficCutover>> {
    let Some(switch) = build_switch(env)? else {
        return Ok(None);
    };
    let mut cutover = TrafficCutover::new(switch);
    if let Some(proxy) = &env.proxy {
        if let Some(verifier) = Verifier::from_config(proxy).map_err(|e| ConfigError::Invalid {
            environment: env.name.clone(),
            message: e.to_string(),
        })? {
            cutover = cutover.with_verifier(verifier);
        }
    }
    Ok(Some(cutover))
}
