//! Traffic Switch Port: the contract every proxy backend implements.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use cutover_core::{InstanceRecord, Interrupted};

/// Result type alias for traffic switch operations.
pub type SwitchResult<T> = Result<T, SwitchError>;

/// Errors raised while switching or verifying traffic.
#[derive(Debug, Error)]
pub enum SwitchError {
    #[error("traffic switch for {service} failed: {message}")]
    Backend { service: String, message: String },

    #[error("upstream manifest io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("upstream manifest is invalid: {0}")]
    Manifest(String),

    #[error("verification client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("traffic verification failed after {attempts} attempts: {last}")]
    Verification { attempts: u32, last: String },

    #[error("traffic verification interrupted: {0}")]
    Interrupted(Interrupted),
}

/// Snapshot of a switch backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SwitchStatus {
    /// Backend type (`router`, `file`).
    pub kind: String,
    pub status: String,
    /// Service name → upstream endpoints currently receiving traffic.
    pub upstreams: BTreeMap<String, Vec<String>>,
}

/// Moves live traffic for one service onto a new instance.
#[async_trait]
pub trait TrafficSwitch: Send + Sync {
    fn kind(&self) -> &str;

    /// Route `service` to `to`, taking it away from `from`. Resolves once the
    /// backend has applied the change.
    async fn switch_traffic(
        &self,
        service: &str,
        from: &[InstanceRecord],
        to: &InstanceRecord,
    ) -> SwitchResult<()>;

    /// Route `service` to exactly `instances` again after a switch that
    /// could not be confirmed. An empty set drops the service's route.
    async fn restore_traffic(&self, service: &str, instances: &[InstanceRecord]) -> SwitchResult<()>;

    async fn status(&self) -> SwitchResult<SwitchStatus>;
}

/// `address:port` a proxy should forward to for `instance`.
///
/// Uses the first container port; an instance without ports is addressed
/// bare.
pub fn upstream_endpoint(instance: &InstanceRecord) -> String {
    match instance.ports.first() {
        Some(port) => format!("{}:{}", instance.address, port.container),
        None => instance.address.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc;
    use cutover_core::{InstanceStatus, PortMapping};

    fn instance(ports: Vec<PortMapping>) -> InstanceRecord {
        InstanceRecord {
            id: "c1".to_string(),
            name: "web-1".to_string(),
            service: "web".to_string(),
            status: InstanceStatus::Running,
            created_at: Utc::now(),
            address: "10.0.0.7".to_string(),
            ports,
        }
    }

    #[test]
    fn endpoint_uses_first_container_port() {
        let inst = instance(vec![
            PortMapping { host: 8080, container: 3000 },
            PortMapping { host: 9090, container: 9090 },
        ]);
        assert_eq!(upstream_endpoint(&inst), "10.0.0.7:3000");
    }

    #[test]
    fn endpoint_without_ports_is_bare_address() {
        assert_eq!(upstream_endpoint(&instance(Vec::new())), "10.0.0.7");
    }
}
