//! In-process upstream table used by the `router` traffic switch backend.
//!
//! A switch replaces a service's whole backend list in one write, so
//! readers see either the old set or the new one.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::{debug, info};

use cutover_core::InstanceRecord;

use crate::switch::{upstream_endpoint, SwitchResult, SwitchStatus, TrafficSwitch};

/// A backend endpoint that can serve traffic.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Backend {
    pub instance_id: String,
    /// `address[:port]` to forward to.
    pub endpoint: String,
}

impl Backend {
    pub fn for_instance(instance: &InstanceRecord) -> Self {
        Self {
            instance_id: instance.id.clone(),
            endpoint: upstream_endpoint(instance),
        }
    }
}

/// Service name → backends currently receiving its traffic.
#[derive(Clone, Default)]
pub struct Router {
    services: Arc<RwLock<HashMap<String, Vec<Backend>>>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the backends for a service.
    pub fn update_service(&self, service_name: &str, backends: Vec<Backend>) {
        let mut services = self.services.write().unwrap_or_else(PoisonError::into_inner);
        debug!(
            service = service_name,
            count = backends.len(),
            "updated service backends"
        );
        services.insert(service_name.to_string(), backends);
    }

    /// Drop a service's route.
    pub fn remove_service(&self, service_name: &str) {
        let mut services = self.services.write().unwrap_or_else(PoisonError::into_inner);
        if services.remove(service_name).is_some() {
            debug!(service = service_name, "service route removed");
        }
    }

    /// All backends for a service.
    pub fn get_backends(&self, service_name: &str) -> Vec<Backend> {
        let services = self.services.read().unwrap_or_else(PoisonError::into_inner);
        services.get(service_name).cloned().unwrap_or_default()
    }

    /// Service name → endpoints, sorted by service.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<String>> {
        let services = self.services.read().unwrap_or_else(PoisonError::into_inner);
        services
            .iter()
            .map(|(name, backends)| {
                (
                    name.clone(),
                    backends.iter().map(|b| b.endpoint.clone()).collect(),
                )
            })
            .collect()
    }
}

/// Traffic switch that rewrites an in-process [`Router`].
#[derive(Clone, Default)]
pub struct RouterSwitch {
    router: Router,
}

impl RouterSwitch {
    pub fn new(router: Router) -> Self {
        Self { router }
    }

    /// Access the underlying router.
    pub fn router(&self) -> &Router {
        &self.router
    }
}

#[async_trait]
impl TrafficSwitch for RouterSwitch {
    fn kind(&self) -> &str {
        "router"
    }

    async fn switch_traffic(
        &self,
        service: &str,
        from: &[InstanceRecord],
        to: &InstanceRecord,
    ) -> SwitchResult<()> {
        let backend = Backend::for_instance(to);
        info!(
            %service,
            to = %backend.endpoint,
            replaced = from.len(),
            "router upstream switched"
        );
        self.router.update_service(service, vec![backend]);
        Ok(())
    }

    async fn restore_traffic(&self, service: &str, instances: &[InstanceRecord]) -> SwitchResult<()> {
        if instances.is_empty() {
            self.router.remove_service(service);
        } else {
            self.router
                .update_service(service, instances.iter().map(Backend::for_instance).collect());
        }
        info!(%service, upstreams = instances.len(), "router upstream restored");
        Ok(())
    }

    async fn status(&self) -> SwitchResult<SwitchStatus> {
        Ok(SwitchStatus {
            kind: "router".to_string(),
            status: "active".to_string(),
            upstreams: self.router.snapshot(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc;
    use cutover_core::{InstanceStatus, PortMapping};

    fn make_backend(id: &str, endpoint: &str) -> Backend {
        Backend {
            instance_id: id.to_string(),
            endpoint: endpoint.to_string(),
        }
    }

    fn instance(id: &str, address: &str) -> InstanceRecord {
        InstanceRecord {
            id: id.to_string(),
            name: format!("web-{id}"),
            service: "web".to_string(),
            status: InstanceStatus::Running,
            created_at: Utc::now(),
            address: address.to_string(),
            ports: vec![PortMapping { host: 8080, container: 3000 }],
        }
    }

    #[test]
    fn update_replaces_whole_backend_list() {
        let router = Router::new();
        router.update_service(
            "web",
            vec![make_backend("a", "10.0.0.1:3000"), make_backend("b", "10.0.0.2:3000")],
        );
        router.update_service("web", vec![make_backend("c", "10.0.0.3:3000")]);

        assert_eq!(router.get_backends("web"), vec![make_backend("c", "10.0.0.3:3000")]);
        assert!(router.get_backends("db").is_empty());
        assert_eq!(router.snapshot()["web"], vec!["10.0.0.3:3000"]);
    }

    #[tokio::test]
    async fn restore_routes_back_to_previous_instances() {
        let switch = RouterSwitch::default();
        let old = vec![instance("o1", "10.0.0.1"), instance("o2", "10.0.0.2")];
        let new = instance("new", "10.0.0.9");
        switch.switch_traffic("web", &old, &new).await.unwrap();

        switch.restore_traffic("web", &old).await.unwrap();

        let ids: Vec<String> = switch
            .router()
            .get_backends("web")
            .into_iter()
            .map(|b| b.instance_id)
            .collect();
        assert_eq!(ids, vec!["o1", "o2"]);
    }

    #[tokio::test]
    async fn restore_to_nothing_drops_the_route() {
        let switch = RouterSwitch::default();
        switch.switch_traffic("web", &[], &instance("new", "10.0.0.9")).await.unwrap();

        switch.restore_traffic("web", &[]).await.unwrap();

        assert!(switch.router().get_backends("web").is_empty());
        assert!(!switch.status().await.unwrap().upstreams.contains_key("web"));
    }

    #[tokio::test]
    async fn switch_replaces_old_backends_with_new_instance() {
        let switch = RouterSwitch::default();
        let old = instance("old", "10.0.0.1");
        switch.router().update_service("web", vec![Backend::for_instance(&old)]);

        let new = instance("new", "10.0.0.2");
        switch.switch_traffic("web", &[old], &new).await.unwrap();

        let backends = switch.router().get_backends("web");
        assert_eq!(backends, vec![make_backend("new", "10.0.0.2:3000")]);

        let status = switch.status().await.unwrap();
        assert_eq!(status.kind, "router");
        assert_eq!(status.upstreams["web"], vec!["10.0.0.2:3000"]);
    }
}
