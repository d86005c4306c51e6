//! The traffic switch protocol: move traffic, then confirm it arrived.

use std::sync::Arc;

use tracing::{info, warn};

use cutover_core::{CancelSignal, Clock, InstanceRecord};

use crate::switch::{SwitchResult, SwitchStatus, TrafficSwitch};
use crate::verify::Verifier;

/// A switch backend plus optional post-switch verification.
#[derive(Clone)]
pub struct TrafficCutover {
    switch: Arc<dyn TrafficSwitch>,
    verifier: Option<Verifier>,
}

impl TrafficCutover {
    pub fn new(switch: Arc<dyn TrafficSwitch>) -> Self {
        Self {
            switch,
            verifier: None,
        }
    }

    pub fn with_verifier(mut self, verifier: Verifier) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Whether a switch is followed by a public health check.
    pub fn verifies(&self) -> bool {
        self.verifier.is_some()
    }

    pub fn switch(&self) -> &Arc<dyn TrafficSwitch> {
        &self.switch
    }

    pub fn kind(&self) -> &str {
        self.switch.kind()
    }

    /// Switch `service` from `from` to `to`, then verify.
    ///
    /// Without a verifier the switch is trusted once the backend reports
    /// success. When verification fails or is interrupted, traffic is
    /// routed back to `from` before the error is returned.
    pub async fn run(
        &self,
        service: &str,
        from: &[InstanceRecord],
        to: &InstanceRecord,
        clock: &dyn Clock,
        cancel: &CancelSignal,
    ) -> SwitchResult<()> {
        self.switch.switch_traffic(service, from, to).await?;

        let Some(verifier) = &self.verifier else {
            info!(%service, backend = self.kind(), "no domain configured, switch trusted without verification");
            return Ok(());
        };

        if let Err(e) = verifier.verify(clock, cancel).await {
            warn!(%service, to = %to.id, error = %e, "traffic not confirmed, restoring previous upstreams");
            if let Err(restore) = self.switch.restore_traffic(service, from).await {
                warn!(%service, error = %restore, "failed to restore previous upstreams");
            }
            return Err(e);
        }
        Ok(())
    }

    pub async fn status(&self) -> SwitchResult<SwitchStatus> {
        self.switch.status().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeMap;

    use chrono::Utc;
    use cutover_core::{cancel_pair, InstanceStatus, ManualClock, PortMapping, ProxyConfig};

    use crate::router::{Backend, RouterSwitch};
    use crate::switch::SwitchError;

    fn instance(id: &str) -> InstanceRecord {
        InstanceRecord {
            id: id.to_string(),
            name: format!("web-{id}"),
            service: "web".to_string(),
            status: InstanceStatus::Healthy,
            created_at: Utc::now(),
            address: "127.0.0.1".to_string(),
            ports: vec![PortMapping { host: 8080, container: 3000 }],
        }
    }

    #[tokio::test]
    async fn switch_without_verifier_is_trusted() {
        let router = Arc::new(RouterSwitch::default());
        let cutover = TrafficCutover::new(router.clone());
        assert!(!cutover.verifies());
        assert_eq!(cutover.kind(), "router");

        cutover
            .run("web", &[], &instance("n1"), &ManualClock::new(), &CancelSignal::never())
            .await
            .unwrap();

        assert_eq!(router.router().get_backends("web").len(), 1);
        let status = cutover.status().await.unwrap();
        assert_eq!(status.upstreams["web"], vec!["127.0.0.1:3000"]);
    }

    fn unreachable_proxy(attempts: u32) -> ProxyConfig {
        // Bind and drop to get a port nothing listens on.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        ProxyConfig {
            kind: "router".to_string(),
            domain: Some(format!("127.0.0.1:{port}")),
            ssl: false,
            health_check_path: "/".to_string(),
            verify_attempts: attempts,
            verify_interval_secs: 1,
            verify_header: None,
            verify_status_min: 200,
            verify_status_max: 399,
            settings: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn failed_verification_routes_back_to_old_instances() {
        let router = Arc::new(RouterSwitch::default());
        let old = instance("o1");
        router.router().update_service("web", vec![Backend::for_instance(&old)]);
        let cutover = TrafficCutover::new(router.clone())
            .with_verifier(Verifier::from_config(&unreachable_proxy(2)).unwrap().unwrap());

        let err = cutover
            .run("web", &[old], &instance("n1"), &ManualClock::new(), &CancelSignal::never())
            .await
            .unwrap_err();

        assert!(matches!(err, SwitchError::Verification { attempts: 2, .. }));
        let backends = router.router().get_backends("web");
        assert_eq!(backends.len(), 1);
        assert_eq!(backends[0].instance_id, "o1");
    }

    #[tokio::test]
    async fn failed_verification_on_cold_start_drops_the_route() {
        let router = Arc::new(RouterSwitch::default());
        let cutover = TrafficCutover::new(router.clone())
            .with_verifier(Verifier::from_config(&unreachable_proxy(1)).unwrap().unwrap());

        cutover
            .run("web", &[], &instance("n1"), &ManualClock::new(), &CancelSignal::never())
            .await
            .unwrap_err();

        assert!(router.router().get_backends("web").is_empty());
    }

    #[tokio::test]
    async fn interrupted_verification_also_restores() {
        let router = Arc::new(RouterSwitch::default());
        let old = instance("o1");
        router.router().update_service("web", vec![Backend::for_instance(&old)]);
        let cutover = TrafficCutover::new(router.clone())
            .with_verifier(Verifier::from_config(&unreachable_proxy(5)).unwrap().unwrap());
        let (handle, signal) = cancel_pair();
        handle.cancel();

        let err = cutover
            .run("web", &[old], &instance("n1"), &ManualClock::new(), &signal)
            .await
            .unwrap_err();

        assert!(matches!(err, SwitchError::Interrupted(_)));
        assert_eq!(router.router().get_backends("web")[0].instance_id, "o1");
    }
}
