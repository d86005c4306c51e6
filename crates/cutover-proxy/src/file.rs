//! JSON upstream manifest for an external proxy to watch.
//!
//! The manifest maps each service to the endpoints that should receive its
//! traffic. Writes go to a sibling temp file which is then renamed over
//! the manifest, so a watcher never reads a half-written file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use cutover_core::InstanceRecord;

use crate::switch::{upstream_endpoint, SwitchError, SwitchResult, SwitchStatus, TrafficSwitch};

/// On-disk manifest layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UpstreamManifest {
    #[serde(default)]
    pub services: BTreeMap<String, Vec<String>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Traffic switch that rewrites an upstream manifest file.
#[derive(Debug)]
pub struct FileSwitch {
    path: PathBuf,
    /// Serializes read-modify-write cycles from this process.
    lock: Mutex<()>,
}

impl FileSwitch {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the manifest. A missing file is an empty manifest.
    pub async fn read_manifest(&self) -> SwitchResult<UpstreamManifest> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(UpstreamManifest::default()),
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| SwitchError::Manifest(format!("{}: {e}", self.path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(UpstreamManifest::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_manifest(&self, manifest: &UpstreamManifest) -> SwitchResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(manifest)
            .map_err(|e| SwitchError::Manifest(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl TrafficSwitch for FileSwitch {
    fn kind(&self) -> &str {
        "file"
    }

    async fn switch_traffic(
        &self,
        service: &str,
        from: &[InstanceRecord],
        to: &InstanceRecord,
    ) -> SwitchResult<()> {
        let _guard = self.lock.lock().await;

        let mut manifest = self.read_manifest().await?;
        let endpoint = upstream_endpoint(to);
        manifest
            .services
            .insert(service.to_string(), vec![endpoint.clone()]);
        manifest.updated_at = Some(Utc::now());
        self.write_manifest(&manifest).await?;

        info!(
            %service,
            to = %endpoint,
            replaced = from.len(),
            path = %self.path.display(),
            "upstream manifest updated"
        );
        Ok(())
    }

    async fn restore_traffic(&self, service: &str, instances: &[InstanceRecord]) -> SwitchResult<()> {
        let _guard = self.lock.lock().await;

        let mut manifest = self.read_manifest().await?;
        if instances.is_empty() {
            manifest.services.remove(service);
        } else {
            manifest
                .services
                .insert(service.to_string(), instances.iter().map(upstream_endpoint).collect());
        }
        manifest.updated_at = Some(Utc::now());
        self.write_manifest(&manifest).await?;

        info!(%service, upstreams = instances.len(), path = %self.path.display(), "upstream manifest restored");
        Ok(())
    }

    async fn status(&self) -> SwitchResult<SwitchStatus> {
        let manifest = self.read_manifest().await?;
        let status = match manifest.updated_at {
            Some(at) => format!("updated {}", at.to_rfc3339()),
            None => "empty".to_string(),
        };
        Ok(SwitchStatus {
            kind: "file".to_string(),
            status,
            upstreams: manifest.services,
        })
    }
}
