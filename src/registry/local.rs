// Local content-cache registry lifecycle.
//
// One registry container per cluster, named from the cluster, backed by the
// shared volume. The K3s distribution is the deliberate exception: its
// native tooling owns the registry lifecycle and KSail only waits for it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use lazy_static::lazy_static;
use tracing::{debug, info};

use super::{LocalRegistry, RegistryError, REGISTRY_CONTAINER_PORT, REGISTRY_IMAGE};
use crate::engine::{ContainerEngine, ContainerRunSpec, ContainerStatus};
use crate::spec::Distribution;
use crate::ui::StageInfo;

pub const PROVISION_STAGE: StageInfo = StageInfo {
    title: "Provisioning local registry",
    emoji: "📦",
    activity: "creating registry container",
    success: "Local registry ready",
    failure_prefix: "failed to provision local registry",
};

pub const CONNECT_STAGE: StageInfo = StageInfo {
    title: "Connecting local registry",
    emoji: "🔌",
    activity: "attaching registry to cluster network",
    success: "Local registry connected",
    failure_prefix: "failed to connect local registry",
};

pub const CLEANUP_STAGE: StageInfo = StageInfo {
    title: "Cleaning up local registry",
    emoji: "🧹",
    activity: "removing registry container",
    success: "Local registry removed",
    failure_prefix: "failed to clean up local registry",
};

/// Readiness poll for the K3s-native registry.
const NATIVE_READY_INTERVAL: Duration = Duration::from_secs(2);
const NATIVE_READY_TIMEOUT: Duration = Duration::from_secs(60);

#[async_trait]
pub trait LocalRegistryService: Send + Sync {
    /// Create the registry container if absent and start it.
    async fn provision(&self, registry: &LocalRegistry) -> Result<()>;

    /// Attach the registry to the cluster network. No-op for K3s, whose
    /// tooling manages its own registry.
    async fn connect(
        &self,
        registry: &LocalRegistry,
        network: &str,
        distribution: Distribution,
    ) -> Result<()>;

    /// Wait for the K3s-native registry container to report running.
    async fn wait_native_ready(&self, cluster: &str) -> Result<()>;

    /// Detach from the cluster network (required before Talos teardown).
    async fn disconnect(&self, registry_name: &str, network: &str) -> Result<()>;

    /// Stop and remove the container; the shared volume only on request.
    async fn cleanup(&self, registry_name: &str, delete_volume: bool) -> Result<()>;
}

/// The container-engine-backed implementation.
pub struct DockerRegistryService {
    engine: ContainerEngine,
}

impl DockerRegistryService {
    pub fn new(engine: ContainerEngine) -> Self {
        DockerRegistryService { engine }
    }
}

#[async_trait]
impl LocalRegistryService for DockerRegistryService {
    async fn provision(&self, registry: &LocalRegistry) -> Result<()> {
        self.engine.ensure_volume(&registry.volume_name).await?;

        match self.engine.container_status(&registry.name).await? {
            ContainerStatus::Running => {
                debug!(container = %registry.name, "local registry already running");
                return Ok(());
            }
            ContainerStatus::Stopped => {
                self.engine.start_container(&registry.name).await?;
                return Ok(());
            }
            ContainerStatus::Missing => {}
        }

        let mut labels = HashMap::new();
        labels.insert("io.ksail.registry".to_string(), "local".to_string());
        labels.insert("io.ksail.cluster".to_string(), registry.cluster_name.clone());

        let spec = ContainerRunSpec {
            name: registry.name.clone(),
            image: REGISTRY_IMAGE.to_string(),
            env: Vec::new(),
            port_binding: Some((registry.port, REGISTRY_CONTAINER_PORT)),
            volumes: vec![(registry.volume_name.clone(), "/var/lib/registry".to_string())],
            labels,
        };
        self.engine.create_container(&spec).await?;
        self.engine.start_container(&registry.name).await?;
        info!(container = %registry.name, port = registry.port, "local registry provisioned");
        Ok(())
    }

    async fn connect(
        &self,
        registry: &LocalRegistry,
        network: &str,
        distribution: Distribution,
    ) -> Result<()> {
        if distribution == Distribution::K3s {
            debug!("K3s manages its own registry; skipping network attach");
            return Ok(());
        }
        self.engine.connect_network(network, &registry.name).await
    }

    async fn wait_native_ready(&self, cluster: &str) -> Result<()> {
        let container = format!("k3d-{cluster}-registry");
        let deadline = tokio::time::Instant::now() + NATIVE_READY_TIMEOUT;
        loop {
            if self.engine.container_status(&container).await? == ContainerStatus::Running {
                debug!(%container, "native registry is ready");
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(RegistryError::NotReady(container).into());
            }
            tokio::time::sleep(NATIVE_READY_INTERVAL).await;
        }
    }

    async fn disconnect(&self, registry_name: &str, network: &str) -> Result<()> {
        self.engine.disconnect_network(network, registry_name).await
    }

    async fn cleanup(&self, registry_name: &str, delete_volume: bool) -> Result<()> {
        self.engine.stop_container(registry_name).await?;
        self.engine.remove_container(registry_name, true).await?;
        if delete_volume {
            self.engine.remove_volume(super::LOCAL_REGISTRY_VOLUME).await?;
        }
        Ok(())
    }
}

lazy_static! {
    static ref SERVICE_OVERRIDE: RwLock<Option<Arc<dyn LocalRegistryService>>> = RwLock::new(None);
}

/// Service the pipelines should use: the test override when set, else the
/// engine-backed implementation.
pub fn local_registry_service(engine: &ContainerEngine) -> Arc<dyn LocalRegistryService> {
    let slot = SERVICE_OVERRIDE
        .read()
        .expect("registry service override lock poisoned");
    slot.clone()
        .unwrap_or_else(|| Arc::new(DockerRegistryService::new(engine.clone())))
}

/// Install a test service. The returned closure restores the previous one.
pub fn override_local_registry_service(
    service: Arc<dyn LocalRegistryService>,
) -> impl FnOnce() {
    let previous = {
        let mut slot = SERVICE_OVERRIDE
            .write()
            .expect("registry service override lock poisoned");
        std::mem::replace(&mut *slot, Some(service))
    };
    move || {
        let mut slot = SERVICE_OVERRIDE
            .write()
            .expect("registry service override lock poisoned");
        *slot = previous;
    }
}
