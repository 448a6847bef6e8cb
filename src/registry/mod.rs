// Registry subsystem: the local content-cache registry and the mirror
// fan-out. Containers outlive cluster creation but are bound to a cluster
// by network attachment; the backing volume is shared across clusters and
// only removed when the caller opts in.

mod local;
mod mirror;

pub use local::{
    local_registry_service, override_local_registry_service, DockerRegistryService,
    LocalRegistryService, CLEANUP_STAGE, CONNECT_STAGE, PROVISION_STAGE,
};
pub use mirror::{
    attach_mirrors, cleanup_mirrors, create_mirrors, disconnect_mirrors, registries_yaml,
    talos_mirror_args, verify_mirrors_reachable, write_hosts_toml, MIRROR_SETUP_STAGE,
};

use anyhow::Result;

use crate::engine::ContainerEngine;
use crate::spec::{ClusterSpec, MirrorSpec};

/// Image run for both the local cache and the mirror proxies.
pub const REGISTRY_IMAGE: &str = "registry:2";

/// In-container registry port.
pub const REGISTRY_CONTAINER_PORT: u16 = 5000;

/// Default host port for the local content cache.
pub const DEFAULT_LOCAL_REGISTRY_PORT: u16 = 5999;

/// Shared backing volume for the local cache; deliberately not
/// cluster-scoped so pulls stay warm across clusters.
pub const LOCAL_REGISTRY_VOLUME: &str = "ksail-registry";

pub const LOCAL_REGISTRY_PREFIX: &str = "ksail-registry-";
pub const MIRROR_REGISTRY_PREFIX: &str = "ksail-mirror-";

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("no registries found on the cluster network")]
    NoRegistriesFound,
    #[error("local registry '{0}' did not become ready in time")]
    NotReady(String),
}

/// Container name of a cluster's local content cache.
pub fn local_registry_name(cluster: &str) -> String {
    format!("{LOCAL_REGISTRY_PREFIX}{cluster}")
}

/// Container name of the mirror for an upstream host.
pub fn mirror_registry_name(host: &str) -> String {
    let sanitized: String = host
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!("{MIRROR_REGISTRY_PREFIX}{sanitized}")
}

/// The local content cache for one cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalRegistry {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub cluster_name: String,
    pub volume_name: String,
}

impl LocalRegistry {
    pub fn for_cluster(spec: &ClusterSpec, cluster_name: &str) -> Self {
        let port = spec
            .local_registry
            .host_port
            .unwrap_or(DEFAULT_LOCAL_REGISTRY_PORT);
        let host = spec
            .local_registry
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("localhost:{port}"));
        LocalRegistry {
            name: local_registry_name(cluster_name),
            host,
            port,
            cluster_name: cluster_name.to_string(),
            volume_name: LOCAL_REGISTRY_VOLUME.to_string(),
        }
    }
}

/// A provisioned mirror container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorRegistry {
    pub container_name: String,
    pub spec: MirrorSpec,
}

impl MirrorRegistry {
    pub fn from_spec(spec: &MirrorSpec) -> Self {
        MirrorRegistry {
            container_name: mirror_registry_name(&spec.host),
            spec: spec.clone(),
        }
    }
}

/// Registry containers attached to a cluster network, captured *before*
/// teardown so post-teardown cleanup still knows what to remove.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredRegistries {
    pub local: Vec<String>,
    pub mirrors: Vec<String>,
}

impl DiscoveredRegistries {
    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.mirrors.is_empty()
    }

    pub fn all(&self) -> Vec<String> {
        self.local.iter().chain(self.mirrors.iter()).cloned().collect()
    }

    /// Classify a container-name listing. Pure, so the discovery rules are
    /// testable without an engine.
    pub fn from_names<I: IntoIterator<Item = String>>(names: I) -> Self {
        let mut discovered = DiscoveredRegistries::default();
        for name in names {
            if name.starts_with(LOCAL_REGISTRY_PREFIX) {
                discovered.local.push(name);
            } else if name.starts_with(MIRROR_REGISTRY_PREFIX) {
                discovered.mirrors.push(name);
            }
        }
        discovered.local.sort();
        discovered.mirrors.sort();
        discovered
    }
}

/// Snapshot the registries attached to a cluster network.
/// `RegistryError::NoRegistriesFound` is informational, never fatal.
pub async fn discover_registries(
    engine: &ContainerEngine,
    network: &str,
) -> Result<DiscoveredRegistries> {
    let names = engine.containers_on_network(network).await?;
    let discovered = DiscoveredRegistries::from_names(names);
    if discovered.is_empty() {
        return Err(RegistryError::NoRegistriesFound.into());
    }
    Ok(discovered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_registry_name() {
        assert_eq!(local_registry_name("dev"), "ksail-registry-dev");
    }

    #[test]
    fn test_mirror_registry_name_sanitizes_host() {
        assert_eq!(mirror_registry_name("docker.io"), "ksail-mirror-docker-io");
        assert_eq!(
            mirror_registry_name("registry.k8s.io"),
            "ksail-mirror-registry-k8s-io"
        );
        assert_eq!(
            mirror_registry_name("localhost:5000"),
            "ksail-mirror-localhost-5000"
        );
    }

    #[test]
    fn test_local_registry_for_cluster_defaults() {
        let spec = ClusterSpec::default();
        let registry = LocalRegistry::for_cluster(&spec, "dev");
        assert_eq!(registry.name, "ksail-registry-dev");
        assert_eq!(registry.port, DEFAULT_LOCAL_REGISTRY_PORT);
        assert_eq!(registry.host, "localhost:5999");
        assert_eq!(registry.volume_name, "ksail-registry");
    }

    #[test]
    fn test_local_registry_for_cluster_explicit_port() {
        let mut spec = ClusterSpec::default();
        spec.local_registry.host_port = Some(6100);
        let registry = LocalRegistry::for_cluster(&spec, "dev");
        assert_eq!(registry.port, 6100);
        assert_eq!(registry.host, "localhost:6100");
    }

    #[test]
    fn test_discovered_registries_classification() {
        let names = vec![
            "ksail-registry-dev".to_string(),
            "ksail-mirror-docker-io".to_string(),
            "ksail-mirror-ghcr-io".to_string(),
            "dev-control-plane".to_string(),
        ];
        let discovered = DiscoveredRegistries::from_names(names);
        assert_eq!(discovered.local, vec!["ksail-registry-dev"]);
        assert_eq!(
            discovered.mirrors,
            vec!["ksail-mirror-docker-io", "ksail-mirror-ghcr-io"]
        );
        assert_eq!(discovered.all().len(), 3);
    }

    #[test]
    fn test_discovered_registries_empty() {
        let discovered = DiscoveredRegistries::from_names(vec!["dev-control-plane".to_string()]);
        assert!(discovered.is_empty());
    }
}
