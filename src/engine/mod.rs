// Container-engine client: a thin wrapper over the bollard Docker API that
// the registry subsystem, the provisioners and the delete pipeline share.

mod cloud_provider;
mod containers;

pub use cloud_provider::{
    cleanup_cloud_provider_kind, cloud_provider_kind_victims, CLOUD_PROVIDER_KIND_CONTAINER,
    CPK_SIDECAR_PREFIX,
};
pub use containers::{is_cluster_container, node_containers_for};

use std::collections::HashMap;

use anyhow::{Context, Result};
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::{CreateImageOptions, ListImagesOptions};
use bollard::models::{EndpointSettings, HostConfig, PortBinding};
use bollard::network::{ConnectNetworkOptions, DisconnectNetworkOptions, InspectNetworkOptions};
use bollard::volume::{CreateVolumeOptions, RemoveVolumeOptions};
use bollard::Docker;
use futures_util::StreamExt;
use tracing::{debug, warn};

/// Observed container state, reduced to what the pipelines care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Running,
    Stopped,
    Missing,
}

/// What to run when the registry subsystem creates a container.
#[derive(Debug, Clone, Default)]
pub struct ContainerRunSpec {
    pub name: String,
    pub image: String,
    pub env: Vec<String>,
    /// host port -> container port
    pub port_binding: Option<(u16, u16)>,
    /// volume name -> mount path
    pub volumes: Vec<(String, String)>,
    pub labels: HashMap<String, String>,
}

/// Shared handle to the local container engine.
#[derive(Clone)]
pub struct ContainerEngine {
    docker: Docker,
}

impl ContainerEngine {
    /// Connect to the local engine socket.
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("failed to connect to the container engine")?;
        Ok(ContainerEngine { docker })
    }

    fn is_not_found(err: &BollardError) -> bool {
        matches!(
            err,
            BollardError::DockerResponseServerError {
                status_code: 404,
                ..
            }
        )
    }

    /// Inspect a container by name. Absence is not an error.
    pub async fn container_status(&self, name: &str) -> Result<ContainerStatus> {
        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => {
                let running = info.state.and_then(|s| s.running).unwrap_or(false);
                Ok(if running {
                    ContainerStatus::Running
                } else {
                    ContainerStatus::Stopped
                })
            }
            Err(err) if Self::is_not_found(&err) => Ok(ContainerStatus::Missing),
            Err(err) => Err(err).context(format!("failed to inspect container '{name}'")),
        }
    }

    pub async fn container_exists(&self, name: &str) -> Result<bool> {
        Ok(self.container_status(name).await? != ContainerStatus::Missing)
    }

    /// Names of all containers, including stopped ones, without the leading
    /// slash the engine API reports.
    pub async fn list_container_names(&self) -> Result<Vec<String>> {
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                ..Default::default()
            }))
            .await
            .context("failed to list containers")?;
        let mut names = Vec::new();
        for container in containers {
            for name in container.names.unwrap_or_default() {
                names.push(name.trim_start_matches('/').to_string());
            }
        }
        Ok(names)
    }

    /// Pull an image if it is not already present locally.
    pub async fn ensure_image(&self, image: &str) -> Result<()> {
        let mut stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: image.to_string(),
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(progress) = stream.next().await {
            progress.with_context(|| format!("failed to pull image '{image}'"))?;
        }
        Ok(())
    }

    /// Repo tags of all local images.
    pub async fn list_image_tags(&self) -> Result<Vec<String>> {
        let images = self
            .docker
            .list_images(Some(ListImagesOptions::<String>::default()))
            .await
            .context("failed to list images")?;
        Ok(images.into_iter().flat_map(|i| i.repo_tags).collect())
    }

    /// Create a container from a run spec. The caller starts it separately.
    pub async fn create_container(&self, spec: &ContainerRunSpec) -> Result<()> {
        self.ensure_image(&spec.image).await?;

        let mut port_bindings = HashMap::new();
        let mut exposed_ports = HashMap::new();
        if let Some((host_port, container_port)) = spec.port_binding {
            let key = format!("{container_port}/tcp");
            exposed_ports.insert(key.clone(), HashMap::new());
            port_bindings.insert(
                key,
                Some(vec![PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(host_port.to_string()),
                }]),
            );
        }

        let binds: Vec<String> = spec
            .volumes
            .iter()
            .map(|(volume, path)| format!("{volume}:{path}"))
            .collect();

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            labels: Some(spec.labels.clone()),
            exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
            host_config: Some(HostConfig {
                port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
                binds: (!binds.is_empty()).then_some(binds),
                ..Default::default()
            }),
            ..Default::default()
        };

        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .with_context(|| format!("failed to create container '{}'", spec.name))?;
        debug!(container = %spec.name, image = %spec.image, "created container");
        Ok(())
    }

    pub async fn start_container(&self, name: &str) -> Result<()> {
        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .with_context(|| format!("failed to start container '{name}'"))
    }

    pub async fn stop_container(&self, name: &str) -> Result<()> {
        match self
            .docker
            .stop_container(name, Some(StopContainerOptions { t: 10 }))
            .await
        {
            Ok(()) => Ok(()),
            Err(err) if Self::is_not_found(&err) => Ok(()),
            Err(err) => Err(err).context(format!("failed to stop container '{name}'")),
        }
    }

    pub async fn remove_container(&self, name: &str, force: bool) -> Result<()> {
        match self
            .docker
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(err) if Self::is_not_found(&err) => Ok(()),
            Err(err) => Err(err).context(format!("failed to remove container '{name}'")),
        }
    }

    pub async fn network_exists(&self, name: &str) -> Result<bool> {
        match self
            .docker
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if Self::is_not_found(&err) => Ok(false),
            Err(err) => Err(err).context(format!("failed to inspect network '{name}'")),
        }
    }

    /// Names of containers attached to a network.
    pub async fn containers_on_network(&self, network: &str) -> Result<Vec<String>> {
        let info = match self
            .docker
            .inspect_network(
                network,
                Some(InspectNetworkOptions::<String> {
                    verbose: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(info) => info,
            Err(err) if Self::is_not_found(&err) => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).context(format!("failed to inspect network '{network}'"))
            }
        };
        let mut names: Vec<String> = info
            .containers
            .unwrap_or_default()
            .into_values()
            .filter_map(|c| c.name)
            .collect();
        names.sort();
        Ok(names)
    }

    /// IPv4 address per container name on a network, CIDR suffix stripped.
    pub async fn container_addresses_on_network(
        &self,
        network: &str,
    ) -> Result<HashMap<String, String>> {
        let info = match self
            .docker
            .inspect_network(
                network,
                Some(InspectNetworkOptions::<String> {
                    verbose: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(info) => info,
            Err(err) if Self::is_not_found(&err) => return Ok(HashMap::new()),
            Err(err) => {
                return Err(err).context(format!("failed to inspect network '{network}'"))
            }
        };
        let mut addresses = HashMap::new();
        for container in info.containers.unwrap_or_default().into_values() {
            if let (Some(name), Some(address)) = (container.name, container.ipv4_address) {
                let ip = address.split('/').next().unwrap_or(&address).to_string();
                if !ip.is_empty() {
                    addresses.insert(name, ip);
                }
            }
        }
        Ok(addresses)
    }

    /// Attach a container to a network. Already-attached is not an error.
    pub async fn connect_network(&self, network: &str, container: &str) -> Result<()> {
        match self
            .docker
            .connect_network(
                network,
                ConnectNetworkOptions {
                    container: container.to_string(),
                    endpoint_config: EndpointSettings::default(),
                },
            )
            .await
        {
            Ok(()) => Ok(()),
            // 403 is the engine's "endpoint already exists on network"
            Err(BollardError::DockerResponseServerError {
                status_code: 403, ..
            }) => {
                debug!(container, network, "container already attached to network");
                Ok(())
            }
            Err(err) => Err(err).context(format!(
                "failed to connect container '{container}' to network '{network}'"
            )),
        }
    }

    /// Detach a container from a network. Missing endpoints are ignored.
    pub async fn disconnect_network(&self, network: &str, container: &str) -> Result<()> {
        match self
            .docker
            .disconnect_network(
                network,
                DisconnectNetworkOptions {
                    container: container.to_string(),
                    force: true,
                },
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(err) if Self::is_not_found(&err) => Ok(()),
            Err(err) => Err(err).context(format!(
                "failed to disconnect container '{container}' from network '{network}'"
            )),
        }
    }

    /// Create a named volume if it does not exist yet.
    pub async fn ensure_volume(&self, name: &str) -> Result<()> {
        self.docker
            .create_volume(CreateVolumeOptions {
                name: name.to_string(),
                ..Default::default()
            })
            .await
            .with_context(|| format!("failed to create volume '{name}'"))?;
        Ok(())
    }

    pub async fn remove_volume(&self, name: &str) -> Result<()> {
        match self
            .docker
            .remove_volume(name, Some(RemoveVolumeOptions { force: true }))
            .await
        {
            Ok(()) => Ok(()),
            Err(err) if Self::is_not_found(&err) => Ok(()),
            Err(err) => {
                warn!("failed to remove volume '{name}': {err}");
                Ok(())
            }
        }
    }
}
