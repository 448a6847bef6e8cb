// Vanilla distribution on the local container engine, driven through the
// `kind` CLI. Start/stop operate on the node containers directly since kind
// has no native start/stop.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use super::{Provisioner, ProvisionerError};
use crate::engine::{node_containers_for, ContainerEngine};
use crate::exec::{default_invoker, CommandInvoker};
use crate::spec::{ClusterSpec, CniToggle, Distribution};

pub struct KindProvisioner {
    spec: ClusterSpec,
    engine: ContainerEngine,
    invoker: Arc<dyn CommandInvoker>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KindConfig {
    kind: &'static str,
    api_version: &'static str,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    networking: Option<KindNetworking>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    containerd_config_patches: Vec<String>,
    nodes: Vec<KindNode>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KindNetworking {
    disable_default_c_n_i: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KindNode {
    role: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    extra_mounts: Vec<KindMount>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KindMount {
    host_path: String,
    container_path: String,
}

impl KindProvisioner {
    pub fn new(spec: ClusterSpec, engine: ContainerEngine) -> Self {
        KindProvisioner {
            spec,
            engine,
            invoker: default_invoker(),
        }
    }

    pub fn with_invoker(mut self, invoker: Arc<dyn CommandInvoker>) -> Self {
        self.invoker = invoker;
        self
    }

    async fn kind(&self, args: &[String]) -> Result<crate::exec::CommandOutput> {
        self.invoker.run("kind", args).await
    }

}

/// Render the kind cluster config for a spec.
fn render_config(spec: &ClusterSpec, name: &str) -> Result<String> {
    let disable_cni = matches!(spec.cni, CniToggle::Cilium | CniToggle::None);

    let mut patches = Vec::new();
    let mut mounts = Vec::new();
    if let Some(mirrors_dir) = &spec.vanilla.mirrors_dir {
        // Route every registry host through the mounted hosts.toml tree.
        patches.push(
            "[plugins.\"io.containerd.grpc.v1.cri\".registry]\n  config_path = \"/etc/containerd/certs.d\""
                .to_string(),
        );
        mounts.push(KindMount {
            host_path: mirrors_dir.clone(),
            container_path: "/etc/containerd/certs.d".to_string(),
        });
    }

    let config = KindConfig {
        kind: "Cluster",
        api_version: "kind.x-k8s.io/v1alpha4",
        name: name.to_string(),
        networking: disable_cni.then_some(KindNetworking {
            disable_default_c_n_i: true,
        }),
        containerd_config_patches: patches,
        nodes: vec![KindNode {
            role: "control-plane",
            extra_mounts: mounts,
        }],
    };
    serde_yaml::to_string(&config).context("failed to render kind config")
}

#[async_trait]
impl Provisioner for KindProvisioner {
    async fn exists(&self, name: &str) -> Result<bool> {
        let clusters = self.list().await?;
        Ok(clusters.iter().any(|c| c == name))
    }

    async fn create(&self, name: &str) -> Result<()> {
        let config = render_config(&self.spec, name)?;
        let mut file = tempfile::NamedTempFile::new().context("failed to create temp file")?;
        file.write_all(config.as_bytes())
            .context("failed to write kind config")?;
        debug!(%name, "rendered kind config:\n{config}");

        let args = vec![
            "create".to_string(),
            "cluster".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--config".to_string(),
            file.path().display().to_string(),
            "--wait".to_string(),
            "120s".to_string(),
        ];
        self.kind(&args).await?.require_success("kind create cluster")?;
        info!(%name, "kind cluster created");
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        if !self.exists(name).await? {
            return Err(ProvisionerError::ClusterNotFound(name.to_string()).into());
        }
        let args = vec![
            "delete".to_string(),
            "cluster".to_string(),
            "--name".to_string(),
            name.to_string(),
        ];
        self.kind(&args).await?.require_success("kind delete cluster")?;
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<()> {
        let names = self.engine.list_container_names().await?;
        let nodes = node_containers_for(&names, name, Distribution::Vanilla);
        if nodes.is_empty() {
            return Err(ProvisionerError::ClusterNotFound(name.to_string()).into());
        }
        for node in nodes {
            self.engine.start_container(&node).await?;
        }
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<()> {
        let names = self.engine.list_container_names().await?;
        let nodes = node_containers_for(&names, name, Distribution::Vanilla);
        if nodes.is_empty() {
            return Err(ProvisionerError::ClusterNotFound(name.to_string()).into());
        }
        for node in nodes {
            self.engine.stop_container(&node).await?;
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let output = self
            .kind(&["get".to_string(), "clusters".to_string()])
            .await?
            .require_success("kind get clusters")?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn kubeconfig(&self, name: &str) -> Result<String> {
        let args = vec![
            "get".to_string(),
            "kubeconfig".to_string(),
            "--name".to_string(),
            name.to_string(),
        ];
        let output = self.kind(&args).await?.require_success("kind get kubeconfig")?;
        Ok(output.stdout)
    }

    async fn import_images(&self, name: &str, images: &[String]) -> Result<()> {
        if images.is_empty() {
            return Ok(());
        }
        let mut args = vec!["load".to_string(), "docker-image".to_string()];
        args.extend(images.iter().cloned());
        args.push("--name".to_string());
        args.push(name.to_string());
        self.kind(&args).await?.require_success("kind load docker-image")?;
        info!(count = images.len(), %name, "imported images into kind cluster");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::VanillaSpec;

    #[test]
    fn test_render_config_default() {
        let config = render_config(&ClusterSpec::default(), "dev").unwrap();
        assert!(config.contains("name: dev"));
        assert!(config.contains("role: control-plane"));
        assert!(!config.contains("disableDefaultCNI"));
        assert!(!config.contains("extraMounts"));
    }

    #[test]
    fn test_render_config_with_mirrors_and_cilium() {
        let spec = ClusterSpec {
            cni: CniToggle::Cilium,
            vanilla: VanillaSpec {
                mirrors_dir: Some("/home/u/.ksail/mirrors".to_string()),
            },
            ..Default::default()
        };
        let config = render_config(&spec, "dev").unwrap();
        assert!(config.contains("disableDefaultCNI: true"));
        assert!(config.contains("config_path"));
        assert!(config.contains("/home/u/.ksail/mirrors"));
        assert!(config.contains("/etc/containerd/certs.d"));
    }

    #[test]
    fn test_render_config_none_cni_also_disables_default() {
        let spec = ClusterSpec {
            cni: CniToggle::None,
            ..Default::default()
        };
        let config = render_config(&spec, "dev").unwrap();
        assert!(config.contains("disableDefaultCNI: true"));
    }
}
