// K3s distribution on the local container engine, driven through the `k3d`
// CLI. k3d owns the whole node lifecycle including the native registry, so
// this variant never talks to the engine API directly.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use super::{Provisioner, ProvisionerError};
use crate::exec::{default_invoker, CommandInvoker};
use crate::registry::{registries_yaml, MirrorRegistry, DEFAULT_LOCAL_REGISTRY_PORT};
use crate::spec::ClusterSpec;

pub struct K3dProvisioner {
    spec: ClusterSpec,
    invoker: Arc<dyn CommandInvoker>,
}

#[derive(Debug, Deserialize)]
struct K3dClusterEntry {
    name: String,
}

impl K3dProvisioner {
    pub fn new(spec: ClusterSpec) -> Self {
        K3dProvisioner {
            spec,
            invoker: default_invoker(),
        }
    }

    pub fn with_invoker(mut self, invoker: Arc<dyn CommandInvoker>) -> Self {
        self.invoker = invoker;
        self
    }

    async fn k3d(&self, args: &[String]) -> Result<crate::exec::CommandOutput> {
        self.invoker.run("k3d", args).await
    }
}

/// Arguments for `k3d cluster create`, kept separate so the flag assembly
/// is testable without running anything.
fn create_args(spec: &ClusterSpec, name: &str, registries_config: Option<&Path>) -> Vec<String> {
    let mut args = vec![
        "cluster".to_string(),
        "create".to_string(),
        name.to_string(),
        "--servers".to_string(),
        spec.k3s.servers.to_string(),
        "--agents".to_string(),
        spec.k3s.agents.to_string(),
        "--wait".to_string(),
    ];
    if spec.local_registry.enabled {
        let port = spec
            .local_registry
            .host_port
            .unwrap_or(DEFAULT_LOCAL_REGISTRY_PORT);
        args.push("--registry-create".to_string());
        args.push(format!("k3d-{name}-registry:0.0.0.0:{port}"));
    }
    for server_arg in &spec.k3s.extra_server_args {
        args.push("--k3s-arg".to_string());
        args.push(format!("{server_arg}@server:*"));
    }
    if let Some(path) = registries_config {
        args.push("--registry-config".to_string());
        args.push(path.display().to_string());
    }
    args
}

#[async_trait]
impl Provisioner for K3dProvisioner {
    async fn exists(&self, name: &str) -> Result<bool> {
        let clusters = self.list().await?;
        Ok(clusters.iter().any(|c| c == name))
    }

    async fn create(&self, name: &str) -> Result<()> {
        // Mirror containers are provisioned by the orchestrator before this
        // runs; the cluster only needs the rewrite rules.
        let mirrors: Vec<MirrorRegistry> = self
            .spec
            .mirror_registries
            .iter()
            .map(MirrorRegistry::from_spec)
            .collect();
        let mut registries_file = None;
        if !mirrors.is_empty() {
            let yaml = registries_yaml(&mirrors, None)?;
            let mut file =
                tempfile::NamedTempFile::new().context("failed to create temp file")?;
            file.write_all(yaml.as_bytes())
                .context("failed to write registries.yaml")?;
            registries_file = Some(file);
        }

        let args = create_args(
            &self.spec,
            name,
            registries_file.as_ref().map(|f| f.path()),
        );
        self.k3d(&args).await?.require_success("k3d cluster create")?;
        info!(%name, "k3d cluster created");
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        if !self.exists(name).await? {
            return Err(ProvisionerError::ClusterNotFound(name.to_string()).into());
        }
        let args = vec!["cluster".to_string(), "delete".to_string(), name.to_string()];
        self.k3d(&args).await?.require_success("k3d cluster delete")?;
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<()> {
        if !self.exists(name).await? {
            return Err(ProvisionerError::ClusterNotFound(name.to_string()).into());
        }
        let args = vec!["cluster".to_string(), "start".to_string(), name.to_string()];
        self.k3d(&args).await?.require_success("k3d cluster start")?;
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<()> {
        if !self.exists(name).await? {
            return Err(ProvisionerError::ClusterNotFound(name.to_string()).into());
        }
        let args = vec!["cluster".to_string(), "stop".to_string(), name.to_string()];
        self.k3d(&args).await?.require_success("k3d cluster stop")?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let args = vec![
            "cluster".to_string(),
            "list".to_string(),
            "-o".to_string(),
            "json".to_string(),
        ];
        let output = self.k3d(&args).await?.require_success("k3d cluster list")?;
        let entries: Vec<K3dClusterEntry> =
            serde_json::from_str(output.stdout.trim()).unwrap_or_default();
        Ok(entries.into_iter().map(|e| e.name).collect())
    }

    async fn kubeconfig(&self, name: &str) -> Result<String> {
        let args = vec!["kubeconfig".to_string(), "get".to_string(), name.to_string()];
        let output = self.k3d(&args).await?.require_success("k3d kubeconfig get")?;
        Ok(output.stdout)
    }

    async fn import_images(&self, name: &str, images: &[String]) -> Result<()> {
        if images.is_empty() {
            return Ok(());
        }
        let mut args = vec![
            "image".to_string(),
            "import".to_string(),
            "-c".to_string(),
            name.to_string(),
        ];
        args.extend(images.iter().cloned());
        self.k3d(&args).await?.require_success("k3d image import")?;
        info!(count = images.len(), %name, "imported images into k3d cluster");
        Ok(())
    }
}
