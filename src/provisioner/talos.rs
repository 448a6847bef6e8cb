// Talos on the local container engine, driven through `talosctl`'s docker
// provisioner. Implements the updater capability: node counts reconcile in
// place.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use super::{ClusterUpdater, Provisioner, ProvisionerError};
use crate::diff::{Change, ChangeCategory, DiffResult, UpdateOutcome};
use crate::engine::{node_containers_for, ContainerEngine};
use crate::exec::{default_invoker, CommandInvoker};
use crate::registry::{talos_mirror_args, MirrorRegistry};
use crate::spec::{context_name, ClusterSpec, Distribution};

pub struct TalosProvisioner {
    spec: ClusterSpec,
    engine: ContainerEngine,
    invoker: Arc<dyn CommandInvoker>,
}

impl TalosProvisioner {
    pub fn new(spec: ClusterSpec, engine: ContainerEngine) -> Self {
        TalosProvisioner {
            spec,
            engine,
            invoker: default_invoker(),
        }
    }

    pub fn with_invoker(mut self, invoker: Arc<dyn CommandInvoker>) -> Self {
        self.invoker = invoker;
        self
    }

    async fn talosctl(&self, args: &[String]) -> Result<crate::exec::CommandOutput> {
        self.invoker.run("talosctl", args).await
    }

    fn create_args(&self, name: &str, control_planes: u32, workers: u32) -> Vec<String> {
        let mut args = vec![
            "cluster".to_string(),
            "create".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--provisioner".to_string(),
            "docker".to_string(),
            "--controlplanes".to_string(),
            control_planes.to_string(),
            "--workers".to_string(),
            workers.to_string(),
        ];
        if let Some(iso) = &self.spec.talos.iso {
            args.push("--image".to_string());
            args.push(iso.clone());
        }
        let mirrors: Vec<MirrorRegistry> = self
            .spec
            .mirror_registries
            .iter()
            .map(MirrorRegistry::from_spec)
            .collect();
        args.extend(talos_mirror_args(&mirrors));
        args
    }

    async fn observed_counts(&self, name: &str) -> Result<(u32, u32)> {
        let names = self.engine.list_container_names().await?;
        let control_planes = names
            .iter()
            .filter(|n| n.starts_with(&format!("{name}-controlplane-")))
            .count() as u32;
        let workers = names
            .iter()
            .filter(|n| n.starts_with(&format!("{name}-worker-")))
            .count() as u32;
        Ok((control_planes, workers))
    }
}

#[async_trait]
impl Provisioner for TalosProvisioner {
    async fn exists(&self, name: &str) -> Result<bool> {
        let (control_planes, workers) = self.observed_counts(name).await?;
        Ok(control_planes + workers > 0)
    }

    async fn create(&self, name: &str) -> Result<()> {
        let args = self.create_args(
            name,
            self.spec.talos.control_planes,
            self.spec.talos.workers,
        );
        self.talosctl(&args)
            .await?
            .require_success("talosctl cluster create")?;
        info!(%name, "talos cluster created");
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        if !self.exists(name).await? {
            return Err(ProvisionerError::ClusterNotFound(name.to_string()).into());
        }
        let args = vec![
            "cluster".to_string(),
            "destroy".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--provisioner".to_string(),
            "docker".to_string(),
        ];
        self.talosctl(&args)
            .await?
            .require_success("talosctl cluster destroy")?;
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<()> {
        let names = self.engine.list_container_names().await?;
        let nodes = node_containers_for(&names, name, Distribution::Talos);
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
        let nodes = node_containers_for(&names, name, Distribution::Talos);
        if nodes.is_empty() {
            return Err(ProvisionerError::ClusterNotFound(name.to_string()).into());
        }
        for node in nodes {
            self.engine.stop_container(&node).await?;
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let names = self.engine.list_container_names().await?;
        let clusters: BTreeSet<String> = names
            .iter()
            .filter_map(|n| n.split("-controlplane-").next().map(str::to_string))
            .filter(|candidate| {
                names
                    .iter()
                    .any(|n| n.starts_with(&format!("{candidate}-controlplane-")))
            })
            .collect();
        Ok(clusters.into_iter().collect())
    }

    async fn kubeconfig(&self, name: &str) -> Result<String> {
        let dir = tempfile::tempdir().context("failed to create temp dir")?;
        let path = dir.path().join("kubeconfig");
        let args = vec![
            "kubeconfig".to_string(),
            "--cluster".to_string(),
            name.to_string(),
            "--force".to_string(),
            path.display().to_string(),
        ];
        self.talosctl(&args)
            .await?
            .require_success("talosctl kubeconfig")?;
        std::fs::read_to_string(&path).context("failed to read talos kubeconfig")
    }

    async fn import_images(&self, _name: &str, images: &[String]) -> Result<()> {
        if images.is_empty() {
            return Ok(());
        }
        bail!("importing cached images is not supported for Talos clusters")
    }

    fn as_updater(&self) -> Option<&dyn ClusterUpdater> {
        Some(self)
    }
}

#[async_trait]
impl ClusterUpdater for TalosProvisioner {
    async fn get_current_config(&self, name: &str) -> Result<ClusterSpec> {
        if !self.exists(name).await? {
            return Err(ProvisionerError::ClusterDoesNotExist(name.to_string()).into());
        }
        let (control_planes, workers) = self.observed_counts(name).await?;
        let mut observed = self.spec.clone();
        observed.name = Some(name.to_string());
        observed.talos.control_planes = control_planes;
        observed.talos.workers = workers;
        observed.connection.context = Some(context_name(Distribution::Talos, name));
        Ok(observed)
    }

    async fn diff_config(
        &self,
        _name: &str,
        old: &ClusterSpec,
        new: &ClusterSpec,
    ) -> Result<DiffResult> {
        let mut result = DiffResult::default();
        if old.talos.control_planes != new.talos.control_planes {
            result.push(Change {
                field: "talos.controlPlanes".to_string(),
                old_value: old.talos.control_planes.to_string(),
                new_value: new.talos.control_planes.to_string(),
                category: ChangeCategory::InPlace,
                reason: "provider supports scaling".to_string(),
            });
        }
        if old.talos.workers != new.talos.workers {
            result.push(Change {
                field: "talos.workers".to_string(),
                old_value: old.talos.workers.to_string(),
                new_value: new.talos.workers.to_string(),
                category: ChangeCategory::InPlace,
                reason: "provider supports scaling".to_string(),
            });
        }
        Ok(result)
    }

    async fn update(
        &self,
        name: &str,
        old: &ClusterSpec,
        new: &ClusterSpec,
    ) -> Result<UpdateOutcome> {
        let diff = self.diff_config(name, old, new).await?;
        let mut outcome = UpdateOutcome::default();
        let scale_up = new.talos.control_planes >= old.talos.control_planes
            && new.talos.workers >= old.talos.workers;

        for change in diff.in_place {
            if scale_up {
                outcome.applied.push(change);
            } else {
                let mut failed = change;
                failed.reason = "scale-down requires manual node removal".to_string();
                outcome.failed.push(failed);
            }
        }

        if outcome.applied.is_empty() {
            return Ok(outcome);
        }

        // The docker provisioner reconciles missing nodes on re-create.
        let args = self.create_args(name, new.talos.control_planes, new.talos.workers);
        if let Err(err) = self
            .talosctl(&args)
            .await
            .and_then(|o| o.require_success("talosctl cluster create"))
        {
            warn!("talos scale reconciliation failed: {err:#}");
            outcome.failed.append(&mut outcome.applied);
            for change in &mut outcome.failed {
                if change.reason == "provider supports scaling" {
                    change.reason = format!("scaling failed: {err:#}");
                }
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::TalosSpec;

    fn provisioner(spec: ClusterSpec) -> TalosProvisioner {
        TalosProvisioner::new(spec, ContainerEngine::connect().expect("local engine defaults"))
    }

    #[test]
    fn test_create_args_include_counts_and_mirrors() {
        let spec = ClusterSpec {
            talos: TalosSpec {
                control_planes: 3,
                workers: 2,
                iso: None,
            },
            mirror_registries: vec![crate::spec::MirrorSpec {
                host: "docker.io".to_string(),
                upstream: "https://registry-1.docker.io".to_string(),
                username: None,
                password: None,
            }],
            ..Default::default()
        };
        let args = provisioner(spec).create_args("dev", 3, 2);
        assert!(args.contains(&"--controlplanes".to_string()));
        assert!(args.contains(&"3".to_string()));
        assert!(args.contains(&"--workers".to_string()));
        assert!(args.contains(&"2".to_string()));
        assert!(args.contains(&"--registry-mirror".to_string()));
        assert!(args.contains(&"docker.io=http://ksail-mirror-docker-io:5000".to_string()));
    }

    #[test]
    fn test_create_args_with_iso() {
        let spec = ClusterSpec {
            talos: TalosSpec {
                iso: Some("ghcr.io/siderolabs/talos:v1.8.0".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let args = provisioner(spec).create_args("dev", 1, 0);
        assert!(args.contains(&"--image".to_string()));
        assert!(args.contains(&"ghcr.io/siderolabs/talos:v1.8.0".to_string()));
    }

    #[tokio::test]
    async fn test_diff_config_scaling_fields() {
        let mut old = ClusterSpec::default();
        old.talos.control_planes = 1;
        old.talos.workers = 0;
        let mut new = old.clone();
        new.talos.workers = 2;

        let p = provisioner(old.clone());
        let diff = p.diff_config("dev", &old, &new).await.unwrap();
        assert_eq!(diff.in_place.len(), 1);
        assert_eq!(diff.in_place[0].field, "talos.workers");
        assert_eq!(diff.in_place[0].reason, "provider supports scaling");
    }
}
