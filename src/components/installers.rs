// The per-component installers. Chart-backed components go through Helm;
// manifest-backed ones through kubectl; cloud-provider-kind runs as an
// engine container with the engine socket mounted.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::info;

use super::helm::ChartRepo;
use super::{ComponentInstaller, InstallContext};
use crate::engine::{ContainerRunSpec, ContainerStatus};

const CILIUM_REPO: ChartRepo = ChartRepo {
    name: "cilium",
    url: "https://helm.cilium.io",
};

const METRICS_SERVER_REPO: ChartRepo = ChartRepo {
    name: "metrics-server",
    url: "https://kubernetes-sigs.github.io/metrics-server/",
};

const METALLB_REPO: ChartRepo = ChartRepo {
    name: "metallb",
    url: "https://metallb.github.io/metallb",
};

const JETSTACK_REPO: ChartRepo = ChartRepo {
    name: "jetstack",
    url: "https://charts.jetstack.io",
};

const KYVERNO_REPO: ChartRepo = ChartRepo {
    name: "kyverno",
    url: "https://kyverno.github.io/kyverno/",
};

const FLUX_REPO: ChartRepo = ChartRepo {
    name: "fluxcd-community",
    url: "https://fluxcd-community.github.io/helm-charts",
};

const LOCAL_PATH_PROVISIONER_MANIFEST: &str =
    "https://raw.githubusercontent.com/rancher/local-path-provisioner/v0.0.30/deploy/local-path-storage.yaml";

const ARGOCD_MANIFEST: &str =
    "https://raw.githubusercontent.com/argoproj/argo-cd/stable/manifests/install.yaml";

const CLOUD_PROVIDER_KIND_IMAGE: &str =
    "registry.k8s.io/cloud-provider-kind/cloud-controller-manager:v0.6.0";

/// Flux chart installs are slow; give them their own budget.
const FLUX_INSTALL_TIMEOUT: Duration = Duration::from_secs(600);

pub struct CiliumInstaller;

#[async_trait]
impl ComponentInstaller for CiliumInstaller {
    fn name(&self) -> &'static str {
        "cilium"
    }

    async fn install(&self, ctx: &InstallContext) -> Result<()> {
        ctx.helm.repo_add(CILIUM_REPO).await?;
        ctx.helm
            .upgrade_install(
                "cilium",
                "cilium/cilium",
                "kube-system",
                &[("operator.replicas", "1")],
                None,
            )
            .await?;
        info!("cilium installed");
        Ok(())
    }

    async fn uninstall(&self, ctx: &InstallContext) -> Result<()> {
        ctx.helm.uninstall("cilium", "kube-system").await
    }
}

pub struct LocalPathProvisionerInstaller;

#[async_trait]
impl ComponentInstaller for LocalPathProvisionerInstaller {
    fn name(&self) -> &'static str {
        "local-path-provisioner"
    }

    async fn install(&self, ctx: &InstallContext) -> Result<()> {
        ctx.kubectl.apply_url(LOCAL_PATH_PROVISIONER_MANIFEST, None).await
    }

    async fn uninstall(&self, ctx: &InstallContext) -> Result<()> {
        ctx.kubectl.delete_url(LOCAL_PATH_PROVISIONER_MANIFEST, None).await
    }
}

pub struct MetricsServerInstaller;

#[async_trait]
impl ComponentInstaller for MetricsServerInstaller {
    fn name(&self) -> &'static str {
        "metrics-server"
    }

    async fn install(&self, ctx: &InstallContext) -> Result<()> {
        ctx.helm.repo_add(METRICS_SERVER_REPO).await?;
        ctx.helm
            .upgrade_install(
                "metrics-server",
                "metrics-server/metrics-server",
                "kube-system",
                // Node certs inside local clusters are not kubelet-signed.
                &[("args", "{--kubelet-insecure-tls}")],
                None,
            )
            .await
    }

    async fn uninstall(&self, ctx: &InstallContext) -> Result<()> {
        ctx.helm.uninstall("metrics-server", "kube-system").await
    }
}

pub struct MetalLbInstaller;

#[async_trait]
impl ComponentInstaller for MetalLbInstaller {
    fn name(&self) -> &'static str {
        "metallb"
    }

    async fn install(&self, ctx: &InstallContext) -> Result<()> {
        ctx.helm.repo_add(METALLB_REPO).await?;
        ctx.helm
            .upgrade_install("metallb", "metallb/metallb", "metallb-system", &[], None)
            .await
    }

    async fn uninstall(&self, ctx: &InstallContext) -> Result<()> {
        ctx.helm.uninstall("metallb", "metallb-system").await
    }
}

/// Runs the shared cloud-provider-kind controller as an engine container
/// with the engine socket mounted; one instance serves every Vanilla
/// cluster.
pub struct CloudProviderKindInstaller;

#[async_trait]
impl ComponentInstaller for CloudProviderKindInstaller {
    fn name(&self) -> &'static str {
        "cloud-provider-kind"
    }

    async fn install(&self, ctx: &InstallContext) -> Result<()> {
        let engine = ctx
            .engine
            .as_ref()
            .ok_or_else(|| anyhow!("cloud-provider-kind requires the local container engine"))?;
        let name = crate::engine::CLOUD_PROVIDER_KIND_CONTAINER;
        match engine.container_status(name).await? {
            ContainerStatus::Running => return Ok(()),
            ContainerStatus::Stopped => return engine.start_container(name).await,
            ContainerStatus::Missing => {}
        }
        let mut labels = HashMap::new();
        labels.insert("io.ksail.component".to_string(), "cloud-provider-kind".to_string());
        let spec = ContainerRunSpec {
            name: name.to_string(),
            image: CLOUD_PROVIDER_KIND_IMAGE.to_string(),
            env: Vec::new(),
            port_binding: None,
            volumes: vec![(
                "/var/run/docker.sock".to_string(),
                "/var/run/docker.sock".to_string(),
            )],
            labels,
        };
        engine.create_container(&spec).await?;
        engine.start_container(name).await?;
        // The controller only routes traffic on the kind network.
        engine.connect_network("kind", name).await?;
        Ok(())
    }

    async fn uninstall(&self, ctx: &InstallContext) -> Result<()> {
        let engine = ctx
            .engine
            .as_ref()
            .ok_or_else(|| anyhow!("cloud-provider-kind requires the local container engine"))?;
        engine
            .remove_container(crate::engine::CLOUD_PROVIDER_KIND_CONTAINER, true)
            .await
    }
}

pub struct CertManagerInstaller;

#[async_trait]
impl ComponentInstaller for CertManagerInstaller {
    fn name(&self) -> &'static str {
        "cert-manager"
    }

    async fn install(&self, ctx: &InstallContext) -> Result<()> {
        ctx.helm.repo_add(JETSTACK_REPO).await?;
        ctx.helm
            .upgrade_install(
                "cert-manager",
                "jetstack/cert-manager",
                "cert-manager",
                &[("crds.enabled", "true")],
                None,
            )
            .await
    }

    async fn uninstall(&self, ctx: &InstallContext) -> Result<()> {
        ctx.helm.uninstall("cert-manager", "cert-manager").await
    }
}

pub struct KyvernoInstaller;

#[async_trait]
impl ComponentInstaller for KyvernoInstaller {
    fn name(&self) -> &'static str {
        "kyverno"
    }

    async fn install(&self, ctx: &InstallContext) -> Result<()> {
        ctx.helm.repo_add(KYVERNO_REPO).await?;
        ctx.helm
            .upgrade_install("kyverno", "kyverno/kyverno", "kyverno", &[], None)
            .await
    }

    async fn uninstall(&self, ctx: &InstallContext) -> Result<()> {
        ctx.helm.uninstall("kyverno", "kyverno").await
    }
}

pub struct FluxInstaller;

#[async_trait]
impl ComponentInstaller for FluxInstaller {
    fn name(&self) -> &'static str {
        "flux"
    }

    async fn install(&self, ctx: &InstallContext) -> Result<()> {
        ctx.helm.repo_add(FLUX_REPO).await?;
        ctx.helm
            .upgrade_install(
                "flux",
                "fluxcd-community/flux2",
                "flux-system",
                &[],
                Some(FLUX_INSTALL_TIMEOUT),
            )
            .await
    }

    async fn uninstall(&self, ctx: &InstallContext) -> Result<()> {
        ctx.helm.uninstall("flux", "flux-system").await
    }
}

pub struct ArgoCdInstaller;

#[async_trait]
impl ComponentInstaller for ArgoCdInstaller {
    fn name(&self) -> &'static str {
        "argocd"
    }

    async fn install(&self, ctx: &InstallContext) -> Result<()> {
        ctx.kubectl.ensure_namespace("argocd").await?;
        ctx.kubectl.apply_url(ARGOCD_MANIFEST, Some("argocd")).await
    }

    async fn uninstall(&self, ctx: &InstallContext) -> Result<()> {
        ctx.kubectl.delete_url(ARGOCD_MANIFEST, Some("argocd")).await
    }
}
