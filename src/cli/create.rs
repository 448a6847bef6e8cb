// The create pipeline: spec → registries → distribution knobs → cluster →
// network attachments → context back-fill → image import → components.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::{effective_cluster_name, install_context, mirrors_dir_for};
use crate::components;
use crate::engine::ContainerEngine;
use crate::provisioner::provisioner_for;
use crate::registry::{
    attach_mirrors, create_mirrors, local_registry_service, verify_mirrors_reachable,
    write_hosts_toml, LocalRegistry, MirrorRegistry, CONNECT_STAGE, MIRROR_SETUP_STAGE,
    PROVISION_STAGE,
};
use crate::spec::{
    context_name, resolve_network_name, validate_name, ClusterSpec, Distribution,
    MetricsServerToggle, Provider, SpecOverrides,
};
use crate::ui::{StageInfo, StageReporter};

const CLUSTER_STAGE: StageInfo = StageInfo {
    title: "Provisioning cluster",
    emoji: "🚀",
    activity: "creating nodes",
    success: "Cluster ready",
    failure_prefix: "failed to provision cluster",
};

const IMPORT_STAGE: StageInfo = StageInfo {
    title: "Importing cached images",
    emoji: "📥",
    activity: "loading images into nodes",
    success: "Images imported",
    failure_prefix: "failed to import images",
};

const COMPONENTS_STAGE: StageInfo = StageInfo {
    title: "Installing components",
    emoji: "🧩",
    activity: "running component pipeline",
    success: "Components installed",
    failure_prefix: "failed to install components",
};

#[derive(Debug, Default)]
pub struct CreateOptions {
    pub config: Option<PathBuf>,
    pub overrides: SpecOverrides,
}

/// K3s ships its own metrics-server; disabling it is a server argument
/// applied at creation, added unless an exact duplicate already exists.
pub fn adjust_distribution_flags(cluster: &mut ClusterSpec) {
    if cluster.distribution == Distribution::K3s
        && cluster.metrics_server == MetricsServerToggle::Disabled
    {
        let arg = "--disable=metrics-server".to_string();
        if !cluster.k3s.extra_server_args.iter().any(|a| *a == arg) {
            cluster.k3s.extra_server_args.push(arg);
        }
    }
}

/// Images in the engine cache tagged for the local registry endpoint.
fn cached_images(tags: &[String], registry_host: &str) -> Vec<String> {
    tags.iter()
        .filter(|tag| tag.starts_with(&format!("{registry_host}/")))
        .cloned()
        .collect()
}

pub async fn run(options: CreateOptions) -> Result<()> {
    let cluster = super::load_spec(options.config.as_deref(), &options.overrides)?;
    execute(cluster).await
}

/// The pipeline proper, reusable by the update command's recreate flow.
pub async fn execute(mut cluster: ClusterSpec) -> Result<()> {
    cluster.validate()?;
    let name = effective_cluster_name(&cluster);
    validate_name(&name)?;

    let mut reporter = StageReporter::stdout();
    let network = resolve_network_name(cluster.distribution, &name);
    let on_engine = cluster.provider == Provider::Docker;
    let engine = if on_engine {
        Some(ContainerEngine::connect()?)
    } else {
        None
    };

    // Registries exist before the cluster so creation-time registry config
    // can reference them.
    let local_registry = LocalRegistry::for_cluster(&cluster, &name);
    let mut mirrors: Vec<MirrorRegistry> = Vec::new();
    if let Some(engine) = &engine {
        if cluster.local_registry.enabled && cluster.distribution != Distribution::K3s {
            let service = local_registry_service(engine);
            reporter
                .run_stage(&PROVISION_STAGE, service.provision(&local_registry))
                .await?;
        }
        if !cluster.mirror_registries.is_empty() {
            let registries = cluster.mirror_registries.clone();
            mirrors = reporter
                .run_stage(&MIRROR_SETUP_STAGE, async {
                    let mirrors = create_mirrors(engine, &registries).await?;
                    if cluster.distribution == Distribution::Vanilla {
                        let dir = mirrors_dir_for(&cluster);
                        write_hosts_toml(&dir, &mirrors)?;
                        // The config is baked at creation, so pin the path.
                        cluster.vanilla.mirrors_dir =
                            Some(dir.display().to_string());
                    }
                    Ok(mirrors)
                })
                .await?;
        }
    }

    adjust_distribution_flags(&mut cluster);

    let provisioner = provisioner_for(&cluster)?;
    let name_for_stage = name.clone();
    let provisioner_ref = provisioner.clone();
    let already_existed = provisioner.exists(&name).await?;
    reporter
        .run_stage(&CLUSTER_STAGE, async move {
            if already_existed {
                info!(name = %name_for_stage, "cluster already exists; skipping creation");
                return Ok(());
            }
            provisioner_ref.create(&name_for_stage).await
        })
        .await?;

    if let Some(engine) = &engine {
        if !mirrors.is_empty() {
            // Attach failures only cost the mirror, never the cluster.
            if let Err(err) = attach_mirrors(engine, &mirrors, &network).await {
                warn!("failed to attach mirror registries: {err:#}");
            }
            if let Err(err) = verify_mirrors_reachable(engine, &mirrors, &network).await {
                warn!("mirror reachability check failed: {err:#}");
            }
        }
        if cluster.local_registry.enabled {
            let service = local_registry_service(engine);
            reporter
                .run_stage(&CONNECT_STAGE, async {
                    if cluster.distribution == Distribution::K3s {
                        service.wait_native_ready(&name).await
                    } else {
                        service
                            .connect(&local_registry, &network, cluster.distribution)
                            .await
                    }
                })
                .await?;
        }
    }

    // Back-fill the context so everything after this reaches the right
    // cluster.
    cluster.connection.context = Some(context_name(cluster.distribution, &name));

    // The distribution CLIs merge credentials into the default kubeconfig;
    // when none exists (fresh machines, cloud provider), fetch it.
    if crate::k8s::kubeconfig_path(cluster.connection.kubeconfig.as_deref()).is_err() {
        let contents = provisioner.kubeconfig(&name).await?;
        let path = dirs::home_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."))
            .join(".kube")
            .join("config");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create '{}'", parent.display()))?;
        }
        std::fs::write(&path, contents)
            .with_context(|| format!("failed to write kubeconfig '{}'", path.display()))?;
        info!(path = %path.display(), "wrote kubeconfig");
    }

    if let Some(engine) = &engine {
        if cluster.local_registry.enabled {
            let tags = engine.list_image_tags().await.unwrap_or_default();
            let images = cached_images(&tags, &local_registry.host);
            if !images.is_empty() {
                let provisioner = provisioner.clone();
                let name = name.clone();
                let result = reporter
                    .run_stage(&IMPORT_STAGE, async move {
                        provisioner.import_images(&name, &images).await
                    })
                    .await;
                if let Err(err) = result {
                    // Talos has no import path; that is a warning, not a
                    // failure.
                    warn!("image import skipped: {err:#}");
                }
            }
        }
    }

    let ctx = install_context(&cluster, &name)
        .context("failed to prepare component installation context")?;
    reporter
        .run_stage(&COMPONENTS_STAGE, components::install_all(&cluster, &ctx))
        .await?;

    info!(cluster = %name, "cluster creation pipeline completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::K3sSpec;

    #[test]
    fn test_adjust_distribution_flags_adds_disable_arg() {
        let mut cluster = ClusterSpec {
            distribution: Distribution::K3s,
            metrics_server: MetricsServerToggle::Disabled,
            ..Default::default()
        };
        adjust_distribution_flags(&mut cluster);
        assert_eq!(
            cluster.k3s.extra_server_args,
            vec!["--disable=metrics-server"]
        );
    }

    #[test]
    fn test_adjust_distribution_flags_no_duplicate() {
        let mut cluster = ClusterSpec {
            distribution: Distribution::K3s,
            metrics_server: MetricsServerToggle::Disabled,
            k3s: K3sSpec {
                extra_server_args: vec!["--disable=metrics-server".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };
        adjust_distribution_flags(&mut cluster);
        assert_eq!(cluster.k3s.extra_server_args.len(), 1);
    }

    #[test]
    fn test_adjust_distribution_flags_other_distributions_untouched() {
        let mut cluster = ClusterSpec {
            metrics_server: MetricsServerToggle::Disabled,
            ..Default::default()
        };
        adjust_distribution_flags(&mut cluster);
        assert!(cluster.k3s.extra_server_args.is_empty());
    }

    #[test]
    fn test_cached_images_filters_by_registry_prefix() {
        let tags = vec![
            "localhost:5999/app:v1".to_string(),
            "localhost:5999/lib/base:latest".to_string(),
            "docker.io/library/nginx:latest".to_string(),
            "localhost:59990/other:v1".to_string(),
        ];
        let images = cached_images(&tags, "localhost:5999");
        assert_eq!(
            images,
            vec!["localhost:5999/app:v1", "localhost:5999/lib/base:latest"]
        );
    }
}
