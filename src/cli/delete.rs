// The delete pipeline: identity resolution → registry pre-discovery →
// confirmation → teardown → post-teardown cleanup.

use std::path::PathBuf;

use anyhow::Result;
use tracing::{debug, info, warn};

use super::{resolve_cluster_identity, ClusterIdentity};
use crate::engine::{
    cleanup_cloud_provider_kind, node_containers_for, ContainerEngine,
};
use crate::provisioner::{hetzner_server_names, provisioner_for};
use crate::registry::{
    cleanup_mirrors, disconnect_mirrors, discover_registries, local_registry_service,
    local_registry_name, DiscoveredRegistries, RegistryError, CLEANUP_STAGE,
};
use crate::spec::{
    self, resolve_network_name, ClusterSpec, Distribution, Provider, SpecOverrides,
};
use crate::ui::{
    confirm_deletion, should_skip_prompt, DeletionPreview, StageInfo, StageReporter,
};

const TEARDOWN_STAGE: StageInfo = StageInfo {
    title: "Deleting cluster",
    emoji: "🗑️",
    activity: "tearing down nodes",
    success: "Cluster deleted",
    failure_prefix: "failed to delete cluster",
};

#[derive(Debug, Default)]
pub struct DeleteOptions {
    pub config: Option<PathBuf>,
    pub name: Option<String>,
    pub provider: Option<Provider>,
    pub kubeconfig: Option<String>,
    pub delete_volumes: bool,
    pub force: bool,
}

pub async fn run(options: DeleteOptions) -> Result<()> {
    let overrides = SpecOverrides {
        provider: options.provider,
        kubeconfig: options.kubeconfig.clone(),
        ..Default::default()
    };
    let cwd = std::env::current_dir()?;
    let spec_was_loaded = spec::find_config_file(options.config.as_deref(), &cwd).is_ok();
    let cluster = super::load_spec(options.config.as_deref(), &overrides)?;
    let identity = resolve_cluster_identity(options.name.as_deref(), &cluster, spec_was_loaded);
    execute(cluster, identity, options.delete_volumes, options.force).await
}

/// The pipeline proper, reusable by the update command's recreate flow
/// (which passes `force = true` after its own confirmation).
pub async fn execute(
    mut cluster: ClusterSpec,
    identity: ClusterIdentity,
    delete_volumes: bool,
    force: bool,
) -> Result<()> {
    cluster.distribution = identity.distribution;
    cluster.provider = identity.provider;
    cluster.validate()?;

    let mut reporter = StageReporter::stdout();
    let network = resolve_network_name(identity.distribution, &identity.name);
    let engine = match identity.provider {
        Provider::Docker => Some(ContainerEngine::connect()?),
        Provider::Hetzner => None,
    };

    // Teardown destroys the cluster network, so the attached registries
    // must be known (and, on Talos, detached) beforehand.
    let mut discovered = DiscoveredRegistries::default();
    if let Some(engine) = &engine {
        discovered = match discover_registries(engine, &network).await {
            Ok(found) => found,
            Err(err) => {
                if err.downcast_ref::<RegistryError>().is_some() {
                    debug!("no registries attached to '{network}'");
                    DiscoveredRegistries::default()
                } else {
                    return Err(err);
                }
            }
        };
        if identity.distribution == Distribution::Talos && !discovered.is_empty() {
            let service = local_registry_service(engine);
            for name in &discovered.local {
                if let Err(err) = service.disconnect(name, &network).await {
                    warn!("failed to disconnect registry '{name}': {err:#}");
                }
            }
            disconnect_mirrors(engine, &network, &discovered.mirrors).await?;
        }
    }

    if !should_skip_prompt(force) {
        let preview = build_preview(&identity, &cluster, engine.as_ref(), &discovered).await;
        let stdin = std::io::stdin();
        let mut input = stdin.lock();
        let mut output = std::io::stderr();
        confirm_deletion(&mut input, &mut output, &preview)?;
    }

    let provisioner = provisioner_for(&cluster)?;
    let name = identity.name.clone();
    reporter
        .run_stage(&TEARDOWN_STAGE, async move {
            provisioner.delete(&name).await
        })
        .await?;

    if let Some(engine) = &engine {
        // Post-teardown cleanup is best-effort; warnings only.
        reporter.begin(&CLEANUP_STAGE);
        let service = local_registry_service(engine);
        let locals = if discovered.local.is_empty() {
            vec![local_registry_name(&identity.name)]
        } else {
            discovered.local.clone()
        };
        for name in &locals {
            if let Err(err) = service.cleanup(name, delete_volumes).await {
                warn!("failed to clean up local registry '{name}': {err:#}");
            }
        }
        if let Err(err) = cleanup_mirrors(engine, &discovered.mirrors, delete_volumes).await {
            warn!("failed to clean up mirror registries: {err:#}");
        }
        if let Err(err) =
            cleanup_cloud_provider_kind(engine, identity.distribution == Distribution::Vanilla)
                .await
        {
            warn!("cloud-provider-kind cleanup failed: {err:#}");
        }
        reporter.success(&CLEANUP_STAGE);
    }

    info!(cluster = %identity.name, "cluster deletion pipeline completed");
    Ok(())
}

/// Enumerate what the deletion will remove.
async fn build_preview(
    identity: &ClusterIdentity,
    cluster: &ClusterSpec,
    engine: Option<&ContainerEngine>,
    discovered: &DiscoveredRegistries,
) -> DeletionPreview {
    let mut preview = DeletionPreview {
        cluster_name: identity.name.clone(),
        distribution: identity.distribution.to_string(),
        registries: discovered.all(),
        ..Default::default()
    };
    if let Some(engine) = engine {
        if let Ok(names) = engine.list_container_names().await {
            preview.node_containers =
                node_containers_for(&names, &identity.name, identity.distribution);
        }
    }
    if identity.provider == Provider::Hetzner {
        // Cloud resources have predictable names; list them without extra
        // API round-trips.
        preview.infrastructure = hetzner_server_names(
            &identity.name,
            cluster.hetzner.control_planes,
            cluster.hetzner.workers,
        );
        preview
            .infrastructure
            .push(format!("network/{}", identity.name));
    }
    preview
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_preview_for_hetzner_lists_infrastructure() {
        let identity = ClusterIdentity {
            name: "dev".to_string(),
            distribution: Distribution::Talos,
            provider: Provider::Hetzner,
        };
        let mut cluster = ClusterSpec {
            distribution: Distribution::Talos,
            provider: Provider::Hetzner,
            ..Default::default()
        };
        cluster.hetzner.workers = 1;
        let preview =
            build_preview(&identity, &cluster, None, &DiscoveredRegistries::default()).await;
        assert!(preview
            .infrastructure
            .contains(&"dev-controlplane-1".to_string()));
        assert!(preview.infrastructure.contains(&"dev-worker-1".to_string()));
        assert!(preview.infrastructure.contains(&"network/dev".to_string()));
    }
}
