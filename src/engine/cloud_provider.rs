// cloud-provider-kind controller cleanup.
//
// The controller container (and its per-service side-cars) is shared across
// every Vanilla cluster on the engine, so it is removed only when the last
// Vanilla cluster goes away.

use anyhow::Result;
use tracing::{info, warn};

use super::ContainerEngine;

/// Shared controller container created the first time a Vanilla cluster
/// needs a load balancer.
pub const CLOUD_PROVIDER_KIND_CONTAINER: &str = "ksail-cloud-provider-kind";

/// Per-service side-car containers the controller spawns.
pub const CPK_SIDECAR_PREFIX: &str = "cpk-";

/// Decide which containers the post-delete hook should force-remove.
///
/// Runs only when the deleted cluster was Vanilla, zero Vanilla clusters
/// remain (no container name ends in `-control-plane`), and at least one
/// cloud-provider-kind container exists.
pub fn cloud_provider_kind_victims(
    deleted_was_vanilla: bool,
    container_names: &[String],
) -> Vec<String> {
    if !deleted_was_vanilla {
        return Vec::new();
    }
    if container_names.iter().any(|n| n.ends_with("-control-plane")) {
        return Vec::new();
    }
    container_names
        .iter()
        .filter(|n| n.as_str() == CLOUD_PROVIDER_KIND_CONTAINER || n.starts_with(CPK_SIDECAR_PREFIX))
        .cloned()
        .collect()
}

/// Remove the controller and its side-cars when the last Vanilla cluster was
/// deleted. Failures are warnings; this never aborts the delete command.
pub async fn cleanup_cloud_provider_kind(
    engine: &ContainerEngine,
    deleted_was_vanilla: bool,
) -> Result<()> {
    let names = engine.list_container_names().await?;
    let victims = cloud_provider_kind_victims(deleted_was_vanilla, &names);
    if victims.is_empty() {
        return Ok(());
    }
    info!(
        count = victims.len(),
        "removing cloud-provider-kind containers after last Vanilla cluster"
    );
    for name in victims {
        if let Err(err) = engine.remove_container(&name, true).await {
            warn!("failed to remove cloud-provider-kind container '{name}': {err:#}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_last_vanilla_cluster_triggers_cleanup() {
        let containers = names(&[
            "ksail-cloud-provider-kind",
            "cpk-svc-default-dev",
            "k3d-other-server-0",
        ]);
        let victims = cloud_provider_kind_victims(true, &containers);
        assert_eq!(victims, names(&["ksail-cloud-provider-kind", "cpk-svc-default-dev"]));
    }

    #[test]
    fn test_remaining_vanilla_cluster_blocks_cleanup() {
        let containers = names(&[
            "ksail-cloud-provider-kind",
            "cpk-svc-default-dev",
            "other-control-plane",
        ]);
        assert!(cloud_provider_kind_victims(true, &containers).is_empty());
    }

    #[test]
    fn test_non_vanilla_delete_never_triggers() {
        let containers = names(&["ksail-cloud-provider-kind"]);
        assert!(cloud_provider_kind_victims(false, &containers).is_empty());
    }

    #[test]
    fn test_no_cpk_containers_is_a_no_op() {
        let containers = names(&["some-other-container"]);
        assert!(cloud_provider_kind_victims(true, &containers).is_empty());
    }

    #[test]
    fn test_only_matching_names_are_removed() {
        let containers = names(&["ksail-cloud-provider-kind", "cpkeeper", "unrelated"]);
        let victims = cloud_provider_kind_victims(true, &containers);
        assert_eq!(victims, names(&["ksail-cloud-provider-kind"]));
    }
}
