// Node-container discovery by the naming patterns each distribution's
// tooling uses.

use crate::spec::Distribution;

/// Whether a container belongs to the given cluster, by the exact naming
/// rules of the distribution's node containers. Sibling containers such as
/// `<cluster>-registry` must not match.
pub fn is_cluster_container(name: &str, cluster: &str, distribution: Distribution) -> bool {
    match distribution {
        Distribution::Vanilla => {
            if name == format!("{cluster}-control-plane") {
                return true;
            }
            match name.strip_prefix(&format!("{cluster}-worker")) {
                // `<cluster>-worker` or `<cluster>-worker<N>` with N digits only
                Some(rest) => rest.is_empty() || rest.chars().all(|c| c.is_ascii_digit()),
                None => false,
            }
        }
        Distribution::K3s => {
            name.starts_with(&format!("k3d-{cluster}-server-"))
                || name.starts_with(&format!("k3d-{cluster}-agent-"))
        }
        Distribution::Talos => {
            name.starts_with(&format!("{cluster}-controlplane-"))
                || name.starts_with(&format!("{cluster}-worker-"))
        }
    }
}

/// Filter a container-name listing down to the cluster's node containers.
pub fn node_containers_for(
    names: &[String],
    cluster: &str,
    distribution: Distribution,
) -> Vec<String> {
    names
        .iter()
        .filter(|name| is_cluster_container(name, cluster, distribution))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vanilla_patterns() {
        assert!(is_cluster_container("dev-control-plane", "dev", Distribution::Vanilla));
        assert!(is_cluster_container("dev-worker", "dev", Distribution::Vanilla));
        assert!(is_cluster_container("dev-worker2", "dev", Distribution::Vanilla));
        assert!(is_cluster_container("dev-worker17", "dev", Distribution::Vanilla));

        assert!(!is_cluster_container("dev-registry", "dev", Distribution::Vanilla));
        assert!(!is_cluster_container("dev-test-control-plane", "dev", Distribution::Vanilla));
        assert!(!is_cluster_container("other-dev-control-plane", "dev", Distribution::Vanilla));
        assert!(!is_cluster_container("dev-worker-1", "dev", Distribution::Vanilla));
        assert!(!is_cluster_container("dev-workerx", "dev", Distribution::Vanilla));
        assert!(!is_cluster_container("dev-control-plane2", "dev", Distribution::Vanilla));
    }

    #[test]
    fn test_k3s_patterns() {
        assert!(is_cluster_container("k3d-dev-server-0", "dev", Distribution::K3s));
        assert!(is_cluster_container("k3d-dev-agent-1", "dev", Distribution::K3s));

        assert!(!is_cluster_container("k3d-dev-serverless-0", "dev", Distribution::K3s));
        assert!(!is_cluster_container("k3d-other-server-0", "dev", Distribution::K3s));
        assert!(!is_cluster_container("dev-server-0", "dev", Distribution::K3s));
        assert!(!is_cluster_container("k3d-dev-registry", "dev", Distribution::K3s));
    }

    #[test]
    fn test_talos_patterns() {
        assert!(is_cluster_container("dev-controlplane-1", "dev", Distribution::Talos));
        assert!(is_cluster_container("dev-worker-3", "dev", Distribution::Talos));

        assert!(!is_cluster_container("dev-control-plane", "dev", Distribution::Talos));
        assert!(!is_cluster_container("dev-registry", "dev", Distribution::Talos));
        assert!(!is_cluster_container("other-controlplane-1", "dev", Distribution::Talos));
    }

    #[test]
    fn test_node_containers_for() {
        let names = vec![
            "dev-control-plane".to_string(),
            "dev-worker".to_string(),
            "dev-registry".to_string(),
            "unrelated".to_string(),
        ];
        let nodes = node_containers_for(&names, "dev", Distribution::Vanilla);
        assert_eq!(nodes, vec!["dev-control-plane", "dev-worker"]);
    }
}
