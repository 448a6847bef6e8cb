// Diff engine: field-by-field classification of a desired spec against an
// observed one.
//
// Table-driven and pure: for any (old, new) pair the result is the same
// independent of wall clock, network and container engine. Emission order
// within a category is the table order, which tests may assert.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::spec::{ClusterSpec, Distribution};

/// Severity class of one field difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeCategory {
    InPlace,
    RebootRequired,
    RecreateRequired,
}

impl fmt::Display for ChangeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeCategory::InPlace => "in-place",
            ChangeCategory::RebootRequired => "reboot-required",
            ChangeCategory::RecreateRequired => "recreate-required",
        };
        f.write_str(s)
    }
}

/// One classified field difference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub field: String,
    pub old_value: String,
    pub new_value: String,
    pub category: ChangeCategory,
    pub reason: String,
}

/// The four ordered sequences a diff (and later the reconciler) produces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiffResult {
    pub in_place: Vec<Change>,
    pub reboot_required: Vec<Change>,
    pub recreate_required: Vec<Change>,
    /// Populated only by the reconciler.
    pub failed: Vec<Change>,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.in_place.is_empty()
            && self.reboot_required.is_empty()
            && self.recreate_required.is_empty()
    }

    pub fn total(&self) -> usize {
        self.in_place.len() + self.reboot_required.len() + self.recreate_required.len()
    }

    /// Recreate-class changes require explicit user confirmation.
    pub fn needs_user_confirmation(&self) -> bool {
        !self.recreate_required.is_empty()
    }

    pub fn push(&mut self, change: Change) {
        match change.category {
            ChangeCategory::InPlace => self.in_place.push(change),
            ChangeCategory::RebootRequired => self.reboot_required.push(change),
            ChangeCategory::RecreateRequired => self.recreate_required.push(change),
        }
    }

    fn contains_field(&self, field: &str) -> bool {
        let wanted = normalize_field(field);
        self.in_place
            .iter()
            .chain(self.reboot_required.iter())
            .chain(self.recreate_required.iter())
            .any(|c| normalize_field(&c.field) == wanted)
    }

    /// Merge a provisioner-specific diff into this one, dropping entries
    /// whose field is already present. Field comparison tolerates the
    /// `cluster.` prefix differing between the two sides.
    pub fn merge(&mut self, other: DiffResult) {
        for change in other
            .in_place
            .into_iter()
            .chain(other.reboot_required)
            .chain(other.recreate_required)
        {
            if !self.contains_field(&change.field) {
                self.push(change);
            }
        }
        self.failed.extend(other.failed);
    }
}

/// Outcome of applying an update through a provisioner.
#[derive(Debug, Clone, Default)]
pub struct UpdateOutcome {
    pub applied: Vec<Change>,
    pub failed: Vec<Change>,
}

fn normalize_field(field: &str) -> &str {
    field.strip_prefix("cluster.").unwrap_or(field)
}

type Extractor = fn(&ClusterSpec) -> Option<String>;
type CategoryFn = fn(&ClusterSpec) -> ChangeCategory;

/// One scalar field rule. Category is a function of the observed spec so
/// distribution-dependent classifications stay in the table.
struct FieldRule {
    path: &'static str,
    reason: &'static str,
    category: CategoryFn,
    extract: Extractor,
}

/// The local-registry endpoint is baked into containerd config at creation
/// on Vanilla; the other distributions rewrite it live.
fn local_registry_category(old: &ClusterSpec) -> ChangeCategory {
    match old.distribution {
        Distribution::Vanilla => ChangeCategory::RecreateRequired,
        Distribution::K3s | Distribution::Talos => ChangeCategory::InPlace,
    }
}

fn local_registry_endpoint(spec: &ClusterSpec) -> Option<String> {
    let registry = &spec.local_registry;
    if !registry.enabled {
        return Some("disabled".to_string());
    }
    Some(
        registry
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("localhost:{}", registry.host_port.unwrap_or(5999))),
    )
}

/// The authoritative classification table. Order here is emission order.
fn field_rules() -> &'static [FieldRule] {
    const RULES: &[FieldRule] = &[
        FieldRule {
            path: "cluster.distribution",
            reason: "structural change",
            category: |_| ChangeCategory::RecreateRequired,
            extract: |s| Some(s.distribution.to_string()),
        },
        FieldRule {
            path: "cluster.provider",
            reason: "structural change",
            category: |_| ChangeCategory::RecreateRequired,
            extract: |s| Some(s.provider.to_string()),
        },
        FieldRule {
            path: "cluster.cni",
            reason: "Helm install/upgrade/uninstall",
            category: |_| ChangeCategory::InPlace,
            extract: |s| Some(s.cni.to_string()),
        },
        FieldRule {
            path: "cluster.csi",
            reason: "Helm install/upgrade/uninstall",
            category: |_| ChangeCategory::InPlace,
            extract: |s| Some(s.csi.to_string()),
        },
        FieldRule {
            path: "cluster.metricsServer",
            reason: "Helm install/upgrade/uninstall",
            category: |_| ChangeCategory::InPlace,
            extract: |s| Some(s.metrics_server.to_string()),
        },
        FieldRule {
            path: "cluster.loadBalancer",
            reason: "Helm install/upgrade/uninstall",
            category: |_| ChangeCategory::InPlace,
            extract: |s| Some(s.load_balancer.to_string()),
        },
        FieldRule {
            path: "cluster.certManager",
            reason: "Helm install/upgrade/uninstall",
            category: |_| ChangeCategory::InPlace,
            extract: |s| Some(s.cert_manager.to_string()),
        },
        FieldRule {
            path: "cluster.policyEngine",
            reason: "Helm install/upgrade/uninstall",
            category: |_| ChangeCategory::InPlace,
            extract: |s| Some(s.policy_engine.to_string()),
        },
        FieldRule {
            path: "cluster.gitOpsEngine",
            reason: "Helm install/upgrade/uninstall",
            category: |_| ChangeCategory::InPlace,
            extract: |s| Some(s.git_ops_engine.to_string()),
        },
        FieldRule {
            path: "cluster.localRegistry.registry",
            reason: "containerd config baked at creation on vanilla",
            category: local_registry_category,
            extract: local_registry_endpoint,
        },
        FieldRule {
            path: "cluster.vanilla.mirrorsDir",
            reason: "baked at creation",
            category: |_| ChangeCategory::RecreateRequired,
            extract: |s| s.vanilla.mirrors_dir.clone(),
        },
        FieldRule {
            path: "cluster.k3s.servers",
            reason: "server count baked at creation",
            category: |_| ChangeCategory::RecreateRequired,
            extract: |s| Some(s.k3s.servers.to_string()),
        },
        FieldRule {
            path: "cluster.k3s.agents",
            reason: "only affects new nodes",
            category: |_| ChangeCategory::InPlace,
            extract: |s| Some(s.k3s.agents.to_string()),
        },
        FieldRule {
            path: "cluster.k3s.extraServerArgs",
            reason: "applied at server start",
            category: |_| ChangeCategory::RebootRequired,
            extract: |s| Some(s.k3s.extra_server_args.join(" ")),
        },
        FieldRule {
            path: "cluster.talos.controlPlanes",
            reason: "provider supports scaling",
            category: |_| ChangeCategory::InPlace,
            extract: |s| Some(s.talos.control_planes.to_string()),
        },
        FieldRule {
            path: "cluster.talos.workers",
            reason: "provider supports scaling",
            category: |_| ChangeCategory::InPlace,
            extract: |s| Some(s.talos.workers.to_string()),
        },
        FieldRule {
            path: "cluster.talos.iso",
            reason: "only affects new nodes",
            category: |_| ChangeCategory::InPlace,
            extract: |s| s.talos.iso.clone(),
        },
        FieldRule {
            path: "cluster.hetzner.controlPlaneServerType",
            reason: "immutable per server",
            category: |_| ChangeCategory::RecreateRequired,
            extract: |s| Some(s.hetzner.control_plane_server_type.clone()),
        },
        FieldRule {
            path: "cluster.hetzner.location",
            reason: "immutable per server",
            category: |_| ChangeCategory::RecreateRequired,
            extract: |s| Some(s.hetzner.location.clone()),
        },
        FieldRule {
            path: "cluster.hetzner.networkName",
            reason: "immutable per server",
            category: |_| ChangeCategory::RecreateRequired,
            extract: |s| s.hetzner.network_name.clone(),
        },
        FieldRule {
            path: "cluster.hetzner.networkCidr",
            reason: "immutable per server",
            category: |_| ChangeCategory::RecreateRequired,
            extract: |s| Some(s.hetzner.network_cidr.clone()),
        },
        FieldRule {
            path: "cluster.hetzner.workerServerType",
            reason: "only affects new nodes",
            category: |_| ChangeCategory::InPlace,
            extract: |s| Some(s.hetzner.worker_server_type.clone()),
        },
        FieldRule {
            path: "cluster.hetzner.sshKeyName",
            reason: "only affects new nodes",
            category: |_| ChangeCategory::InPlace,
            extract: |s| s.hetzner.ssh_key_name.clone(),
        },
    ];
    RULES
}

/// Component toggle fields the reconciler owns (normalized, no `cluster.`
/// prefix).
pub const COMPONENT_FIELDS: &[&str] = &[
    "cni",
    "csi",
    "metricsServer",
    "loadBalancer",
    "certManager",
    "policyEngine",
    "gitOpsEngine",
];

pub fn is_component_field(field: &str) -> bool {
    COMPONENT_FIELDS.contains(&normalize_field(field))
}

/// Compare observed against desired. `None` on either side yields an empty
/// result.
pub fn diff(old: Option<&ClusterSpec>, new: Option<&ClusterSpec>) -> DiffResult {
    let (Some(old), Some(new)) = (old, new) else {
        return DiffResult::default();
    };
    let mut result = DiffResult::default();
    for rule in field_rules() {
        let old_value = (rule.extract)(old);
        let new_value = (rule.extract)(new);
        if old_value != new_value {
            result.push(Change {
                field: rule.path.to_string(),
                old_value: old_value.unwrap_or_default(),
                new_value: new_value.unwrap_or_default(),
                category: (rule.category)(old),
                reason: rule.reason.to_string(),
            });
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{
        CniToggle, CsiToggle, Distribution, GitOpsEngineToggle, MetricsServerToggle, Provider,
    };

    fn base() -> ClusterSpec {
        ClusterSpec::default()
    }

    #[test]
    fn test_identical_specs_diff_empty() {
        let spec = base();
        assert!(diff(Some(&spec), Some(&spec)).is_empty());
    }

    #[test]
    fn test_nil_side_yields_empty() {
        let spec = base();
        assert!(diff(None, Some(&spec)).is_empty());
        assert!(diff(Some(&spec), None).is_empty());
        assert!(diff(None, None).is_empty());
    }

    #[test]
    fn test_disjoint_in_place_mutations_count() {
        let old = base();
        let mut new = base();
        new.cni = CniToggle::Cilium;
        new.csi = CsiToggle::Enabled;
        new.git_ops_engine = GitOpsEngineToggle::Flux;

        let result = diff(Some(&old), Some(&new));
        assert_eq!(result.total(), 3);
        assert_eq!(result.in_place.len(), 3);
        assert!(result.reboot_required.is_empty());
        assert!(result.recreate_required.is_empty());
        assert!(!result.needs_user_confirmation());
    }

    #[test]
    fn test_classification_scenario() {
        // old {cni: default, csi: default, vanilla.mirrorsDir: "a"}
        // new {cni: cilium, csi: enabled, vanilla.mirrorsDir: "b"}
        let mut old = base();
        old.vanilla.mirrors_dir = Some("a".to_string());
        let mut new = base();
        new.cni = CniToggle::Cilium;
        new.csi = CsiToggle::Enabled;
        new.vanilla.mirrors_dir = Some("b".to_string());

        let result = diff(Some(&old), Some(&new));
        assert_eq!(result.in_place.len(), 2);
        assert_eq!(result.in_place[0].field, "cluster.cni");
        assert_eq!(result.in_place[1].field, "cluster.csi");
        assert_eq!(result.recreate_required.len(), 1);
        assert_eq!(result.recreate_required[0].field, "cluster.vanilla.mirrorsDir");
        assert_eq!(result.recreate_required[0].reason, "baked at creation");
        assert!(result.needs_user_confirmation());
    }

    #[test]
    fn test_distribution_and_provider_are_structural() {
        let old = base();
        let mut new = base();
        new.distribution = Distribution::Talos;
        new.provider = Provider::Hetzner;
        let result = diff(Some(&old), Some(&new));
        assert_eq!(result.recreate_required.len(), 2);
        for change in &result.recreate_required {
            assert_eq!(change.reason, "structural change");
        }
        // Emission order is table order.
        assert_eq!(result.recreate_required[0].field, "cluster.distribution");
        assert_eq!(result.recreate_required[1].field, "cluster.provider");
    }

    #[test]
    fn test_local_registry_category_depends_on_distribution() {
        let mut old = base();
        let mut new = base();
        new.local_registry.host_port = Some(6000);
        let result = diff(Some(&old), Some(&new));
        assert_eq!(result.recreate_required.len(), 1);
        assert_eq!(
            result.recreate_required[0].reason,
            "containerd config baked at creation on vanilla"
        );

        old.distribution = Distribution::K3s;
        let mut new = base();
        new.distribution = Distribution::K3s;
        new.local_registry.host_port = Some(6000);
        let result = diff(Some(&old), Some(&new));
        assert_eq!(result.in_place.len(), 1);
        assert_eq!(result.in_place[0].field, "cluster.localRegistry.registry");
    }

    #[test]
    fn test_k3s_extra_server_args_reboot_required() {
        let mut old = base();
        old.distribution = Distribution::K3s;
        let mut new = old.clone();
        new.k3s.extra_server_args = vec!["--disable=metrics-server".to_string()];
        let result = diff(Some(&old), Some(&new));
        assert_eq!(result.reboot_required.len(), 1);
        assert_eq!(result.reboot_required[0].field, "cluster.k3s.extraServerArgs");
    }

    #[test]
    fn test_metrics_server_change_is_in_place() {
        let old = base();
        let mut new = base();
        new.metrics_server = MetricsServerToggle::Disabled;
        let result = diff(Some(&old), Some(&new));
        assert_eq!(result.in_place.len(), 1);
        assert_eq!(result.in_place[0].field, "cluster.metricsServer");
        assert!(is_component_field(&result.in_place[0].field));
    }

    #[test]
    fn test_hetzner_field_split() {
        let mut old = base();
        old.distribution = Distribution::Talos;
        old.provider = Provider::Hetzner;
        let mut new = old.clone();
        new.hetzner.control_plane_server_type = "cx32".to_string();
        new.hetzner.worker_server_type = "cx32".to_string();
        new.hetzner.ssh_key_name = Some("ops".to_string());
        let result = diff(Some(&old), Some(&new));
        assert_eq!(result.recreate_required.len(), 1);
        assert_eq!(
            result.recreate_required[0].field,
            "cluster.hetzner.controlPlaneServerType"
        );
        assert_eq!(result.in_place.len(), 2);
    }

    #[test]
    fn test_merge_dedupes_with_prefix_tolerance() {
        let old = base();
        let mut new = base();
        new.talos.workers = 2;
        let mut main = diff(Some(&old), Some(&new));
        assert_eq!(main.in_place.len(), 1);

        let mut provisioner_diff = DiffResult::default();
        // Same field without the `cluster.` prefix: dropped.
        provisioner_diff.push(Change {
            field: "talos.workers".to_string(),
            old_value: "0".to_string(),
            new_value: "2".to_string(),
            category: ChangeCategory::InPlace,
            reason: "provider supports scaling".to_string(),
        });
        // Genuinely new field: kept.
        provisioner_diff.push(Change {
            field: "talos.nodeImage".to_string(),
            old_value: "v1.7.0".to_string(),
            new_value: "v1.8.0".to_string(),
            category: ChangeCategory::RebootRequired,
            reason: "node image applied on reboot".to_string(),
        });
        main.merge(provisioner_diff);
        assert_eq!(main.in_place.len(), 1);
        assert_eq!(main.reboot_required.len(), 1);
        assert_eq!(main.reboot_required[0].field, "talos.nodeImage");
    }

    #[test]
    fn test_is_component_field() {
        assert!(is_component_field("cluster.cni"));
        assert!(is_component_field("gitOpsEngine"));
        assert!(!is_component_field("cluster.talos.workers"));
        assert!(!is_component_field("cluster.distribution"));
    }
}
