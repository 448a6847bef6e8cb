// Backup / restore: self-describing compressed archives of cluster
// resources, exported in a fixed kind order and re-applied with a
// configurable existing-resource policy.

mod archive;
mod export;
mod restore;

pub use archive::{create_archive, extract_archive, is_safe_entry_path, ArchiveError};
pub use export::{count_yaml_documents, run_backup, BackupOptions};
pub use restore::{run_restore, RestoreOptions, RestoreReport};

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Archive-root metadata document.
pub const METADATA_FILE: &str = "backup-metadata.json";

/// Archive directory holding one subdirectory per resource kind.
pub const RESOURCES_DIR: &str = "resources";

#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
    #[error("invalid existing-resource policy '{0}' (valid: none, update)")]
    InvalidResourcePolicy(String),
    #[error("restore completed with failures: {0}")]
    RestoreFailed(String),
}

/// What to do when a restored resource already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExistingResourcePolicy {
    /// `kubectl create`; "already exists" responses are skips, not errors.
    #[default]
    None,
    /// `kubectl apply`; existing resources are updated.
    Update,
}

impl FromStr for ExistingResourcePolicy {
    type Err = RestoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(ExistingResourcePolicy::None),
            "update" => Ok(ExistingResourcePolicy::Update),
            other => Err(RestoreError::InvalidResourcePolicy(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    pub version: String,
    pub timestamp: String,
    pub cluster_name: String,
    pub ksail_version: String,
    pub resource_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

/// One exportable resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceKind {
    pub name: &'static str,
    pub namespaced: bool,
}

/// Fixed export (and restore) order: CRDs first so custom resources can be
/// re-applied, namespaces before anything namespaced, storage before the
/// workloads that claim it, RBAC before the workloads that assume it.
pub const EXPORT_ORDER: &[ResourceKind] = &[
    ResourceKind { name: "customresourcedefinitions", namespaced: false },
    ResourceKind { name: "namespaces", namespaced: false },
    ResourceKind { name: "storageclasses", namespaced: false },
    ResourceKind { name: "persistentvolumes", namespaced: false },
    ResourceKind { name: "persistentvolumeclaims", namespaced: true },
    ResourceKind { name: "serviceaccounts", namespaced: true },
    ResourceKind { name: "clusterroles", namespaced: false },
    ResourceKind { name: "clusterrolebindings", namespaced: false },
    ResourceKind { name: "roles", namespaced: true },
    ResourceKind { name: "rolebindings", namespaced: true },
    ResourceKind { name: "configmaps", namespaced: true },
    ResourceKind { name: "secrets", namespaced: true },
    ResourceKind { name: "services", namespaced: true },
    ResourceKind { name: "deployments", namespaced: true },
    ResourceKind { name: "statefulsets", namespaced: true },
    ResourceKind { name: "daemonsets", namespaced: true },
    ResourceKind { name: "cronjobs", namespaced: true },
    ResourceKind { name: "jobs", namespaced: true },
    ResourceKind { name: "events", namespaced: true },
    ResourceKind { name: "ingresses", namespaced: true },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_parse() {
        assert_eq!(
            "none".parse::<ExistingResourcePolicy>().unwrap(),
            ExistingResourcePolicy::None
        );
        assert_eq!(
            "Update".parse::<ExistingResourcePolicy>().unwrap(),
            ExistingResourcePolicy::Update
        );
        let err = "merge".parse::<ExistingResourcePolicy>().unwrap_err();
        assert!(matches!(err, RestoreError::InvalidResourcePolicy(_)));
        assert!(err.to_string().contains("merge"));
    }

    #[test]
    fn test_export_order_shape() {
        assert_eq!(EXPORT_ORDER[0].name, "customresourcedefinitions");
        assert_eq!(EXPORT_ORDER[1].name, "namespaces");
        let last = EXPORT_ORDER.last().unwrap();
        assert_eq!(last.name, "ingresses");
        // Storage comes before workloads.
        let idx = |name: &str| EXPORT_ORDER.iter().position(|k| k.name == name).unwrap();
        assert!(idx("persistentvolumes") < idx("deployments"));
        assert!(idx("clusterroles") < idx("deployments"));
    }

    #[test]
    fn test_metadata_round_trip() {
        let metadata = BackupMetadata {
            version: "v1".to_string(),
            timestamp: "2025-01-01T00:00:00Z".to_string(),
            cluster_name: "dev".to_string(),
            ksail_version: "0.1.0".to_string(),
            resource_count: 12,
            distribution: Some("Vanilla".to_string()),
            provider: None,
        };
        let json = serde_json::to_string(&metadata).unwrap();
        assert!(json.contains("\"clusterName\":\"dev\""));
        assert!(json.contains("\"resourceCount\":12"));
        let back: BackupMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back.cluster_name, "dev");
        assert_eq!(back.distribution.as_deref(), Some("Vanilla"));
    }
}
