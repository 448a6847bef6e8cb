// Resource export: iterate the fixed kind order, ask kubectl for YAML,
// count documents, stamp metadata, and stream everything into the archive.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{debug, info};

use super::{
    create_archive, BackupMetadata, ResourceKind, EXPORT_ORDER, METADATA_FILE, RESOURCES_DIR,
};
use crate::k8s::Kubectl;

/// Default bound for the export fan-out.
const DEFAULT_PARALLELISM: usize = 4;
const MAX_PARALLELISM: usize = 8;

#[derive(Debug, Clone)]
pub struct BackupOptions {
    pub output: PathBuf,
    /// Empty means all namespaces.
    pub namespaces: Vec<String>,
    /// Kind names removed before iteration.
    pub exclude_types: Vec<String>,
    /// gzip level: -1 for the library default, else 0..=9.
    pub compression: i32,
    pub parallelism: usize,
}

impl Default for BackupOptions {
    fn default() -> Self {
        BackupOptions {
            output: PathBuf::from("backup.tar.gz"),
            namespaces: Vec::new(),
            exclude_types: vec!["events".to_string()],
            compression: -1,
            parallelism: DEFAULT_PARALLELISM,
        }
    }
}

/// Count the resources in a kubectl YAML dump: one per top-level `kind:`
/// line per document; a non-empty document without one still counts as one;
/// empty documents count as zero.
pub fn count_yaml_documents(yaml: &str) -> usize {
    yaml.split("\n---")
        .map(|doc| {
            let doc = doc.trim();
            if doc.is_empty() || doc == "---" {
                return 0;
            }
            let kind_lines = doc
                .lines()
                .filter(|line| line.starts_with("kind:"))
                .count();
            kind_lines.max(1)
        })
        .sum()
}

/// One export unit: a kind, optionally scoped to a namespace.
#[derive(Debug, Clone)]
struct ExportTask {
    kind: ResourceKind,
    namespace: Option<String>,
}

fn export_tasks(namespaces: &[String], exclude_types: &[String]) -> Vec<ExportTask> {
    let mut tasks = Vec::new();
    for kind in EXPORT_ORDER {
        if exclude_types.iter().any(|e| e == kind.name) {
            continue;
        }
        if kind.namespaced && !namespaces.is_empty() {
            for namespace in namespaces {
                tasks.push(ExportTask {
                    kind: *kind,
                    namespace: Some(namespace.clone()),
                });
            }
        } else {
            tasks.push(ExportTask {
                kind: *kind,
                namespace: None,
            });
        }
    }
    tasks
}

fn task_file_name(task: &ExportTask) -> String {
    match &task.namespace {
        Some(namespace) => format!("{}-{namespace}.yaml", task.kind.name),
        None => format!("{}.yaml", task.kind.name),
    }
}

/// Export the cluster into a gzip-compressed tar at `options.output`.
pub async fn run_backup(
    kubectl: &Kubectl,
    cluster_name: &str,
    options: &BackupOptions,
) -> Result<BackupMetadata> {
    let scratch = tempfile::tempdir().context("failed to create backup scratch directory")?;
    let resources_root = scratch.path().join(RESOURCES_DIR);
    std::fs::create_dir_all(&resources_root).context("failed to create resources directory")?;

    let tasks = export_tasks(&options.namespaces, &options.exclude_types);
    let parallelism = options.parallelism.clamp(1, MAX_PARALLELISM);
    info!(
        kinds = tasks.len(),
        parallelism, "exporting cluster resources"
    );

    let kubectl = Arc::new(kubectl.clone());
    let resources_root = Arc::new(resources_root);
    let results: Vec<Result<usize>> = stream::iter(tasks)
        .map(|task| {
            let kubectl = kubectl.clone();
            let resources_root = resources_root.clone();
            async move {
                let yaml = kubectl
                    .get_yaml(task.kind.name, task.namespace.as_deref())
                    .await?;
                if yaml.trim().is_empty() {
                    return Ok(0);
                }
                let count = count_yaml_documents(&yaml);
                let kind_dir = resources_root.join(task.kind.name);
                std::fs::create_dir_all(&kind_dir)
                    .with_context(|| format!("failed to create '{}'", kind_dir.display()))?;
                let path = kind_dir.join(task_file_name(&task));
                std::fs::write(&path, yaml)
                    .with_context(|| format!("failed to write '{}'", path.display()))?;
                debug!(kind = task.kind.name, count, "exported resource kind");
                Ok(count)
            }
        })
        .buffer_unordered(parallelism)
        .collect()
        .await;

    let mut resource_count = 0;
    for result in results {
        resource_count += result?;
    }

    let metadata = BackupMetadata {
        version: "v1".to_string(),
        timestamp: Utc::now().to_rfc3339(),
        cluster_name: cluster_name.to_string(),
        ksail_version: env!("CARGO_PKG_VERSION").to_string(),
        resource_count,
        distribution: None,
        provider: None,
    };
    let metadata_json =
        serde_json::to_string_pretty(&metadata).context("failed to serialize backup metadata")?;
    std::fs::write(scratch.path().join(METADATA_FILE), metadata_json)
        .context("failed to write backup metadata")?;

    create_archive(scratch.path(), &options.output, options.compression)?;
    info!(
        resources = resource_count,
        output = %options.output.display(),
        "backup archive written"
    );
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_single_document() {
        assert_eq!(count_yaml_documents("kind: Pod\nmetadata:\n  name: t"), 1);
    }

    #[test]
    fn test_count_multiple_documents() {
        assert_eq!(
            count_yaml_documents("kind: Pod\n---\nkind: Service\n---\nkind: Deployment"),
            3
        );
    }

    #[test]
    fn test_count_document_without_kind() {
        assert_eq!(count_yaml_documents("metadata:\n  name: t"), 1);
    }

    #[test]
    fn test_count_empty_inputs() {
        assert_eq!(count_yaml_documents(""), 0);
        assert_eq!(count_yaml_documents("\n---\n\n---\n"), 0);
    }

    #[test]
    fn test_count_ignores_indented_kind_lines() {
        let yaml = "kind: List\nitems:\n  - kind: Pod\n    metadata: {}\n";
        assert_eq!(count_yaml_documents(yaml), 1);
    }

    #[test]
    fn test_export_tasks_respect_exclusions_and_namespaces() {
        let tasks = export_tasks(&[], &["events".to_string()]);
        assert!(tasks.iter().all(|t| t.kind.name != "events"));
        assert!(tasks.iter().all(|t| t.namespace.is_none()));

        let namespaces = vec!["default".to_string(), "kube-system".to_string()];
        let tasks = export_tasks(&namespaces, &[]);
        // Cluster-scoped kinds are exported once; namespaced kinds per ns.
        let crd_tasks: Vec<_> = tasks
            .iter()
            .filter(|t| t.kind.name == "customresourcedefinitions")
            .collect();
        assert_eq!(crd_tasks.len(), 1);
        let deploy_tasks: Vec<_> = tasks
            .iter()
            .filter(|t| t.kind.name == "deployments")
            .collect();
        assert_eq!(deploy_tasks.len(), 2);
    }

    #[test]
    fn test_task_file_name() {
        let task = ExportTask {
            kind: ResourceKind {
                name: "deployments",
                namespaced: true,
            },
            namespace: Some("default".to_string()),
        };
        assert_eq!(task_file_name(&task), "deployments-default.yaml");
        let task = ExportTask {
            kind: ResourceKind {
                name: "namespaces",
                namespaced: false,
            },
            namespace: None,
        };
        assert_eq!(task_file_name(&task), "namespaces.yaml");
    }
}
