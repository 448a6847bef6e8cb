// Restore: safe extraction, metadata readback, and an ordered apply loop
// with the existing-resource policy.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_yaml::Value;
use tracing::{debug, info, warn};

use super::{
    extract_archive, BackupMetadata, ExistingResourcePolicy, RestoreError, EXPORT_ORDER,
    METADATA_FILE, RESOURCES_DIR,
};
use crate::k8s::{all_lines_contain, Kubectl};

const BACKUP_NAME_LABEL: &str = "ksail.io/backup-name";
const RESTORE_NAME_LABEL: &str = "ksail.io/restore-name";

#[derive(Debug, Clone)]
pub struct RestoreOptions {
    pub input: PathBuf,
    pub policy: ExistingResourcePolicy,
    pub dry_run: bool,
}

/// What a restore run did, for the CLI to report.
#[derive(Debug, Default)]
pub struct RestoreReport {
    pub metadata: Option<BackupMetadata>,
    pub applied: usize,
    pub skipped_existing: usize,
    pub failures: Vec<String>,
}

/// Backup name derived from the archive file name.
fn backup_name_from(input: &Path) -> String {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "backup".to_string());
    name.trim_end_matches(".tar.gz")
        .trim_end_matches(".tgz")
        .to_string()
}

/// Inject the backup/restore labels into a manifest document. `kind: List`
/// documents get the labels on every item.
fn inject_labels(doc: &mut Value, backup_name: &str, restore_name: &str) {
    let is_list = doc
        .get("kind")
        .and_then(Value::as_str)
        .map(|k| k == "List")
        .unwrap_or(false);
    if is_list {
        if let Some(items) = doc.get_mut("items").and_then(Value::as_sequence_mut) {
            for item in items {
                inject_labels(item, backup_name, restore_name);
            }
        }
        return;
    }

    let Some(mapping) = doc.as_mapping_mut() else {
        return;
    };
    let metadata = mapping
        .entry(Value::String("metadata".to_string()))
        .or_insert_with(|| Value::Mapping(Default::default()));
    let Some(metadata) = metadata.as_mapping_mut() else {
        return;
    };
    let labels = metadata
        .entry(Value::String("labels".to_string()))
        .or_insert_with(|| Value::Mapping(Default::default()));
    if let Some(labels) = labels.as_mapping_mut() {
        labels.insert(
            Value::String(BACKUP_NAME_LABEL.to_string()),
            Value::String(backup_name.to_string()),
        );
        labels.insert(
            Value::String(RESTORE_NAME_LABEL.to_string()),
            Value::String(restore_name.to_string()),
        );
    }
}

fn split_documents(yaml: &str) -> Result<Vec<Value>> {
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(yaml) {
        let value = Value::deserialize(document).context("failed to parse manifest document")?;
        if !value.is_null() {
            documents.push(value);
        }
    }
    Ok(documents)
}

/// Restore an archive into the cluster. Individual file failures are
/// recorded and reported in aggregate; resource types absent from the
/// archive are skipped silently.
pub async fn run_restore(kubectl: &Kubectl, options: &RestoreOptions) -> Result<RestoreReport> {
    let scratch = tempfile::tempdir().context("failed to create restore scratch directory")?;
    extract_archive(&options.input, scratch.path())?;

    let mut report = RestoreReport::default();

    let metadata_path = scratch.path().join(METADATA_FILE);
    if metadata_path.exists() {
        let raw = std::fs::read_to_string(&metadata_path)
            .context("failed to read backup metadata")?;
        let metadata: BackupMetadata =
            serde_json::from_str(&raw).context("failed to parse backup metadata")?;
        info!(
            version = %metadata.version,
            timestamp = %metadata.timestamp,
            cluster = %metadata.cluster_name,
            resources = metadata.resource_count,
            "restoring backup"
        );
        report.metadata = Some(metadata);
    } else {
        warn!("archive has no backup metadata; proceeding anyway");
    }

    let backup_name = backup_name_from(&options.input);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let restore_name = format!("restore-{nanos}");

    let resources_root = scratch.path().join(RESOURCES_DIR);
    for kind in EXPORT_ORDER {
        let kind_dir = resources_root.join(kind.name);
        if !kind_dir.is_dir() {
            continue;
        }
        let mut files: Vec<PathBuf> = std::fs::read_dir(&kind_dir)
            .with_context(|| format!("failed to read '{}'", kind_dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().map(|e| e == "yaml").unwrap_or(false))
            .collect();
        files.sort();

        for file in files {
            let yaml = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read '{}'", file.display()))?;
            let documents = match split_documents(&yaml) {
                Ok(docs) => docs,
                Err(err) => {
                    report
                        .failures
                        .push(format!("{}: {err:#}", file.display()));
                    continue;
                }
            };
            for mut doc in documents {
                inject_labels(&mut doc, &backup_name, &restore_name);
                let rendered =
                    serde_yaml::to_string(&doc).context("failed to render manifest document")?;
                let mut temp =
                    tempfile::NamedTempFile::new().context("failed to create temp manifest")?;
                std::io::Write::write_all(&mut temp, rendered.as_bytes())
                    .context("failed to write temp manifest")?;

                let output = match options.policy {
                    ExistingResourcePolicy::None => {
                        kubectl.create_file(temp.path(), options.dry_run).await?
                    }
                    ExistingResourcePolicy::Update => {
                        kubectl.apply_file(temp.path(), options.dry_run).await?
                    }
                };

                if output.success {
                    report.applied += 1;
                    continue;
                }
                // With policy `none`, a document that already exists is a
                // skip; every non-empty stderr line must say so.
                if options.policy == ExistingResourcePolicy::None
                    && all_lines_contain(&output.stderr, "already exists")
                {
                    debug!(file = %file.display(), "resource already exists; skipping");
                    report.skipped_existing += 1;
                    continue;
                }
                report.failures.push(format!(
                    "{} ({}): {}",
                    file.display(),
                    kind.name,
                    output.stderr.trim()
                ));
            }
        }
    }

    if report.failures.is_empty() {
        Ok(report)
    } else {
        Err(RestoreError::RestoreFailed(report.failures.join("; ")).into())
    }
}
