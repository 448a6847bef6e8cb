// Export the cluster into a self-describing archive.

use std::path::PathBuf;

use anyhow::Result;

use super::{connection_for, effective_cluster_name};
use crate::backup::{run_backup, BackupOptions};
use crate::k8s::Kubectl;
use crate::spec::{context_name, SpecOverrides};
use crate::ui::{StageInfo, StageReporter};

const BACKUP_STAGE: StageInfo = StageInfo {
    title: "Backing up cluster",
    emoji: "💾",
    activity: "exporting resources",
    success: "Backup written",
    failure_prefix: "failed to back up cluster",
};

#[derive(Debug)]
pub struct BackupCommandOptions {
    pub config: Option<PathBuf>,
    pub name: Option<String>,
    pub output: PathBuf,
    pub include_volumes: bool,
    pub namespaces: Vec<String>,
    pub exclude_types: Vec<String>,
    pub compression: i32,
}

pub async fn run(options: BackupCommandOptions) -> Result<()> {
    let overrides = SpecOverrides {
        name: options.name.clone(),
        ..Default::default()
    };
    let cluster = super::load_spec(options.config.as_deref(), &overrides)?;
    let name = effective_cluster_name(&cluster);
    let (kubeconfig, context) = connection_for(&cluster)?;
    let context = context.or_else(|| Some(context_name(cluster.distribution, &name)));
    let kubectl = Kubectl::new(kubeconfig, context);

    let mut exclude_types = options.exclude_types.clone();
    if !options.include_volumes {
        for kind in ["persistentvolumes", "persistentvolumeclaims"] {
            if !exclude_types.iter().any(|e| e == kind) {
                exclude_types.push(kind.to_string());
            }
        }
    }
    let backup_options = BackupOptions {
        output: options.output.clone(),
        namespaces: options.namespaces.clone(),
        exclude_types,
        compression: options.compression,
        ..Default::default()
    };

    let mut reporter = StageReporter::stdout();
    let metadata = reporter
        .run_stage(&BACKUP_STAGE, run_backup(&kubectl, &name, &backup_options))
        .await?;
    println!(
        "Backed up {} resources from '{}' to {}",
        metadata.resource_count,
        metadata.cluster_name,
        options.output.display()
    );
    Ok(())
}
