// Re-apply a backup archive into the current cluster.

use std::path::PathBuf;

use anyhow::Result;

use super::{connection_for, effective_cluster_name};
use crate::backup::{run_restore, ExistingResourcePolicy, RestoreOptions};
use crate::k8s::Kubectl;
use crate::spec::{context_name, SpecOverrides};
use crate::ui::{StageInfo, StageReporter};

const RESTORE_STAGE: StageInfo = StageInfo {
    title: "Restoring cluster",
    emoji: "📂",
    activity: "applying resources",
    success: "Restore complete",
    failure_prefix: "failed to restore cluster",
};

#[derive(Debug)]
pub struct RestoreCommandOptions {
    pub config: Option<PathBuf>,
    pub name: Option<String>,
    pub input: PathBuf,
    pub policy: ExistingResourcePolicy,
    pub dry_run: bool,
}

pub async fn run(options: RestoreCommandOptions) -> Result<()> {
    let overrides = SpecOverrides {
        name: options.name.clone(),
        ..Default::default()
    };
    let cluster = super::load_spec(options.config.as_deref(), &overrides)?;
    let name = effective_cluster_name(&cluster);
    let (kubeconfig, context) = connection_for(&cluster)?;
    let context = context.or_else(|| Some(context_name(cluster.distribution, &name)));
    let kubectl = Kubectl::new(kubeconfig, context);

    let restore_options = RestoreOptions {
        input: options.input.clone(),
        policy: options.policy,
        dry_run: options.dry_run,
    };

    let mut reporter = StageReporter::stdout();
    let report = reporter
        .run_stage(&RESTORE_STAGE, run_restore(&kubectl, &restore_options))
        .await?;

    if let Some(metadata) = &report.metadata {
        println!(
            "Restored backup '{}' of cluster '{}' taken at {} ({} resources)",
            metadata.version, metadata.cluster_name, metadata.timestamp, metadata.resource_count
        );
        if let Some(distribution) = &metadata.distribution {
            println!("  distribution: {distribution}");
        }
        if let Some(provider) = &metadata.provider {
            println!("  provider: {provider}");
        }
    }
    println!(
        "Applied {} resource document(s), skipped {} already present.",
        report.applied, report.skipped_existing
    );
    Ok(())
}
