// Stop a running cluster without deleting it.

use std::path::PathBuf;

use anyhow::Result;
use tracing::info;

use super::effective_cluster_name;
use crate::provisioner::provisioner_for;
use crate::spec::SpecOverrides;
use crate::ui::{StageInfo, StageReporter};

const STOP_STAGE: StageInfo = StageInfo {
    title: "Stopping cluster",
    emoji: "⏸️",
    activity: "stopping nodes",
    success: "Cluster stopped",
    failure_prefix: "failed to stop cluster",
};

#[derive(Debug, Default)]
pub struct StopOptions {
    pub config: Option<PathBuf>,
    pub name: Option<String>,
}

pub async fn run(options: StopOptions) -> Result<()> {
    let overrides = SpecOverrides {
        name: options.name.clone(),
        ..Default::default()
    };
    let cluster = super::load_spec(options.config.as_deref(), &overrides)?;
    let name = effective_cluster_name(&cluster);
    let provisioner = provisioner_for(&cluster)?;

    let mut reporter = StageReporter::stdout();
    let stage_name = name.clone();
    reporter
        .run_stage(&STOP_STAGE, async move { provisioner.stop(&stage_name).await })
        .await?;
    info!(cluster = %name, "cluster stopped");
    Ok(())
}
