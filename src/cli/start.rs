// Start a stopped cluster.

use std::path::PathBuf;

use anyhow::Result;
use tracing::info;

use super::effective_cluster_name;
use crate::provisioner::provisioner_for;
use crate::spec::SpecOverrides;
use crate::ui::{StageInfo, StageReporter};

const START_STAGE: StageInfo = StageInfo {
    title: "Starting cluster",
    emoji: "▶️",
    activity: "starting nodes",
    success: "Cluster started",
    failure_prefix: "failed to start cluster",
};

#[derive(Debug, Default)]
pub struct StartOptions {
    pub config: Option<PathBuf>,
    pub name: Option<String>,
}

pub async fn run(options: StartOptions) -> Result<()> {
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
        .run_stage(&START_STAGE, async move {
            provisioner.start(&stage_name).await
        })
        .await?;
    info!(cluster = %name, "cluster started");
    Ok(())
}
