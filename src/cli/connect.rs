// Point the user's kubectl at the cluster: switch the kubeconfig context
// and print how to reach it.

use std::path::PathBuf;

use anyhow::Result;
use tracing::info;

use super::{connection_for, effective_cluster_name};
use crate::exec::default_invoker;
use crate::spec::{context_name, SpecOverrides};

#[derive(Debug, Default)]
pub struct ConnectOptions {
    pub config: Option<PathBuf>,
    pub name: Option<String>,
    pub kubeconfig: Option<String>,
}

pub async fn run(options: ConnectOptions) -> Result<()> {
    let overrides = SpecOverrides {
        name: options.name.clone(),
        kubeconfig: options.kubeconfig.clone(),
        ..Default::default()
    };
    let cluster = super::load_spec(options.config.as_deref(), &overrides)?;
    let name = effective_cluster_name(&cluster);
    let (kubeconfig, context) = connection_for(&cluster)?;
    let context = context.unwrap_or_else(|| context_name(cluster.distribution, &name));

    let args = vec![
        "--kubeconfig".to_string(),
        kubeconfig.display().to_string(),
        "config".to_string(),
        "use-context".to_string(),
        context.clone(),
    ];
    default_invoker()
        .run("kubectl", &args)
        .await?
        .require_success("kubectl config use-context")?;

    info!(cluster = %name, context = %context, "switched kubeconfig context");
    println!("Switched to context '{context}'.");
    println!("export KUBECONFIG={}", kubeconfig.display());
    Ok(())
}
