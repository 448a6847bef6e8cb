// Show the effective cluster configuration and its live status.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Attribute, Cell, Table};

use super::{connection_for, effective_cluster_name};
use crate::provisioner::provisioner_for;
use crate::registry::LocalRegistry;
use crate::spec::{context_name, SpecOverrides};

#[derive(Debug, Default)]
pub struct InfoOptions {
    pub config: Option<PathBuf>,
    pub name: Option<String>,
}

pub async fn run(options: InfoOptions) -> Result<()> {
    let overrides = SpecOverrides {
        name: options.name.clone(),
        ..Default::default()
    };
    let cluster = super::load_spec(options.config.as_deref(), &overrides)?;
    let name = effective_cluster_name(&cluster);
    let provisioner = provisioner_for(&cluster)?;
    let exists = provisioner.exists(&name).await.unwrap_or(false);

    let context = cluster
        .connection
        .context
        .clone()
        .unwrap_or_else(|| context_name(cluster.distribution, &name));
    let kubeconfig = connection_for(&cluster)
        .map(|(path, _)| path.display().to_string())
        .unwrap_or_else(|_| "(not found)".to_string());
    let registry = LocalRegistry::for_cluster(&cluster, &name);

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("FIELD").add_attribute(Attribute::Bold),
            Cell::new("VALUE").add_attribute(Attribute::Bold),
        ]);
    table.add_row(vec![Cell::new("Name"), Cell::new(&name)]);
    table.add_row(vec![
        Cell::new("Status"),
        Cell::new(if exists { "Running" } else { "Not created" }),
    ]);
    table.add_row(vec![
        Cell::new("Distribution"),
        Cell::new(cluster.distribution),
    ]);
    table.add_row(vec![Cell::new("Provider"), Cell::new(cluster.provider)]);
    table.add_row(vec![Cell::new("Context"), Cell::new(&context)]);
    table.add_row(vec![Cell::new("Kubeconfig"), Cell::new(&kubeconfig)]);
    table.add_row(vec![
        Cell::new("Local registry"),
        Cell::new(if cluster.local_registry.enabled {
            registry.host
        } else {
            "disabled".to_string()
        }),
    ]);
    table.add_row(vec![Cell::new("CNI"), Cell::new(cluster.cni)]);
    table.add_row(vec![Cell::new("CSI"), Cell::new(cluster.csi)]);
    table.add_row(vec![
        Cell::new("Metrics server"),
        Cell::new(cluster.metrics_server),
    ]);
    table.add_row(vec![
        Cell::new("Load balancer"),
        Cell::new(cluster.load_balancer),
    ]);
    table.add_row(vec![
        Cell::new("cert-manager"),
        Cell::new(cluster.cert_manager),
    ]);
    table.add_row(vec![
        Cell::new("Policy engine"),
        Cell::new(cluster.policy_engine),
    ]);
    table.add_row(vec![
        Cell::new("GitOps engine"),
        Cell::new(cluster.git_ops_engine),
    ]);
    let mirrors = cluster
        .mirror_registries
        .iter()
        .map(|m| m.host.clone())
        .collect::<Vec<_>>()
        .join(", ");
    table.add_row(vec![
        Cell::new("Mirrors"),
        Cell::new(if mirrors.is_empty() {
            "(none)".to_string()
        } else {
            mirrors
        }),
    ]);
    println!("{table}");
    Ok(())
}
