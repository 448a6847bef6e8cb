// List clusters across distributions, optionally filtered to one.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Table};
use tracing::warn;

use crate::provisioner::provisioner_for;
use crate::spec::{ClusterSpec, Distribution, SpecOverrides};

#[derive(Debug, Default)]
pub struct ListOptions {
    pub config: Option<PathBuf>,
    pub distribution: Option<Distribution>,
}

pub async fn run(options: ListOptions) -> Result<()> {
    let base = super::load_spec(options.config.as_deref(), &SpecOverrides::default())?;
    let distributions: Vec<Distribution> = match options.distribution {
        Some(d) => vec![d],
        None => vec![Distribution::Vanilla, Distribution::K3s, Distribution::Talos],
    };

    let mut rows: Vec<(String, Distribution)> = Vec::new();
    for distribution in distributions {
        let cluster = ClusterSpec {
            distribution,
            ..base.clone()
        };
        if cluster
            .provider
            .validate_for_distribution(distribution)
            .is_err()
        {
            continue;
        }
        let provisioner = match provisioner_for(&cluster) {
            Ok(p) => p,
            Err(err) => {
                warn!("skipping {distribution}: {err:#}");
                continue;
            }
        };
        match provisioner.list().await {
            Ok(names) => rows.extend(names.into_iter().map(|n| (n, distribution))),
            Err(err) => warn!("failed to list {distribution} clusters: {err:#}"),
        }
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![Cell::new("NAME"), Cell::new("DISTRIBUTION")]);
    for (name, distribution) in &rows {
        table.add_row(vec![Cell::new(name), Cell::new(distribution.to_string())]);
    }
    println!("{table}");
    Ok(())
}
