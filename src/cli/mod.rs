// Command implementations. Each submodule holds one subcommand's staged
// pipeline; main.rs only parses arguments and dispatches here.

pub mod backup;
pub mod connect;
pub mod create;
pub mod delete;
pub mod info;
pub mod init;
pub mod list;
pub mod restore;
pub mod start;
pub mod stop;
pub mod update;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::components::{Helm, InstallContext};
use crate::engine::ContainerEngine;
use crate::k8s::{self, Kubectl};
use crate::spec::{
    self, resolve_cluster_name, ClusterSpec, Distribution, Provider, SpecOverrides,
};

/// Load the spec document (explicit path, or ksail.yaml in the working
/// directory), fall back to defaults when none exists, and apply CLI
/// overrides. Validation runs before anything takes effect.
pub fn load_spec(config: Option<&Path>, overrides: &SpecOverrides) -> Result<ClusterSpec> {
    let cwd = std::env::current_dir().context("failed to resolve working directory")?;
    let mut cluster = match spec::find_config_file(config, &cwd) {
        Ok(path) => spec::load_document(&path)?.spec.cluster,
        Err(err) => {
            // An explicitly named file must exist; the probed default may
            // be absent.
            if config.is_some() {
                return Err(err.into());
            }
            ClusterSpec::default()
        }
    };
    spec::apply_overrides(&mut cluster, overrides)?;
    Ok(cluster)
}

/// Effective cluster name for a loaded spec: spec name, else the name
/// embedded in the current kubeconfig context, else `"ksail"`.
pub fn effective_cluster_name(cluster: &ClusterSpec) -> String {
    let context = current_kube_context(cluster);
    resolve_cluster_name(cluster.name.as_deref(), None, context.as_deref())
}

fn current_kube_context(cluster: &ClusterSpec) -> Option<String> {
    let path = k8s::kubeconfig_path(cluster.connection.kubeconfig.as_deref()).ok()?;
    k8s::current_context(&path).ok().flatten()
}

/// Kubeconfig path + context the spec points at.
pub fn connection_for(cluster: &ClusterSpec) -> Result<(PathBuf, Option<String>)> {
    let path = k8s::kubeconfig_path(cluster.connection.kubeconfig.as_deref())?;
    Ok((path, cluster.connection.context.clone()))
}

/// Build the installer context for a cluster that is up.
pub fn install_context(cluster: &ClusterSpec, cluster_name: &str) -> Result<InstallContext> {
    let (kubeconfig, context) = connection_for(cluster)?;
    let engine = match cluster.provider {
        Provider::Docker => Some(ContainerEngine::connect()?),
        Provider::Hetzner => None,
    };
    Ok(InstallContext {
        kubectl: Kubectl::new(kubeconfig.clone(), context.clone()),
        helm: Helm::new(kubeconfig, context),
        engine,
        cluster_name: cluster_name.to_string(),
        distribution: cluster.distribution,
    })
}

/// Vanilla mirrors directory, defaulting under the home directory.
pub fn mirrors_dir_for(cluster: &ClusterSpec) -> PathBuf {
    match &cluster.vanilla.mirrors_dir {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".ksail")
            .join("mirrors"),
    }
}

/// Identity of a cluster being deleted, resolved without assuming a spec
/// file exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterIdentity {
    pub name: String,
    pub distribution: Distribution,
    pub provider: Provider,
}

/// Resolve the delete target with the fixed priority: `--name` > spec >
/// current kubeconfig context (whose prefix also decides the
/// distribution).
pub fn resolve_cluster_identity(
    explicit_name: Option<&str>,
    cluster: &ClusterSpec,
    spec_was_loaded: bool,
) -> ClusterIdentity {
    if let Some(name) = explicit_name.filter(|n| !n.is_empty()) {
        return ClusterIdentity {
            name: name.to_string(),
            distribution: cluster.distribution,
            provider: cluster.provider,
        };
    }
    if spec_was_loaded {
        if let Some(name) = cluster.name.as_deref().filter(|n| !n.is_empty()) {
            return ClusterIdentity {
                name: name.to_string(),
                distribution: cluster.distribution,
                provider: cluster.provider,
            };
        }
    }
    if let Some(context) = current_kube_context(cluster) {
        if let Some((distribution, name)) = spec::distribution_from_context(&context) {
            return ClusterIdentity {
                name,
                distribution,
                provider: cluster.provider,
            };
        }
    }
    ClusterIdentity {
        name: effective_cluster_name(cluster),
        distribution: cluster.distribution,
        provider: cluster.provider,
    }
}
