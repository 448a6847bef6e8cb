// Mirror-registry fan-out: one pull-through proxy container per upstream,
// rewired into the cluster's registry configuration per distribution.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{LocalRegistry, MirrorRegistry, REGISTRY_CONTAINER_PORT, REGISTRY_IMAGE};
use crate::engine::{ContainerEngine, ContainerRunSpec, ContainerStatus};
use crate::spec::MirrorSpec;
use crate::ui::StageInfo;

pub const MIRROR_SETUP_STAGE: StageInfo = StageInfo {
    title: "Setting up mirror registries",
    emoji: "🪞",
    activity: "creating mirror containers",
    success: "Mirror registries ready",
    failure_prefix: "failed to set up mirror registries",
};

/// Pre-flight reachability check budget.
const VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Bounded fan-out for mirror teardown.
const CLEANUP_PARALLELISM: usize = 4;

/// In-cluster endpoint of a mirror container.
fn mirror_endpoint(container_name: &str) -> String {
    format!("http://{container_name}:{REGISTRY_CONTAINER_PORT}")
}

/// Create (or reuse) one proxy container per mirror spec. Specs arrive
/// host-ascending from the merge, so container creation order is stable.
pub async fn create_mirrors(
    engine: &ContainerEngine,
    specs: &[MirrorSpec],
) -> Result<Vec<MirrorRegistry>> {
    let mut mirrors = Vec::with_capacity(specs.len());
    for spec in specs {
        let mirror = MirrorRegistry::from_spec(spec);
        match engine.container_status(&mirror.container_name).await? {
            ContainerStatus::Running => {
                debug!(container = %mirror.container_name, "mirror already running");
            }
            ContainerStatus::Stopped => {
                engine.start_container(&mirror.container_name).await?;
            }
            ContainerStatus::Missing => {
                let mut env = vec![format!("REGISTRY_PROXY_REMOTEURL={}", spec.upstream)];
                if let Some(username) = &spec.username {
                    env.push(format!("REGISTRY_PROXY_USERNAME={username}"));
                }
                if let Some(password) = &spec.password {
                    env.push(format!("REGISTRY_PROXY_PASSWORD={password}"));
                }
                let mut labels = HashMap::new();
                labels.insert("io.ksail.registry".to_string(), "mirror".to_string());
                labels.insert("io.ksail.mirror.host".to_string(), spec.host.clone());

                engine.ensure_volume(&mirror.container_name).await?;
                let run = ContainerRunSpec {
                    name: mirror.container_name.clone(),
                    image: REGISTRY_IMAGE.to_string(),
                    env,
                    port_binding: None,
                    volumes: vec![(
                        mirror.container_name.clone(),
                        "/var/lib/registry".to_string(),
                    )],
                    labels,
                };
                engine.create_container(&run).await?;
                engine.start_container(&mirror.container_name).await?;
                info!(host = %spec.host, container = %mirror.container_name, "mirror registry created");
            }
        }
        mirrors.push(mirror);
    }
    Ok(mirrors)
}

/// Write per-host containerd `hosts.toml` files under the Vanilla mirrors
/// directory.
pub fn write_hosts_toml(mirrors_dir: &Path, mirrors: &[MirrorRegistry]) -> Result<()> {
    for mirror in mirrors {
        let host_dir = mirrors_dir.join(&mirror.spec.host);
        std::fs::create_dir_all(&host_dir)
            .with_context(|| format!("failed to create mirrors dir '{}'", host_dir.display()))?;

        let mut host_entry = toml::Table::new();
        host_entry.insert(
            "capabilities".to_string(),
            toml::Value::Array(vec!["pull".into(), "resolve".into()]),
        );
        host_entry.insert("skip_verify".to_string(), toml::Value::Boolean(true));

        let mut hosts = toml::Table::new();
        hosts.insert(
            mirror_endpoint(&mirror.container_name),
            toml::Value::Table(host_entry),
        );

        let mut root = toml::Table::new();
        root.insert(
            "server".to_string(),
            toml::Value::String(mirror.spec.upstream.clone()),
        );
        root.insert("host".to_string(), toml::Value::Table(hosts));

        let content = toml::to_string_pretty(&root)
            .with_context(|| format!("failed to serialize hosts.toml for '{}'", mirror.spec.host))?;
        let path = host_dir.join("hosts.toml");
        std::fs::write(&path, content)
            .with_context(|| format!("failed to write '{}'", path.display()))?;
        debug!(host = %mirror.spec.host, path = %path.display(), "wrote hosts.toml");
    }
    Ok(())
}

#[derive(Serialize)]
struct RegistriesConfig {
    mirrors: BTreeMap<String, MirrorEndpoints>,
}

#[derive(Serialize)]
struct MirrorEndpoints {
    endpoint: Vec<String>,
}

/// K3s `registries.yaml` content pointing every mirrored host (and the
/// local cache, when present) at its proxy container.
pub fn registries_yaml(
    mirrors: &[MirrorRegistry],
    local: Option<&LocalRegistry>,
) -> Result<String> {
    let mut config = RegistriesConfig {
        mirrors: BTreeMap::new(),
    };
    for mirror in mirrors {
        config.mirrors.insert(
            mirror.spec.host.clone(),
            MirrorEndpoints {
                endpoint: vec![mirror_endpoint(&mirror.container_name)],
            },
        );
    }
    if let Some(local) = local {
        config.mirrors.insert(
            local.host.clone(),
            MirrorEndpoints {
                endpoint: vec![mirror_endpoint(&local.name)],
            },
        );
    }
    serde_yaml::to_string(&config).context("failed to serialize registries.yaml")
}

/// `talosctl cluster create` flags configuring the mirrors.
pub fn talos_mirror_args(mirrors: &[MirrorRegistry]) -> Vec<String> {
    let mut args = Vec::new();
    for mirror in mirrors {
        args.push("--registry-mirror".to_string());
        args.push(format!(
            "{}={}",
            mirror.spec.host,
            mirror_endpoint(&mirror.container_name)
        ));
    }
    args
}

/// Attach mirror containers to the cluster network. Failures are demoted to
/// warnings; a mirror that cannot attach just stays unused.
pub async fn attach_mirrors(
    engine: &ContainerEngine,
    mirrors: &[MirrorRegistry],
    network: &str,
) -> Result<()> {
    for mirror in mirrors {
        if let Err(err) = engine.connect_network(network, &mirror.container_name).await {
            warn!(
                container = %mirror.container_name,
                "failed to attach mirror to network '{network}': {err:#}"
            );
        }
    }
    Ok(())
}

/// Verify each attached mirror answers the registry ping endpoint from the
/// host, within a 10-second budget. Failures are warnings.
pub async fn verify_mirrors_reachable(
    engine: &ContainerEngine,
    mirrors: &[MirrorRegistry],
    network: &str,
) -> Result<()> {
    if mirrors.is_empty() {
        return Ok(());
    }
    let addresses = engine.container_addresses_on_network(network).await?;
    let client = reqwest::Client::builder()
        .timeout(VERIFY_TIMEOUT)
        .build()
        .context("failed to build HTTP client")?;
    for mirror in mirrors {
        let Some(ip) = addresses.get(&mirror.container_name) else {
            warn!(container = %mirror.container_name, "mirror not attached to '{network}'");
            continue;
        };
        let url = format!("http://{ip}:{REGISTRY_CONTAINER_PORT}/v2/");
        match client.get(&url).send().await {
            Ok(response) if response.status().is_success() || response.status().as_u16() == 401 => {
                debug!(container = %mirror.container_name, "mirror reachable");
            }
            Ok(response) => {
                warn!(
                    container = %mirror.container_name,
                    status = %response.status(),
                    "mirror answered unexpectedly"
                );
            }
            Err(err) => {
                warn!(container = %mirror.container_name, "mirror not reachable: {err}");
            }
        }
    }
    Ok(())
}

/// Detach mirrors from a network, before Talos teardown destroys it.
pub async fn disconnect_mirrors(
    engine: &ContainerEngine,
    network: &str,
    names: &[String],
) -> Result<()> {
    for name in names {
        if let Err(err) = engine.disconnect_network(network, name).await {
            warn!("failed to disconnect '{name}' from '{network}': {err:#}");
        }
    }
    Ok(())
}

/// Stop and remove mirror containers with bounded fan-out; volumes only
/// when requested. Individual failures are warnings.
pub async fn cleanup_mirrors(
    engine: &ContainerEngine,
    names: &[String],
    delete_volumes: bool,
) -> Result<()> {
    stream::iter(names.iter().cloned())
        .map(|name| {
            let engine = engine.clone();
            async move {
                if let Err(err) = engine.stop_container(&name).await {
                    warn!("failed to stop registry '{name}': {err:#}");
                }
                if let Err(err) = engine.remove_container(&name, true).await {
                    warn!("failed to remove registry '{name}': {err:#}");
                }
                if delete_volumes {
                    if let Err(err) = engine.remove_volume(&name).await {
                        warn!("failed to remove registry volume '{name}': {err:#}");
                    }
                }
            }
        })
        .buffer_unordered(CLEANUP_PARALLELISM)
        .collect::<Vec<_>>()
        .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mirror(host: &str, upstream: &str) -> MirrorRegistry {
        MirrorRegistry::from_spec(&MirrorSpec {
            host: host.to_string(),
            upstream: upstream.to_string(),
            username: None,
            password: None,
        })
    }

    #[test]
    fn test_hosts_toml_content() {
        let dir = tempfile::tempdir().unwrap();
        let mirrors = vec![mirror("docker.io", "https://registry-1.docker.io")];
        write_hosts_toml(dir.path(), &mirrors).unwrap();

        let content =
            std::fs::read_to_string(dir.path().join("docker.io").join("hosts.toml")).unwrap();
        assert!(content.contains("server = \"https://registry-1.docker.io\""));
        assert!(content.contains("http://ksail-mirror-docker-io:5000"));
        assert!(content.contains("skip_verify = true"));
        assert!(content.contains("\"pull\""));
    }

    #[test]
    fn test_registries_yaml_includes_local_and_mirrors() {
        let mirrors = vec![mirror("docker.io", "https://registry-1.docker.io")];
        let local = LocalRegistry {
            name: "ksail-registry-dev".to_string(),
            host: "localhost:5999".to_string(),
            port: 5999,
            cluster_name: "dev".to_string(),
            volume_name: "ksail-registry".to_string(),
        };
        let yaml = registries_yaml(&mirrors, Some(&local)).unwrap();
        assert!(yaml.contains("docker.io"));
        assert!(yaml.contains("http://ksail-mirror-docker-io:5000"));
        assert!(yaml.contains("localhost:5999"));
        assert!(yaml.contains("http://ksail-registry-dev:5000"));
    }

    #[test]
    fn test_talos_mirror_args() {
        let mirrors = vec![
            mirror("docker.io", "https://registry-1.docker.io"),
            mirror("ghcr.io", "https://ghcr.io"),
        ];
        let args = talos_mirror_args(&mirrors);
        assert_eq!(
            args,
            vec![
                "--registry-mirror",
                "docker.io=http://ksail-mirror-docker-io:5000",
                "--registry-mirror",
                "ghcr.io=http://ksail-mirror-ghcr-io:5000",
            ]
        );
    }
}
