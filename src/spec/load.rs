// Spec document loading and flag merging.
//
// Configuration precedence (highest to lowest):
// 1. CLI flags
// 2. Loaded ksail.yaml fields
// 3. Built-in defaults

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, warn};

use super::cluster::{
    ClusterDocument, ClusterSpec, DocumentSpec, Metadata, MirrorSpec, SpecError,
};
use super::toggles::{
    CertManagerToggle, CniToggle, CsiToggle, Distribution, GitOpsEngineToggle, LoadBalancerToggle,
    MetricsServerToggle, PolicyEngineToggle, Provider,
};

/// File names probed when no explicit config path is given.
const CONFIG_FILE_NAMES: &[&str] = &["ksail.yaml", "ksail.yml"];

lazy_static! {
    static ref ENV_PLACEHOLDER: Regex = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
}

/// CLI-level overrides applied on top of the loaded document.
#[derive(Debug, Clone, Default)]
pub struct SpecOverrides {
    pub name: Option<String>,
    pub distribution: Option<Distribution>,
    pub provider: Option<Provider>,
    pub kubeconfig: Option<String>,
    pub cni: Option<CniToggle>,
    pub csi: Option<CsiToggle>,
    pub metrics_server: Option<MetricsServerToggle>,
    pub load_balancer: Option<LoadBalancerToggle>,
    pub cert_manager: Option<CertManagerToggle>,
    pub policy_engine: Option<PolicyEngineToggle>,
    pub git_ops_engine: Option<GitOpsEngineToggle>,
    pub mirror_registries: Vec<MirrorSpec>,
}

/// Locate the spec document: an explicit path wins, else probe the working
/// directory for `ksail.yaml` / `ksail.yml`.
pub fn find_config_file(explicit: Option<&Path>, cwd: &Path) -> Result<PathBuf, SpecError> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(SpecError::ConfigNotFound(path.display().to_string()));
    }
    for name in CONFIG_FILE_NAMES {
        let candidate = cwd.join(name);
        if candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(SpecError::ConfigNotFound(cwd.display().to_string()))
}

/// Load and parse a spec document, expanding `${VAR}` credential
/// placeholders from the environment.
pub fn load_document(path: &Path) -> Result<ClusterDocument> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read spec document '{}'", path.display()))?;
    let mut document: ClusterDocument =
        serde_yaml::from_str(&raw).map_err(SpecError::Parse)?;
    expand_credentials(&mut document.spec.cluster);
    debug!(
        path = %path.display(),
        distribution = %document.spec.cluster.distribution,
        provider = %document.spec.cluster.provider,
        "loaded cluster spec"
    );
    Ok(document)
}

/// A default document for `ksail cluster init`.
pub fn default_document(name: &str, distribution: Distribution, provider: Provider) -> ClusterDocument {
    ClusterDocument {
        api_version: "ksail.io/v1alpha1".to_string(),
        kind: "Cluster".to_string(),
        metadata: Metadata {
            name: Some(name.to_string()),
        },
        spec: DocumentSpec {
            cluster: ClusterSpec {
                distribution,
                provider,
                name: Some(name.to_string()),
                ..Default::default()
            },
        },
    }
}

/// Expand `${VAR}` placeholders in a credential string. Unset variables
/// expand to the empty string with a warning, matching shell semantics.
pub fn expand_env_placeholders(value: &str) -> String {
    ENV_PLACEHOLDER
        .replace_all(value, |caps: &regex::Captures<'_>| {
            let var = &caps[1];
            match std::env::var(var) {
                Ok(v) => v,
                Err(_) => {
                    warn!("environment variable '{var}' referenced in spec is not set");
                    String::new()
                }
            }
        })
        .into_owned()
}

fn expand_credentials(cluster: &mut ClusterSpec) {
    if let Some(username) = cluster.local_registry.username.take() {
        cluster.local_registry.username = Some(expand_env_placeholders(&username));
    }
    if let Some(password) = cluster.local_registry.password.take() {
        cluster.local_registry.password = Some(expand_env_placeholders(&password));
    }
    for mirror in &mut cluster.mirror_registries {
        if let Some(username) = mirror.username.take() {
            mirror.username = Some(expand_env_placeholders(&username));
        }
        if let Some(password) = mirror.password.take() {
            mirror.password = Some(expand_env_placeholders(&password));
        }
    }
}

/// Apply CLI overrides onto a loaded spec, then validate the result.
pub fn apply_overrides(spec: &mut ClusterSpec, overrides: &SpecOverrides) -> Result<(), SpecError> {
    if let Some(name) = &overrides.name {
        spec.name = Some(name.clone());
    }
    if let Some(distribution) = overrides.distribution {
        spec.distribution = distribution;
    }
    if let Some(provider) = overrides.provider {
        spec.provider = provider;
    }
    if let Some(kubeconfig) = &overrides.kubeconfig {
        spec.connection.kubeconfig = Some(kubeconfig.clone());
    }
    if let Some(v) = overrides.cni {
        spec.cni = v;
    }
    if let Some(v) = overrides.csi {
        spec.csi = v;
    }
    if let Some(v) = overrides.metrics_server {
        spec.metrics_server = v;
    }
    if let Some(v) = overrides.load_balancer {
        spec.load_balancer = v;
    }
    if let Some(v) = overrides.cert_manager {
        spec.cert_manager = v;
    }
    if let Some(v) = overrides.policy_engine {
        spec.policy_engine = v;
    }
    if let Some(v) = overrides.git_ops_engine {
        spec.git_ops_engine = v;
    }
    if !overrides.mirror_registries.is_empty() {
        spec.mirror_registries =
            merge_mirrors(&spec.mirror_registries, &overrides.mirror_registries);
    }
    spec.validate()
}

/// Merge mirror specs keyed by host; flag entries override file entries for
/// the same host. The result is host-ascending so downstream output (naming
/// containers, writing hosts.toml) is deterministic.
pub fn merge_mirrors(file: &[MirrorSpec], flags: &[MirrorSpec]) -> Vec<MirrorSpec> {
    let mut merged: BTreeMap<String, MirrorSpec> = BTreeMap::new();
    for spec in file.iter().chain(flags.iter()) {
        merged.insert(spec.host.clone(), spec.clone());
    }
    merged.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn mirror(host: &str, upstream: &str) -> MirrorSpec {
        MirrorSpec {
            host: host.to_string(),
            upstream: upstream.to_string(),
            username: None,
            password: None,
        }
    }

    #[test]
    fn test_merge_mirrors_flag_wins_and_orders_by_host() {
        let file = vec![
            mirror("quay.io", "https://quay.io"),
            mirror("docker.io", "https://file-upstream"),
        ];
        let flags = vec![mirror("docker.io", "https://registry-1.docker.io")];
        let merged = merge_mirrors(&file, &flags);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].host, "docker.io");
        assert_eq!(merged[0].upstream, "https://registry-1.docker.io");
        assert_eq!(merged[1].host, "quay.io");
    }

    #[test]
    fn test_expand_env_placeholders() {
        std::env::set_var("KSAIL_TEST_USER", "alice");
        assert_eq!(expand_env_placeholders("${KSAIL_TEST_USER}"), "alice");
        assert_eq!(
            expand_env_placeholders("pre-${KSAIL_TEST_USER}-post"),
            "pre-alice-post"
        );
        assert_eq!(expand_env_placeholders("${KSAIL_TEST_UNSET_VAR}"), "");
        assert_eq!(expand_env_placeholders("plain"), "plain");
    }

    #[test]
    fn test_find_config_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_config_file(None, dir.path()).is_err());

        let path = dir.path().join("ksail.yaml");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"apiVersion: ksail.io/v1alpha1\nkind: Cluster\nspec: {}\n")
            .unwrap();
        assert_eq!(find_config_file(None, dir.path()).unwrap(), path);

        let missing = dir.path().join("other.yaml");
        assert!(find_config_file(Some(&missing), dir.path()).is_err());
    }

    #[test]
    fn test_load_document_expands_mirror_credentials() {
        std::env::set_var("KSAIL_TEST_MIRROR_PASS", "s3cret");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ksail.yaml");
        std::fs::write(
            &path,
            r#"
apiVersion: ksail.io/v1alpha1
kind: Cluster
spec:
  cluster:
    mirrorRegistries:
      - host: docker.io
        upstream: https://registry-1.docker.io
        username: bob
        password: ${KSAIL_TEST_MIRROR_PASS}
"#,
        )
        .unwrap();
        let doc = load_document(&path).unwrap();
        let mirror = &doc.spec.cluster.mirror_registries[0];
        assert_eq!(mirror.username.as_deref(), Some("bob"));
        assert_eq!(mirror.password.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_apply_overrides_precedence_and_validation() {
        let mut spec = ClusterSpec::default();
        let overrides = SpecOverrides {
            name: Some("dev".to_string()),
            distribution: Some(Distribution::K3s),
            metrics_server: Some(MetricsServerToggle::Disabled),
            mirror_registries: vec![mirror("docker.io", "https://registry-1.docker.io")],
            ..Default::default()
        };
        apply_overrides(&mut spec, &overrides).unwrap();
        assert_eq!(spec.name.as_deref(), Some("dev"));
        assert_eq!(spec.distribution, Distribution::K3s);
        assert_eq!(spec.metrics_server, MetricsServerToggle::Disabled);
        assert_eq!(spec.mirror_registries.len(), 1);

        // Incompatible pair is rejected before any side effect.
        let mut spec = ClusterSpec::default();
        let overrides = SpecOverrides {
            provider: Some(Provider::Hetzner),
            ..Default::default()
        };
        assert!(apply_overrides(&mut spec, &overrides).is_err());
    }

    #[test]
    fn test_default_document_round_trips() {
        let doc = default_document("dev", Distribution::Vanilla, Provider::Docker);
        let yaml = serde_yaml::to_string(&doc).unwrap();
        let back: ClusterDocument = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.spec.cluster.name.as_deref(), Some("dev"));
        assert_eq!(back.api_version, "ksail.io/v1alpha1");
    }
}
