// Typed cluster specification: the `ksail.yaml` document shape plus the
// name/network resolution rules shared by every command.

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::toggles::{
    CertManagerToggle, CniToggle, CsiToggle, Distribution, GitOpsEngineToggle, LoadBalancerToggle,
    MetricsServerToggle, PolicyEngineToggle, Provider,
};

/// Fallback cluster name when neither the spec, the distribution config nor
/// the kubeconfig yields one.
pub const DEFAULT_CLUSTER_NAME: &str = "ksail";

lazy_static! {
    // RFC 1123 DNS label.
    static ref DNS_LABEL: Regex = Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$").unwrap();
}

#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    #[error("invalid value '{value}' for {field} (valid: {})", .valid.join(", "))]
    InvalidEnumValue {
        field: &'static str,
        value: String,
        valid: &'static [&'static str],
    },
    #[error("provider {provider} does not support distribution {distribution}")]
    IncompatibleProvider {
        provider: Provider,
        distribution: Distribution,
    },
    #[error("cluster name '{0}' is not a valid DNS label")]
    InvalidName(String),
    #[error("no ksail.yaml found in '{0}'")]
    ConfigNotFound(String),
    #[error("failed to parse cluster spec: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid mirror registry spec '{0}' (expected host[=upstream])")]
    InvalidMirrorSpec(String),
}

/// Outer document: metadata header plus the cluster spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDocument {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub spec: DocumentSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentSpec {
    #[serde(default)]
    pub cluster: ClusterSpec,
}

/// The desired cluster. All component toggles default to `Default`, so an
/// empty `spec.cluster` is a valid Vanilla-on-Docker cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterSpec {
    pub distribution: Distribution,
    pub provider: Provider,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub connection: Connection,
    pub cni: CniToggle,
    pub csi: CsiToggle,
    pub metrics_server: MetricsServerToggle,
    pub load_balancer: LoadBalancerToggle,
    pub cert_manager: CertManagerToggle,
    pub policy_engine: PolicyEngineToggle,
    pub git_ops_engine: GitOpsEngineToggle,
    pub local_registry: LocalRegistrySpec,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mirror_registries: Vec<MirrorSpec>,
    pub vanilla: VanillaSpec,
    pub k3s: K3sSpec,
    pub talos: TalosSpec,
    pub hetzner: HetznerSpec,
}

impl ClusterSpec {
    /// Validate everything that must hold before any side effect.
    pub fn validate(&self) -> Result<(), SpecError> {
        self.provider.validate_for_distribution(self.distribution)?;
        if let Some(name) = &self.name {
            validate_name(name)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Connection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<String>,
}

/// Local pull-through content cache registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocalRegistrySpec {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Default for LocalRegistrySpec {
    fn default() -> Self {
        Self {
            enabled: true,
            host_port: None,
            endpoint: None,
            username: None,
            password: None,
        }
    }
}

/// One upstream pull mirror, keyed by `host`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorSpec {
    pub host: String,
    pub upstream: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl MirrorSpec {
    /// Parse a `host[=upstream]` CLI flag value. A bare host gets the
    /// conventional upstream for that host; an explicit upstream must be a
    /// valid URL.
    pub fn parse_flag(value: &str) -> Result<Self, SpecError> {
        let (host, upstream) = match value.split_once('=') {
            Some((host, upstream)) => {
                let upstream = upstream.trim();
                if upstream.is_empty() || url::Url::parse(upstream).is_err() {
                    return Err(SpecError::InvalidMirrorSpec(value.to_string()));
                }
                (host.trim(), upstream.to_string())
            }
            None => {
                let host = value.trim();
                (host, default_upstream(host))
            }
        };
        if host.is_empty() {
            return Err(SpecError::InvalidMirrorSpec(value.to_string()));
        }
        Ok(MirrorSpec {
            host: host.to_string(),
            upstream,
            username: None,
            password: None,
        })
    }
}

impl fmt::Display for MirrorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.host, self.upstream)
    }
}

/// Conventional upstream URL for well-known registry hosts.
pub fn default_upstream(host: &str) -> String {
    match host {
        "docker.io" => "https://registry-1.docker.io".to_string(),
        other => format!("https://{other}"),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VanillaSpec {
    /// Directory holding per-host containerd `hosts.toml` mirror configs,
    /// mounted into every node. Baked into the cluster at creation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirrors_dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct K3sSpec {
    pub servers: u32,
    pub agents: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_server_args: Vec<String>,
}

impl Default for K3sSpec {
    fn default() -> Self {
        Self {
            servers: 1,
            agents: 0,
            extra_server_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TalosSpec {
    pub control_planes: u32,
    pub workers: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iso: Option<String>,
}

impl Default for TalosSpec {
    fn default() -> Self {
        Self {
            control_planes: 1,
            workers: 0,
            iso: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HetznerSpec {
    pub control_plane_server_type: String,
    pub worker_server_type: String,
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_name: Option<String>,
    pub network_cidr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh_key_name: Option<String>,
    pub control_planes: u32,
    pub workers: u32,
}

impl Default for HetznerSpec {
    fn default() -> Self {
        Self {
            control_plane_server_type: "cx22".to_string(),
            worker_server_type: "cx22".to_string(),
            location: "fsn1".to_string(),
            network_name: None,
            network_cidr: "10.0.0.0/16".to_string(),
            ssh_key_name: None,
            control_planes: 1,
            workers: 0,
        }
    }
}

/// Validate a cluster name against the DNS-label rule.
pub fn validate_name(name: &str) -> Result<(), SpecError> {
    if DNS_LABEL.is_match(name) {
        Ok(())
    } else {
        Err(SpecError::InvalidName(name.to_string()))
    }
}

/// Resolve the effective cluster name with the fixed priority:
/// explicit spec name, then distribution-config name, then the name embedded
/// in the current kubeconfig context, then the literal `"ksail"`.
pub fn resolve_cluster_name(
    spec_name: Option<&str>,
    dist_config_name: Option<&str>,
    kube_context: Option<&str>,
) -> String {
    if let Some(name) = spec_name.filter(|n| !n.is_empty()) {
        return name.to_string();
    }
    if let Some(name) = dist_config_name.filter(|n| !n.is_empty()) {
        return name.to_string();
    }
    if let Some(context) = kube_context.filter(|c| !c.is_empty()) {
        if let Some((_, name)) = distribution_from_context(context) {
            return name;
        }
        return context.to_string();
    }
    DEFAULT_CLUSTER_NAME.to_string()
}

/// Container network a cluster of the given distribution lives on.
pub fn resolve_network_name(distribution: Distribution, cluster_name: &str) -> String {
    match distribution {
        Distribution::Vanilla => "kind".to_string(),
        Distribution::K3s => format!("k3d-{cluster_name}"),
        Distribution::Talos => cluster_name.to_string(),
    }
}

/// Kubeconfig context name written by the distribution tooling.
pub fn context_name(distribution: Distribution, cluster_name: &str) -> String {
    match distribution {
        Distribution::Vanilla => format!("kind-{cluster_name}"),
        Distribution::K3s => format!("k3d-{cluster_name}"),
        Distribution::Talos => format!("admin@{cluster_name}"),
    }
}

/// Identify distribution and cluster name from a kubeconfig context.
pub fn distribution_from_context(context: &str) -> Option<(Distribution, String)> {
    if let Some(name) = context.strip_prefix("kind-") {
        return Some((Distribution::Vanilla, name.to_string()));
    }
    if let Some(name) = context.strip_prefix("k3d-") {
        return Some((Distribution::K3s, name.to_string()));
    }
    if let Some(name) = context.strip_prefix("admin@") {
        return Some((Distribution::Talos, name.to_string()));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("dev").is_ok());
        assert!(validate_name("my-cluster-01").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("-leading").is_err());
        assert!(validate_name("trailing-").is_err());
        assert!(validate_name("UpperCase").is_err());
        assert!(validate_name("dot.name").is_err());
    }

    #[test]
    fn test_resolve_cluster_name_priority() {
        assert_eq!(
            resolve_cluster_name(Some("explicit"), Some("dist"), Some("kind-ctx")),
            "explicit"
        );
        assert_eq!(
            resolve_cluster_name(None, Some("dist"), Some("kind-ctx")),
            "dist"
        );
        assert_eq!(resolve_cluster_name(None, None, Some("kind-ctx")), "ctx");
        assert_eq!(resolve_cluster_name(None, None, Some("admin@talos1")), "talos1");
        assert_eq!(resolve_cluster_name(None, None, Some("minikube")), "minikube");
        assert_eq!(resolve_cluster_name(None, None, None), "ksail");
        assert_eq!(resolve_cluster_name(Some(""), None, None), "ksail");
    }

    #[test]
    fn test_resolve_network_name() {
        assert_eq!(resolve_network_name(Distribution::Vanilla, "dev"), "kind");
        assert_eq!(resolve_network_name(Distribution::K3s, "dev"), "k3d-dev");
        assert_eq!(resolve_network_name(Distribution::Talos, "dev"), "dev");
    }

    #[test]
    fn test_context_name_round_trip() {
        for d in [Distribution::Vanilla, Distribution::K3s, Distribution::Talos] {
            let context = context_name(d, "dev");
            assert_eq!(distribution_from_context(&context), Some((d, "dev".to_string())));
        }
        assert_eq!(distribution_from_context("minikube"), None);
    }

    #[test]
    fn test_mirror_spec_parse_flag() {
        let spec = MirrorSpec::parse_flag("docker.io=https://registry-1.docker.io").unwrap();
        assert_eq!(spec.host, "docker.io");
        assert_eq!(spec.upstream, "https://registry-1.docker.io");

        let bare = MirrorSpec::parse_flag("docker.io").unwrap();
        assert_eq!(bare.upstream, "https://registry-1.docker.io");

        let ghcr = MirrorSpec::parse_flag("ghcr.io").unwrap();
        assert_eq!(ghcr.upstream, "https://ghcr.io");

        assert!(MirrorSpec::parse_flag("").is_err());
        assert!(MirrorSpec::parse_flag("host=").is_err());
        assert!(MirrorSpec::parse_flag("host=not a url").is_err());
    }

    #[test]
    fn test_spec_validation_rejects_incompatible_pair() {
        let spec = ClusterSpec {
            distribution: Distribution::Vanilla,
            provider: Provider::Hetzner,
            ..Default::default()
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_document_round_trip() {
        let yaml = r#"
apiVersion: ksail.io/v1alpha1
kind: Cluster
metadata:
  name: dev
spec:
  cluster:
    distribution: K3s
    name: dev
    metricsServer: Disabled
    k3s:
      extraServerArgs: ["--disable=traefik"]
    mirrorRegistries:
      - host: docker.io
        upstream: https://registry-1.docker.io
"#;
        let doc: ClusterDocument = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(doc.spec.cluster.distribution, Distribution::K3s);
        assert_eq!(doc.spec.cluster.metrics_server, MetricsServerToggle::Disabled);
        assert_eq!(doc.spec.cluster.k3s.servers, 1);
        assert_eq!(doc.spec.cluster.mirror_registries.len(), 1);

        let out = serde_yaml::to_string(&doc).unwrap();
        let back: ClusterDocument = serde_yaml::from_str(&out).unwrap();
        assert_eq!(back, doc);
    }
}
