// Enumerations for the cluster spec: distributions, providers, and the
// per-component toggles. Each parses case-insensitively so the same values
// work from the YAML document and from CLI flags.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::cluster::SpecError;

/// Kubernetes flavor KSail can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Distribution {
    #[default]
    Vanilla,
    K3s,
    Talos,
}

impl Distribution {
    pub fn valid_values() -> &'static [&'static str] {
        &["Vanilla", "K3s", "Talos"]
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Distribution::Vanilla => "Vanilla",
            Distribution::K3s => "K3s",
            Distribution::Talos => "Talos",
        };
        f.write_str(s)
    }
}

impl FromStr for Distribution {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vanilla" | "kind" => Ok(Distribution::Vanilla),
            "k3s" | "k3d" => Ok(Distribution::K3s),
            "talos" => Ok(Distribution::Talos),
            _ => Err(SpecError::InvalidEnumValue {
                field: "distribution",
                value: s.to_string(),
                valid: Distribution::valid_values(),
            }),
        }
    }
}

/// Infrastructure substrate the cluster runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Provider {
    #[default]
    Docker,
    Hetzner,
}

impl Provider {
    pub fn valid_values() -> &'static [&'static str] {
        &["Docker", "Hetzner"]
    }

    /// Enforce the (distribution, provider) compatibility matrix before any
    /// side effect. Docker runs every distribution; Hetzner only Talos.
    pub fn validate_for_distribution(&self, distribution: Distribution) -> Result<(), SpecError> {
        let compatible = match self {
            Provider::Docker => true,
            Provider::Hetzner => distribution == Distribution::Talos,
        };
        if compatible {
            Ok(())
        } else {
            Err(SpecError::IncompatibleProvider {
                provider: *self,
                distribution,
            })
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Provider::Docker => "Docker",
            Provider::Hetzner => "Hetzner",
        };
        f.write_str(s)
    }
}

impl FromStr for Provider {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "docker" | "podman" => Ok(Provider::Docker),
            "hetzner" | "hcloud" => Ok(Provider::Hetzner),
            _ => Err(SpecError::InvalidEnumValue {
                field: "provider",
                value: s.to_string(),
                valid: Provider::valid_values(),
            }),
        }
    }
}

/// CNI selection. `Default` keeps the distribution's bundled CNI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CniToggle {
    #[default]
    Default,
    Cilium,
    None,
}

impl CniToggle {
    pub fn valid_values() -> &'static [&'static str] {
        &["Default", "Cilium", "None"]
    }

    /// Whether the post-create pipeline must install a CNI itself.
    pub fn needs_install(&self) -> bool {
        matches!(self, CniToggle::Cilium)
    }
}

impl fmt::Display for CniToggle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CniToggle::Default => "Default",
            CniToggle::Cilium => "Cilium",
            CniToggle::None => "None",
        };
        f.write_str(s)
    }
}

impl FromStr for CniToggle {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(CniToggle::Default),
            "cilium" => Ok(CniToggle::Cilium),
            "none" => Ok(CniToggle::None),
            _ => Err(SpecError::InvalidEnumValue {
                field: "cni",
                value: s.to_string(),
                valid: CniToggle::valid_values(),
            }),
        }
    }
}

/// CSI selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CsiToggle {
    #[default]
    Default,
    Enabled,
    LocalPathProvisioner,
    Disabled,
    None,
}

impl CsiToggle {
    pub fn valid_values() -> &'static [&'static str] {
        &["Default", "Enabled", "LocalPathProvisioner", "Disabled", "None"]
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, CsiToggle::Disabled | CsiToggle::None)
    }

    /// `Enabled` installs the default CSI (local-path-provisioner).
    pub fn needs_install(&self) -> bool {
        matches!(self, CsiToggle::Enabled | CsiToggle::LocalPathProvisioner)
    }
}

impl fmt::Display for CsiToggle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CsiToggle::Default => "Default",
            CsiToggle::Enabled => "Enabled",
            CsiToggle::LocalPathProvisioner => "LocalPathProvisioner",
            CsiToggle::Disabled => "Disabled",
            CsiToggle::None => "None",
        };
        f.write_str(s)
    }
}

impl FromStr for CsiToggle {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(CsiToggle::Default),
            "enabled" | "true" => Ok(CsiToggle::Enabled),
            "localpathprovisioner" | "local-path-provisioner" => Ok(CsiToggle::LocalPathProvisioner),
            "disabled" | "false" => Ok(CsiToggle::Disabled),
            "none" => Ok(CsiToggle::None),
            _ => Err(SpecError::InvalidEnumValue {
                field: "csi",
                value: s.to_string(),
                valid: CsiToggle::valid_values(),
            }),
        }
    }
}

/// Metrics-server selection. K3s bundles one; `Disabled` there is applied as
/// a server argument at create time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MetricsServerToggle {
    #[default]
    Default,
    Enabled,
    Disabled,
}

impl MetricsServerToggle {
    pub fn valid_values() -> &'static [&'static str] {
        &["Default", "Enabled", "Disabled"]
    }

    /// Whether KSail must install metrics-server itself. K3s ships its own,
    /// so `Default` means install only on the other distributions.
    pub fn needs_install(&self, distribution: Distribution) -> bool {
        match self {
            MetricsServerToggle::Enabled => distribution != Distribution::K3s,
            MetricsServerToggle::Default => distribution == Distribution::Vanilla,
            MetricsServerToggle::Disabled => false,
        }
    }
}

impl fmt::Display for MetricsServerToggle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MetricsServerToggle::Default => "Default",
            MetricsServerToggle::Enabled => "Enabled",
            MetricsServerToggle::Disabled => "Disabled",
        };
        f.write_str(s)
    }
}

impl FromStr for MetricsServerToggle {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(MetricsServerToggle::Default),
            "enabled" | "true" => Ok(MetricsServerToggle::Enabled),
            "disabled" | "false" => Ok(MetricsServerToggle::Disabled),
            _ => Err(SpecError::InvalidEnumValue {
                field: "metricsServer",
                value: s.to_string(),
                valid: MetricsServerToggle::valid_values(),
            }),
        }
    }
}

/// Load-balancer selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LoadBalancerToggle {
    #[default]
    Default,
    MetalLB,
    CloudProviderKind,
    Disabled,
    None,
}

impl LoadBalancerToggle {
    pub fn valid_values() -> &'static [&'static str] {
        &["Default", "MetalLB", "CloudProviderKind", "Disabled", "None"]
    }

    pub fn needs_install(&self, distribution: Distribution) -> bool {
        match self {
            LoadBalancerToggle::MetalLB | LoadBalancerToggle::CloudProviderKind => true,
            // K3s bundles svclb; Vanilla gets cloud-provider-kind by default.
            LoadBalancerToggle::Default => distribution == Distribution::Vanilla,
            LoadBalancerToggle::Disabled | LoadBalancerToggle::None => false,
        }
    }
}

impl fmt::Display for LoadBalancerToggle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoadBalancerToggle::Default => "Default",
            LoadBalancerToggle::MetalLB => "MetalLB",
            LoadBalancerToggle::CloudProviderKind => "CloudProviderKind",
            LoadBalancerToggle::Disabled => "Disabled",
            LoadBalancerToggle::None => "None",
        };
        f.write_str(s)
    }
}

impl FromStr for LoadBalancerToggle {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(LoadBalancerToggle::Default),
            "metallb" => Ok(LoadBalancerToggle::MetalLB),
            "cloudproviderkind" | "cloud-provider-kind" => Ok(LoadBalancerToggle::CloudProviderKind),
            "disabled" => Ok(LoadBalancerToggle::Disabled),
            "none" => Ok(LoadBalancerToggle::None),
            _ => Err(SpecError::InvalidEnumValue {
                field: "loadBalancer",
                value: s.to_string(),
                valid: LoadBalancerToggle::valid_values(),
            }),
        }
    }
}

/// cert-manager selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CertManagerToggle {
    #[default]
    Default,
    Enabled,
    Disabled,
    None,
}

impl CertManagerToggle {
    pub fn valid_values() -> &'static [&'static str] {
        &["Default", "Enabled", "Disabled", "None"]
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, CertManagerToggle::Disabled | CertManagerToggle::None)
    }

    pub fn needs_install(&self) -> bool {
        matches!(self, CertManagerToggle::Enabled)
    }
}

impl fmt::Display for CertManagerToggle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CertManagerToggle::Default => "Default",
            CertManagerToggle::Enabled => "Enabled",
            CertManagerToggle::Disabled => "Disabled",
            CertManagerToggle::None => "None",
        };
        f.write_str(s)
    }
}

impl FromStr for CertManagerToggle {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(CertManagerToggle::Default),
            "enabled" | "true" => Ok(CertManagerToggle::Enabled),
            "disabled" | "false" => Ok(CertManagerToggle::Disabled),
            "none" => Ok(CertManagerToggle::None),
            _ => Err(SpecError::InvalidEnumValue {
                field: "certManager",
                value: s.to_string(),
                valid: CertManagerToggle::valid_values(),
            }),
        }
    }
}

/// Policy-engine selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PolicyEngineToggle {
    #[default]
    Default,
    Kyverno,
    Disabled,
    None,
}

impl PolicyEngineToggle {
    pub fn valid_values() -> &'static [&'static str] {
        &["Default", "Kyverno", "Disabled", "None"]
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, PolicyEngineToggle::Disabled | PolicyEngineToggle::None)
    }

    pub fn needs_install(&self) -> bool {
        matches!(self, PolicyEngineToggle::Kyverno)
    }
}

impl fmt::Display for PolicyEngineToggle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PolicyEngineToggle::Default => "Default",
            PolicyEngineToggle::Kyverno => "Kyverno",
            PolicyEngineToggle::Disabled => "Disabled",
            PolicyEngineToggle::None => "None",
        };
        f.write_str(s)
    }
}

impl FromStr for PolicyEngineToggle {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(PolicyEngineToggle::Default),
            "kyverno" => Ok(PolicyEngineToggle::Kyverno),
            "disabled" => Ok(PolicyEngineToggle::Disabled),
            "none" => Ok(PolicyEngineToggle::None),
            _ => Err(SpecError::InvalidEnumValue {
                field: "policyEngine",
                value: s.to_string(),
                valid: PolicyEngineToggle::valid_values(),
            }),
        }
    }
}

/// GitOps-engine selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GitOpsEngineToggle {
    #[default]
    Default,
    Flux,
    ArgoCD,
    Disabled,
    None,
}

impl GitOpsEngineToggle {
    pub fn valid_values() -> &'static [&'static str] {
        &["Default", "Flux", "ArgoCD", "Disabled", "None"]
    }

    pub fn is_disabled(&self) -> bool {
        matches!(
            self,
            GitOpsEngineToggle::Default | GitOpsEngineToggle::Disabled | GitOpsEngineToggle::None
        )
    }

    pub fn needs_install(&self) -> bool {
        matches!(self, GitOpsEngineToggle::Flux | GitOpsEngineToggle::ArgoCD)
    }
}

impl fmt::Display for GitOpsEngineToggle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GitOpsEngineToggle::Default => "Default",
            GitOpsEngineToggle::Flux => "Flux",
            GitOpsEngineToggle::ArgoCD => "ArgoCD",
            GitOpsEngineToggle::Disabled => "Disabled",
            GitOpsEngineToggle::None => "None",
        };
        f.write_str(s)
    }
}

impl FromStr for GitOpsEngineToggle {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(GitOpsEngineToggle::Default),
            "flux" => Ok(GitOpsEngineToggle::Flux),
            "argocd" | "argo-cd" => Ok(GitOpsEngineToggle::ArgoCD),
            "disabled" => Ok(GitOpsEngineToggle::Disabled),
            "none" => Ok(GitOpsEngineToggle::None),
            _ => Err(SpecError::InvalidEnumValue {
                field: "gitOpsEngine",
                value: s.to_string(),
                valid: GitOpsEngineToggle::valid_values(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distribution_round_trip() {
        for value in Distribution::valid_values() {
            let parsed: Distribution = value.parse().unwrap();
            assert_eq!(parsed.to_string(), *value);
        }
    }

    #[test]
    fn test_distribution_aliases() {
        assert_eq!("kind".parse::<Distribution>().unwrap(), Distribution::Vanilla);
        assert_eq!("k3d".parse::<Distribution>().unwrap(), Distribution::K3s);
        assert_eq!("TALOS".parse::<Distribution>().unwrap(), Distribution::Talos);
    }

    #[test]
    fn test_invalid_enum_value_lists_alternatives() {
        let err = "openshift".parse::<Distribution>().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("openshift"));
        assert!(message.contains("Vanilla"));
    }

    #[test]
    fn test_compatibility_matrix() {
        // Docker supports every distribution.
        for d in [Distribution::Vanilla, Distribution::K3s, Distribution::Talos] {
            assert!(Provider::Docker.validate_for_distribution(d).is_ok());
        }
        // Hetzner only supports Talos.
        assert!(Provider::Hetzner
            .validate_for_distribution(Distribution::Talos)
            .is_ok());
        assert!(Provider::Hetzner
            .validate_for_distribution(Distribution::Vanilla)
            .is_err());
        assert!(Provider::Hetzner
            .validate_for_distribution(Distribution::K3s)
            .is_err());
    }

    #[test]
    fn test_metrics_server_needs_install() {
        assert!(MetricsServerToggle::Enabled.needs_install(Distribution::Vanilla));
        assert!(MetricsServerToggle::Default.needs_install(Distribution::Vanilla));
        // K3s bundles its own metrics-server.
        assert!(!MetricsServerToggle::Enabled.needs_install(Distribution::K3s));
        assert!(!MetricsServerToggle::Default.needs_install(Distribution::K3s));
        assert!(!MetricsServerToggle::Disabled.needs_install(Distribution::Vanilla));
    }

    #[test]
    fn test_gitops_engine_parse() {
        assert_eq!(
            "argo-cd".parse::<GitOpsEngineToggle>().unwrap(),
            GitOpsEngineToggle::ArgoCD
        );
        assert!(GitOpsEngineToggle::Default.is_disabled());
        assert!(GitOpsEngineToggle::Flux.needs_install());
    }

    #[test]
    fn test_disabled_semantics() {
        assert!(CsiToggle::Disabled.is_disabled());
        assert!(CsiToggle::None.is_disabled());
        assert!(!CsiToggle::Default.is_disabled());
        assert!(CertManagerToggle::None.is_disabled());
        assert!(PolicyEngineToggle::Disabled.is_disabled());
    }
}
