// Component reconciler: install / upgrade / uninstall of the add-on
// components through a uniform installer interface.

mod helm;
mod installers;

pub use helm::{ChartRepo, Helm};
pub use installers::{
    ArgoCdInstaller, CertManagerInstaller, CiliumInstaller, CloudProviderKindInstaller,
    FluxInstaller, KyvernoInstaller, LocalPathProvisionerInstaller, MetalLbInstaller,
    MetricsServerInstaller,
};

use std::sync::{Arc, RwLock};

use anyhow::{Context as AnyhowContext, Result};
use async_trait::async_trait;
use lazy_static::lazy_static;
use tracing::{info, warn};

use crate::diff::{Change, UpdateOutcome};
use crate::engine::ContainerEngine;
use crate::k8s::Kubectl;
use crate::spec::{ClusterSpec, Distribution, GitOpsEngineToggle, LoadBalancerToggle};

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("disabling metrics-server in place is not supported; recreate the cluster")]
    MetricsServerDisableUnsupported,
}

/// Everything an installer needs to reach the cluster.
pub struct InstallContext {
    pub kubectl: Kubectl,
    pub helm: Helm,
    /// Present on the local container-engine provider only.
    pub engine: Option<ContainerEngine>,
    pub cluster_name: String,
    pub distribution: Distribution,
}

#[async_trait]
pub trait ComponentInstaller: Send + Sync {
    fn name(&self) -> &'static str;
    async fn install(&self, ctx: &InstallContext) -> Result<()>;
    async fn uninstall(&self, ctx: &InstallContext) -> Result<()>;
}

/// The add-on components, in post-create installation order. CNI first;
/// everything after it needs a functional pod network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Cni,
    Csi,
    MetricsServer,
    LoadBalancer,
    CertManager,
    PolicyEngine,
    GitOpsEngine,
}

pub const COMPONENT_ORDER: &[Component] = &[
    Component::Cni,
    Component::Csi,
    Component::MetricsServer,
    Component::LoadBalancer,
    Component::CertManager,
    Component::PolicyEngine,
    Component::GitOpsEngine,
];

impl Component {
    /// Map a diff field path to its component.
    pub fn from_field(field: &str) -> Option<Component> {
        let field = field.strip_prefix("cluster.").unwrap_or(field);
        match field {
            "cni" => Some(Component::Cni),
            "csi" => Some(Component::Csi),
            "metricsServer" => Some(Component::MetricsServer),
            "loadBalancer" => Some(Component::LoadBalancer),
            "certManager" => Some(Component::CertManager),
            "policyEngine" => Some(Component::PolicyEngine),
            "gitOpsEngine" => Some(Component::GitOpsEngine),
            _ => None,
        }
    }
}

/// Maps a component toggle to the installer that realizes it; `None` means
/// the distribution's default (or nothing) is wanted and KSail installs
/// nothing itself.
pub trait InstallerFactory: Send + Sync {
    fn installer_for(
        &self,
        component: Component,
        spec: &ClusterSpec,
    ) -> Option<Arc<dyn ComponentInstaller>>;
}

pub struct DefaultInstallerFactory;

impl InstallerFactory for DefaultInstallerFactory {
    fn installer_for(
        &self,
        component: Component,
        spec: &ClusterSpec,
    ) -> Option<Arc<dyn ComponentInstaller>> {
        match component {
            Component::Cni => spec
                .cni
                .needs_install()
                .then(|| Arc::new(CiliumInstaller) as Arc<dyn ComponentInstaller>),
            Component::Csi => spec
                .csi
                .needs_install()
                .then(|| Arc::new(LocalPathProvisionerInstaller) as Arc<dyn ComponentInstaller>),
            Component::MetricsServer => spec
                .metrics_server
                .needs_install(spec.distribution)
                .then(|| Arc::new(MetricsServerInstaller) as Arc<dyn ComponentInstaller>),
            Component::LoadBalancer => {
                if !spec.load_balancer.needs_install(spec.distribution) {
                    return None;
                }
                match spec.load_balancer {
                    LoadBalancerToggle::MetalLB => {
                        Some(Arc::new(MetalLbInstaller) as Arc<dyn ComponentInstaller>)
                    }
                    _ => Some(Arc::new(CloudProviderKindInstaller) as Arc<dyn ComponentInstaller>),
                }
            }
            Component::CertManager => spec
                .cert_manager
                .needs_install()
                .then(|| Arc::new(CertManagerInstaller) as Arc<dyn ComponentInstaller>),
            Component::PolicyEngine => spec
                .policy_engine
                .needs_install()
                .then(|| Arc::new(KyvernoInstaller) as Arc<dyn ComponentInstaller>),
            Component::GitOpsEngine => match spec.git_ops_engine {
                GitOpsEngineToggle::Flux => {
                    Some(Arc::new(FluxInstaller) as Arc<dyn ComponentInstaller>)
                }
                GitOpsEngineToggle::ArgoCD => {
                    Some(Arc::new(ArgoCdInstaller) as Arc<dyn ComponentInstaller>)
                }
                _ => None,
            },
        }
    }
}

lazy_static! {
    static ref FACTORY_OVERRIDE: RwLock<Option<Arc<dyn InstallerFactory>>> = RwLock::new(None);
}

pub fn installer_factory() -> Arc<dyn InstallerFactory> {
    let slot = FACTORY_OVERRIDE
        .read()
        .expect("installer factory override lock poisoned");
    slot.clone()
        .unwrap_or_else(|| Arc::new(DefaultInstallerFactory))
}

/// Install a test factory. The returned closure restores the previous one.
pub fn override_installer_factory(factory: Arc<dyn InstallerFactory>) -> impl FnOnce() {
    let previous = {
        let mut slot = FACTORY_OVERRIDE
            .write()
            .expect("installer factory override lock poisoned");
        std::mem::replace(&mut *slot, Some(factory))
    };
    move || {
        let mut slot = FACTORY_OVERRIDE
            .write()
            .expect("installer factory override lock poisoned");
        *slot = previous;
    }
}

/// Post-creation component pipeline: CNI first, then the rest in order.
pub async fn install_all(spec: &ClusterSpec, ctx: &InstallContext) -> Result<()> {
    let factory = installer_factory();
    for component in COMPONENT_ORDER {
        if let Some(installer) = factory.installer_for(*component, spec) {
            info!(component = installer.name(), "installing component");
            installer
                .install(ctx)
                .await
                .with_context(|| format!("failed to install {}", installer.name()))?;
        }
    }
    Ok(())
}

/// Apply the in-place component changes from a diff. One failing handler
/// does not abort the remainder; failures land in the outcome with their
/// reason, and the caller turns a non-empty failure list into the command's
/// error.
pub async fn reconcile_components(
    changes: &[Change],
    old: &ClusterSpec,
    new: &ClusterSpec,
    ctx: &InstallContext,
) -> UpdateOutcome {
    let factory = installer_factory();
    let mut outcome = UpdateOutcome::default();

    for change in changes {
        let Some(component) = Component::from_field(&change.field) else {
            continue;
        };
        let result = apply_component_change(component, &*factory, old, new, ctx).await;
        match result {
            Ok(()) => outcome.applied.push(change.clone()),
            Err(err) => {
                warn!(field = %change.field, "component reconciliation failed: {err:#}");
                let mut failed = change.clone();
                failed.reason = format!("{err:#}");
                outcome.failed.push(failed);
            }
        }
    }
    outcome
}

async fn apply_component_change(
    component: Component,
    factory: &dyn InstallerFactory,
    old: &ClusterSpec,
    new: &ClusterSpec,
    ctx: &InstallContext,
) -> Result<()> {
    match component {
        // CNI is replaced via a single install call; the previous CNI is
        // overwritten rather than uninstalled first.
        Component::Cni => {
            if let Some(installer) = factory.installer_for(component, new) {
                installer.install(ctx).await?;
            }
            Ok(())
        }
        Component::Csi | Component::CertManager | Component::PolicyEngine => {
            match factory.installer_for(component, new) {
                Some(installer) => installer.install(ctx).await,
                None => {
                    // Transitioning to Disabled/None: uninstall whatever the
                    // old toggle had installed; no-op if already disabled.
                    match factory.installer_for(component, old) {
                        Some(previous) => previous.uninstall(ctx).await,
                        None => Ok(()),
                    }
                }
            }
        }
        Component::MetricsServer => {
            if new.metrics_server.needs_install(new.distribution) {
                match factory.installer_for(component, new) {
                    Some(installer) => installer.install(ctx).await,
                    None => Ok(()),
                }
            } else if factory.installer_for(component, old).is_some() {
                Err(ReconcileError::MetricsServerDisableUnsupported.into())
            } else {
                Ok(())
            }
        }
        Component::LoadBalancer => {
            if let Some(installer) = factory.installer_for(component, new) {
                installer.install(ctx).await?;
            }
            Ok(())
        }
        Component::GitOpsEngine => {
            // Switching engines: uninstall the old engine through its own
            // factory entry, then install the new one.
            if old.git_ops_engine != new.git_ops_engine {
                if let Some(previous) = factory.installer_for(component, old) {
                    if let Err(err) = previous.uninstall(ctx).await {
                        warn!(
                            engine = previous.name(),
                            "failed to uninstall previous GitOps engine: {err:#}"
                        );
                    }
                }
            }
            if let Some(installer) = factory.installer_for(component, new) {
                installer.install(ctx).await?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::ChangeCategory;
    use crate::spec::{CniToggle, CsiToggle, MetricsServerToggle};
    use std::path::PathBuf;
    use std::sync::Mutex;

    fn ctx() -> InstallContext {
        InstallContext {
            kubectl: Kubectl::new(PathBuf::from("/tmp/kubeconfig"), None),
            helm: Helm::new(PathBuf::from("/tmp/kubeconfig"), None),
            engine: None,
            cluster_name: "dev".to_string(),
            distribution: Distribution::Vanilla,
        }
    }

    fn change(field: &str) -> Change {
        Change {
            field: field.to_string(),
            old_value: String::new(),
            new_value: String::new(),
            category: ChangeCategory::InPlace,
            reason: "Helm install/upgrade/uninstall".to_string(),
        }
    }

    struct RecordingInstaller {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ComponentInstaller for RecordingInstaller {
        fn name(&self) -> &'static str {
            self.label
        }
        async fn install(&self, _ctx: &InstallContext) -> Result<()> {
            self.log.lock().unwrap().push(format!("install:{}", self.label));
            Ok(())
        }
        async fn uninstall(&self, _ctx: &InstallContext) -> Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("uninstall:{}", self.label));
            Ok(())
        }
    }

    struct RecordingFactory {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl InstallerFactory for RecordingFactory {
        fn installer_for(
            &self,
            component: Component,
            spec: &ClusterSpec,
        ) -> Option<Arc<dyn ComponentInstaller>> {
            // Selection logic stays real; only the execution is recorded.
            DefaultInstallerFactory
                .installer_for(component, spec)
                .map(|_| {
                    Arc::new(RecordingInstaller {
                        label: match component {
                            Component::Cni => "cni",
                            Component::Csi => "csi",
                            Component::MetricsServer => "metrics-server",
                            Component::LoadBalancer => "load-balancer",
                            Component::CertManager => "cert-manager",
                            Component::PolicyEngine => "policy-engine",
                            Component::GitOpsEngine => "gitops",
                        },
                        log: self.log.clone(),
                    }) as Arc<dyn ComponentInstaller>
                })
        }
    }

    lazy_static! {
        static ref SLOT_GUARD: Mutex<()> = Mutex::new(());
    }

    #[test]
    fn test_component_from_field() {
        assert_eq!(Component::from_field("cluster.cni"), Some(Component::Cni));
        assert_eq!(
            Component::from_field("gitOpsEngine"),
            Some(Component::GitOpsEngine)
        );
        assert_eq!(Component::from_field("cluster.talos.workers"), None);
    }

    #[test]
    fn test_default_factory_selection() {
        let factory = DefaultInstallerFactory;
        let mut spec = ClusterSpec::default();
        assert!(factory.installer_for(Component::Cni, &spec).is_none());
        spec.cni = CniToggle::Cilium;
        assert!(factory.installer_for(Component::Cni, &spec).is_some());

        spec.csi = CsiToggle::Enabled;
        assert_eq!(
            factory
                .installer_for(Component::Csi, &spec)
                .unwrap()
                .name(),
            "local-path-provisioner"
        );

        // K3s bundles its own metrics-server.
        spec.distribution = Distribution::K3s;
        spec.metrics_server = MetricsServerToggle::Enabled;
        assert!(factory.installer_for(Component::MetricsServer, &spec).is_none());
    }

    #[tokio::test]
    async fn test_reconcile_applies_in_place_changes() {
        let _guard = SLOT_GUARD.lock().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let restore = override_installer_factory(Arc::new(RecordingFactory { log: log.clone() }));

        let old = ClusterSpec::default();
        let mut new = ClusterSpec::default();
        new.cni = CniToggle::Cilium;
        new.csi = CsiToggle::Enabled;

        let changes = vec![change("cluster.cni"), change("cluster.csi")];
        let outcome = reconcile_components(&changes, &old, &new, &ctx()).await;
        restore();

        assert_eq!(outcome.applied.len(), 2);
        assert!(outcome.failed.is_empty());
        let log = log.lock().unwrap();
        assert_eq!(*log, vec!["install:cni", "install:csi"]);
    }

    #[tokio::test]
    async fn test_reconcile_uninstalls_on_disable() {
        let _guard = SLOT_GUARD.lock().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let restore = override_installer_factory(Arc::new(RecordingFactory { log: log.clone() }));

        let mut old = ClusterSpec::default();
        old.csi = CsiToggle::Enabled;
        let mut new = ClusterSpec::default();
        new.csi = CsiToggle::Disabled;

        let changes = vec![change("cluster.csi")];
        let outcome = reconcile_components(&changes, &old, &new, &ctx()).await;
        restore();

        assert_eq!(outcome.applied.len(), 1);
        assert_eq!(*log.lock().unwrap(), vec!["uninstall:csi"]);
    }

    #[tokio::test]
    async fn test_metrics_server_disable_is_explicit_error() {
        let _guard = SLOT_GUARD.lock().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let restore = override_installer_factory(Arc::new(RecordingFactory { log: log.clone() }));

        let mut old = ClusterSpec::default();
        old.metrics_server = MetricsServerToggle::Enabled;
        let mut new = ClusterSpec::default();
        new.metrics_server = MetricsServerToggle::Disabled;

        let changes = vec![change("cluster.metricsServer")];
        let outcome = reconcile_components(&changes, &old, &new, &ctx()).await;
        restore();

        assert!(outcome.applied.is_empty());
        assert_eq!(outcome.failed.len(), 1);
        assert!(outcome.failed[0].reason.contains("not supported"));
    }

    #[tokio::test]
    async fn test_gitops_engine_switch_uninstalls_old() {
        let _guard = SLOT_GUARD.lock().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let restore = override_installer_factory(Arc::new(RecordingFactory { log: log.clone() }));

        let mut old = ClusterSpec::default();
        old.git_ops_engine = GitOpsEngineToggle::Flux;
        let mut new = ClusterSpec::default();
        new.git_ops_engine = GitOpsEngineToggle::ArgoCD;

        let changes = vec![change("cluster.gitOpsEngine")];
        let outcome = reconcile_components(&changes, &old, &new, &ctx()).await;
        restore();

        assert_eq!(outcome.applied.len(), 1);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["uninstall:gitops", "install:gitops"]
        );
    }
}
