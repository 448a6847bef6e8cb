// Provisioner abstraction: uniform lifecycle operations polymorphic over
// (distribution, provider), selected through a factory. Advanced update
// capability is a separate trait probed at runtime.

mod hetzner;
mod k3d;
mod kind;
mod talos;

pub use hetzner::{server_names as hetzner_server_names, HetznerProvisioner};
pub use k3d::K3dProvisioner;
pub use kind::KindProvisioner;
pub use talos::TalosProvisioner;

use std::sync::{Arc, RwLock};

use anyhow::Result;
use async_trait::async_trait;
use lazy_static::lazy_static;

use crate::diff::{DiffResult, UpdateOutcome};
use crate::engine::ContainerEngine;
use crate::spec::{ClusterSpec, Distribution, Provider};

#[derive(Debug, thiserror::Error)]
pub enum ProvisionerError {
    #[error("cluster '{0}' not found")]
    ClusterNotFound(String),
    #[error("cluster '{0}' does not exist; create it before updating")]
    ClusterDoesNotExist(String),
    #[error("no provisioner for distribution {distribution} on provider {provider}")]
    Unsupported {
        distribution: Distribution,
        provider: Provider,
    },
}

/// Lifecycle capability set each (distribution, provider) variant supplies.
///
/// `exists` returns `Ok(false)` for "not present"; structural failures such
/// as an unreachable engine are errors. `delete` on an absent cluster is
/// `ProvisionerError::ClusterNotFound`. `create` is not required to be
/// idempotent here; the orchestrator supplies idempotence via `exists`
/// pre-checks.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn exists(&self, name: &str) -> Result<bool>;
    async fn create(&self, name: &str) -> Result<()>;
    async fn delete(&self, name: &str) -> Result<()>;
    async fn start(&self, name: &str) -> Result<()>;
    async fn stop(&self, name: &str) -> Result<()>;
    async fn list(&self) -> Result<Vec<String>>;
    async fn kubeconfig(&self, name: &str) -> Result<String>;

    /// Import engine-local images into the cluster nodes. Distributions
    /// without an import path report that as an error the caller demotes.
    async fn import_images(&self, name: &str, images: &[String]) -> Result<()>;

    /// Runtime capability probe for the updater interface.
    fn as_updater(&self) -> Option<&dyn ClusterUpdater> {
        None
    }
}

/// Advanced capability: observed-config readback, provisioner-scoped diff
/// and in-place update.
#[async_trait]
pub trait ClusterUpdater: Send + Sync {
    async fn get_current_config(&self, name: &str) -> Result<ClusterSpec>;
    async fn diff_config(
        &self,
        name: &str,
        old: &ClusterSpec,
        new: &ClusterSpec,
    ) -> Result<DiffResult>;
    async fn update(
        &self,
        name: &str,
        old: &ClusterSpec,
        new: &ClusterSpec,
    ) -> Result<UpdateOutcome>;
}

type FactoryFn = dyn Fn(&ClusterSpec) -> Result<Arc<dyn Provisioner>> + Send + Sync;

lazy_static! {
    static ref FACTORY_OVERRIDE: RwLock<Option<Arc<FactoryFn>>> = RwLock::new(None);
}

/// Construct the provisioner for a validated spec. A test override takes
/// precedence over the real factory.
pub fn provisioner_for(spec: &ClusterSpec) -> Result<Arc<dyn Provisioner>> {
    {
        let slot = FACTORY_OVERRIDE
            .read()
            .expect("provisioner factory override lock poisoned");
        if let Some(factory) = slot.as_ref() {
            return factory(spec);
        }
    }
    spec.provider.validate_for_distribution(spec.distribution)?;
    let provisioner: Arc<dyn Provisioner> = match (spec.distribution, spec.provider) {
        (Distribution::Vanilla, Provider::Docker) => {
            Arc::new(KindProvisioner::new(spec.clone(), ContainerEngine::connect()?))
        }
        (Distribution::K3s, Provider::Docker) => Arc::new(K3dProvisioner::new(spec.clone())),
        (Distribution::Talos, Provider::Docker) => {
            Arc::new(TalosProvisioner::new(spec.clone(), ContainerEngine::connect()?))
        }
        (Distribution::Talos, Provider::Hetzner) => {
            Arc::new(HetznerProvisioner::from_env(spec.clone())?)
        }
        (distribution, provider) => {
            return Err(ProvisionerError::Unsupported {
                distribution,
                provider,
            }
            .into())
        }
    };
    Ok(provisioner)
}

/// Install a test factory. The returned closure restores the previous one.
pub fn override_provisioner_factory(
    factory: Arc<FactoryFn>,
) -> impl FnOnce() {
    let previous = {
        let mut slot = FACTORY_OVERRIDE
            .write()
            .expect("provisioner factory override lock poisoned");
        std::mem::replace(&mut *slot, Some(factory))
    };
    move || {
        let mut slot = FACTORY_OVERRIDE
            .write()
            .expect("provisioner factory override lock poisoned");
        *slot = previous;
    }
}
