// Resource model: the typed cluster specification and its resolution rules.
//
// Everything downstream (provisioners, registries, diff, installers) reads
// from these types; they are value objects created by the loader and never
// mutated after validation, except `connection.context` which the create
// pipeline back-fills once the cluster exists.

mod cluster;
mod load;
mod toggles;

pub use cluster::{
    context_name, distribution_from_context, resolve_cluster_name, resolve_network_name,
    validate_name, ClusterDocument, ClusterSpec, Connection, HetznerSpec, K3sSpec,
    LocalRegistrySpec, Metadata, MirrorSpec, SpecError, TalosSpec, VanillaSpec,
};
pub use load::{
    apply_overrides, default_document, expand_env_placeholders, find_config_file, load_document,
    merge_mirrors, SpecOverrides,
};
pub use toggles::{
    CertManagerToggle, CniToggle, CsiToggle, Distribution, GitOpsEngineToggle, LoadBalancerToggle,
    MetricsServerToggle, PolicyEngineToggle, Provider,
};
