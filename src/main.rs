use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod backup;
mod cli;
mod components;
mod diff;
mod engine;
mod exec;
mod k8s;
mod provisioner;
mod registry;
mod spec;
mod ui;

use std::path::PathBuf;

use spec::{Distribution, MirrorSpec, Provider, SpecOverrides};

#[derive(Parser, Debug)]
#[command(name = "ksail", author, version, about = "Declarative Kubernetes cluster lifecycle manager", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Cluster lifecycle commands
    #[command(subcommand)]
    #[command(visible_alias = "c")]
    Cluster(ClusterCommands),
}

/// Arguments shared by the commands that read the spec document.
#[derive(Debug, Clone, Args)]
struct CommonArgs {
    /// Path to the cluster spec (defaults to ./ksail.yaml)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,
    /// Cluster name (overrides the spec)
    #[arg(long, short = 'n')]
    name: Option<String>,
    /// Kubeconfig path (overrides the spec and KUBECONFIG)
    #[arg(long, short = 'k')]
    kubeconfig: Option<String>,
}

/// Component toggles mirroring the spec fields.
#[derive(Debug, Clone, Default, Args)]
struct ComponentArgs {
    /// Distribution (Vanilla, K3s, Talos)
    #[arg(long, short = 'd')]
    distribution: Option<String>,
    /// Provider (Docker, Hetzner)
    #[arg(long, short = 'p')]
    provider: Option<String>,
    /// CNI (Default, Cilium, None)
    #[arg(long)]
    cni: Option<String>,
    /// CSI (Default, Enabled, LocalPathProvisioner, Disabled, None)
    #[arg(long)]
    csi: Option<String>,
    /// Metrics server (Default, Enabled, Disabled)
    #[arg(long)]
    metrics_server: Option<String>,
    /// Load balancer (Default, MetalLB, CloudProviderKind, Disabled, None)
    #[arg(long)]
    load_balancer: Option<String>,
    /// cert-manager (Default, Enabled, Disabled, None)
    #[arg(long)]
    cert_manager: Option<String>,
    /// Policy engine (Default, Kyverno, Disabled, None)
    #[arg(long)]
    policy_engine: Option<String>,
    /// GitOps engine (Default, Flux, ArgoCD, Disabled, None)
    #[arg(long)]
    gitops_engine: Option<String>,
}

#[derive(Subcommand, Debug)]
enum ClusterCommands {
    /// Write a default ksail.yaml
    Init {
        /// Cluster name
        #[arg(long, short = 'n', default_value = "ksail")]
        name: String,
        /// Distribution (Vanilla, K3s, Talos)
        #[arg(long, short = 'd', default_value = "Vanilla")]
        distribution: String,
        /// Provider (Docker, Hetzner)
        #[arg(long, short = 'p', default_value = "Docker")]
        provider: String,
        /// Output path
        #[arg(long, short = 'o', default_value = "ksail.yaml")]
        output: PathBuf,
        /// Overwrite an existing file
        #[arg(long, short = 'f')]
        force: bool,
    },
    /// Create (or converge) the cluster described by the spec
    Create {
        #[command(flatten)]
        common: CommonArgs,
        #[command(flatten)]
        components: ComponentArgs,
        /// Mirror registry host[=upstream]; repeatable
        #[arg(long = "mirror-registry")]
        mirror_registries: Vec<String>,
    },
    /// Reconcile a running cluster against the spec
    Update {
        #[command(flatten)]
        common: CommonArgs,
        /// Print the plan without applying it
        #[arg(long)]
        dry_run: bool,
        /// Cascade recreate-required changes into delete + create
        #[arg(long, short = 'f')]
        force: bool,
    },
    /// Delete the cluster and its attached registries
    #[command(visible_alias = "rm")]
    Delete {
        #[command(flatten)]
        common: CommonArgs,
        /// Provider (Docker, Hetzner)
        #[arg(long, short = 'p')]
        provider: Option<String>,
        /// Also remove registry volumes
        #[arg(long = "delete-storage")]
        delete_storage: bool,
        /// Skip the confirmation prompt
        #[arg(long, short = 'f')]
        force: bool,
    },
    /// Start a stopped cluster
    Start {
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Stop a running cluster
    Stop {
        #[command(flatten)]
        common: CommonArgs,
    },
    /// List clusters
    #[command(visible_alias = "ls")]
    List {
        /// Path to the cluster spec (defaults to ./ksail.yaml)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
        /// Only list one distribution
        #[arg(long, short = 'd')]
        distribution: Option<String>,
    },
    /// Show the effective configuration and cluster status
    Info {
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Switch the kubeconfig context to this cluster
    Connect {
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Export cluster resources into an archive
    Backup {
        #[command(flatten)]
        common: CommonArgs,
        /// Archive to write
        #[arg(long, short = 'o')]
        output: PathBuf,
        /// Include persistent volume objects
        #[arg(long = "include-volumes", default_value_t = true, value_parser = clap::value_parser!(bool), num_args = 0..=1, default_missing_value = "true")]
        include_volumes: bool,
        /// Namespaces to export (default: all)
        #[arg(long = "namespaces")]
        namespaces: Vec<String>,
        /// Resource kinds to skip
        #[arg(long = "exclude-types", default_values_t = vec!["events".to_string()])]
        exclude_types: Vec<String>,
        /// gzip level: -1 (default) or 0..=9
        #[arg(long, default_value_t = -1)]
        compression: i32,
    },
    /// Re-apply a backup archive
    Restore {
        #[command(flatten)]
        common: CommonArgs,
        /// Archive to read
        #[arg(long, short = 'i')]
        input: PathBuf,
        /// What to do with existing resources (none, update)
        #[arg(long = "existing-resource-policy", default_value = "none")]
        existing_resource_policy: String,
        /// Render kubectl invocations without applying
        #[arg(long)]
        dry_run: bool,
    },
}

fn parse_overrides(
    common: &CommonArgs,
    components: &ComponentArgs,
    mirror_flags: &[String],
) -> Result<SpecOverrides> {
    let mut mirror_registries = Vec::with_capacity(mirror_flags.len());
    for flag in mirror_flags {
        mirror_registries.push(MirrorSpec::parse_flag(flag)?);
    }
    Ok(SpecOverrides {
        name: common.name.clone(),
        kubeconfig: common.kubeconfig.clone(),
        distribution: components
            .distribution
            .as_deref()
            .map(str::parse)
            .transpose()?,
        provider: components.provider.as_deref().map(str::parse).transpose()?,
        cni: components.cni.as_deref().map(str::parse).transpose()?,
        csi: components.csi.as_deref().map(str::parse).transpose()?,
        metrics_server: components
            .metrics_server
            .as_deref()
            .map(str::parse)
            .transpose()?,
        load_balancer: components
            .load_balancer
            .as_deref()
            .map(str::parse)
            .transpose()?,
        cert_manager: components
            .cert_manager
            .as_deref()
            .map(str::parse)
            .transpose()?,
        policy_engine: components
            .policy_engine
            .as_deref()
            .map(str::parse)
            .transpose()?,
        git_ops_engine: components
            .gitops_engine
            .as_deref()
            .map(str::parse)
            .transpose()?,
        mirror_registries,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for all commands
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let Commands::Cluster(command) = cli.command;

    match command {
        ClusterCommands::Init {
            name,
            distribution,
            provider,
            output,
            force,
        } => {
            cli::init::run(cli::init::InitOptions {
                name,
                distribution: distribution.parse::<Distribution>()?,
                provider: provider.parse::<Provider>()?,
                output,
                force,
            })
            .await
        }
        ClusterCommands::Create {
            common,
            components,
            mirror_registries,
        } => {
            let overrides = parse_overrides(&common, &components, &mirror_registries)?;
            cli::create::run(cli::create::CreateOptions {
                config: common.config,
                overrides,
            })
            .await
        }
        ClusterCommands::Update {
            common,
            dry_run,
            force,
        } => {
            cli::update::run(cli::update::UpdateOptions {
                config: common.config,
                name: common.name,
                dry_run,
                force,
            })
            .await
        }
        ClusterCommands::Delete {
            common,
            provider,
            delete_storage,
            force,
        } => {
            cli::delete::run(cli::delete::DeleteOptions {
                config: common.config,
                name: common.name,
                provider: provider.as_deref().map(str::parse).transpose()?,
                kubeconfig: common.kubeconfig,
                delete_volumes: delete_storage,
                force,
            })
            .await
        }
        ClusterCommands::Start { common } => {
            cli::start::run(cli::start::StartOptions {
                config: common.config,
                name: common.name,
            })
            .await
        }
        ClusterCommands::Stop { common } => {
            cli::stop::run(cli::stop::StopOptions {
                config: common.config,
                name: common.name,
            })
            .await
        }
        ClusterCommands::List {
            config,
            distribution,
        } => {
            cli::list::run(cli::list::ListOptions {
                config,
                distribution: distribution
                    .as_deref()
                    .map(str::parse::<Distribution>)
                    .transpose()?,
            })
            .await
        }
        ClusterCommands::Info { common } => {
            cli::info::run(cli::info::InfoOptions {
                config: common.config,
                name: common.name,
            })
            .await
        }
        ClusterCommands::Connect { common } => {
            cli::connect::run(cli::connect::ConnectOptions {
                config: common.config,
                name: common.name,
                kubeconfig: common.kubeconfig,
            })
            .await
        }
        ClusterCommands::Backup {
            common,
            output,
            include_volumes,
            namespaces,
            exclude_types,
            compression,
        } => {
            cli::backup::run(cli::backup::BackupCommandOptions {
                config: common.config,
                name: common.name,
                output,
                include_volumes,
                namespaces,
                exclude_types,
                compression,
            })
            .await
        }
        ClusterCommands::Restore {
            common,
            input,
            existing_resource_policy,
            dry_run,
        } => {
            cli::restore::run(cli::restore::RestoreCommandOptions {
                config: common.config,
                name: common.name,
                input,
                policy: existing_resource_policy.parse()?,
                dry_run,
            })
            .await
        }
    }
}
