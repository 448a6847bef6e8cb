// Scaffold a ksail.yaml in the working directory.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::spec::{default_document, Distribution, Provider};

#[derive(Debug)]
pub struct InitOptions {
    pub name: String,
    pub distribution: Distribution,
    pub provider: Provider,
    pub output: PathBuf,
    pub force: bool,
}

pub async fn run(options: InitOptions) -> Result<()> {
    options
        .provider
        .validate_for_distribution(options.distribution)?;
    crate::spec::validate_name(&options.name)?;

    if options.output.exists() && !options.force {
        bail!(
            "'{}' already exists; re-run with --force to overwrite",
            options.output.display()
        );
    }

    let document = default_document(&options.name, options.distribution, options.provider);
    let yaml = serde_yaml::to_string(&document).context("failed to render spec document")?;
    std::fs::write(&options.output, yaml)
        .with_context(|| format!("failed to write '{}'", options.output.display()))?;

    info!(path = %options.output.display(), "wrote cluster spec");
    println!("Created {}", options.output.display());
    println!("Run 'ksail cluster create' to bring it up.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_writes_and_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("ksail.yaml");
        let options = InitOptions {
            name: "dev".to_string(),
            distribution: Distribution::Vanilla,
            provider: Provider::Docker,
            output: output.clone(),
            force: false,
        };
        run(options).await.unwrap();
        let written = std::fs::read_to_string(&output).unwrap();
        assert!(written.contains("ksail.io/v1alpha1"));
        assert!(written.contains("name: dev"));

        let again = InitOptions {
            name: "dev".to_string(),
            distribution: Distribution::Vanilla,
            provider: Provider::Docker,
            output: output.clone(),
            force: false,
        };
        assert!(run(again).await.is_err());

        let forced = InitOptions {
            name: "dev2".to_string(),
            distribution: Distribution::K3s,
            provider: Provider::Docker,
            output,
            force: true,
        };
        run(forced).await.unwrap();
    }

    #[tokio::test]
    async fn test_init_rejects_incompatible_pair() {
        let dir = tempfile::tempdir().unwrap();
        let options = InitOptions {
            name: "dev".to_string(),
            distribution: Distribution::Vanilla,
            provider: Provider::Hetzner,
            output: dir.path().join("ksail.yaml"),
            force: false,
        };
        assert!(run(options).await.is_err());
    }
}
