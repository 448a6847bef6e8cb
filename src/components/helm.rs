// Helm wrapper for the chart-backed component installers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::exec::{default_invoker, CommandInvoker};

/// A chart source: repository name and URL.
#[derive(Debug, Clone, Copy)]
pub struct ChartRepo {
    pub name: &'static str,
    pub url: &'static str,
}

#[derive(Clone)]
pub struct Helm {
    kubeconfig: PathBuf,
    context: Option<String>,
    invoker: Arc<dyn CommandInvoker>,
}

impl Helm {
    pub fn new(kubeconfig: PathBuf, context: Option<String>) -> Self {
        Helm {
            kubeconfig,
            context,
            invoker: default_invoker(),
        }
    }

    pub fn with_invoker(mut self, invoker: Arc<dyn CommandInvoker>) -> Self {
        self.invoker = invoker;
        self
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = vec![
            "--kubeconfig".to_string(),
            self.kubeconfig.display().to_string(),
        ];
        if let Some(context) = &self.context {
            args.push("--kube-context".to_string());
            args.push(context.clone());
        }
        args
    }

    async fn run(&self, extra: Vec<String>) -> Result<crate::exec::CommandOutput> {
        let mut args = extra;
        args.extend(self.base_args());
        self.invoker.run("helm", &args).await
    }

    /// Register (or refresh) a chart repository.
    pub async fn repo_add(&self, repo: ChartRepo) -> Result<()> {
        let args = vec![
            "repo".to_string(),
            "add".to_string(),
            repo.name.to_string(),
            repo.url.to_string(),
            "--force-update".to_string(),
        ];
        // repo add is config-only; no kubeconfig involved.
        self.invoker
            .run("helm", &args)
            .await?
            .require_success("helm repo add")?;
        Ok(())
    }

    /// `helm upgrade --install` with the usual component settings.
    pub async fn upgrade_install(
        &self,
        release: &str,
        chart: &str,
        namespace: &str,
        values: &[(&str, &str)],
        timeout: Option<Duration>,
    ) -> Result<()> {
        let mut args = vec![
            "upgrade".to_string(),
            "--install".to_string(),
            release.to_string(),
            chart.to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
            "--create-namespace".to_string(),
            "--wait".to_string(),
        ];
        for (key, value) in values {
            args.push("--set".to_string());
            args.push(format!("{key}={value}"));
        }
        if let Some(timeout) = timeout {
            args.push("--timeout".to_string());
            args.push(format!("{}s", timeout.as_secs()));
        }
        self.run(args)
            .await?
            .require_success("helm upgrade --install")?;
        Ok(())
    }

    /// `helm uninstall`, tolerant of the release being absent.
    pub async fn uninstall(&self, release: &str, namespace: &str) -> Result<()> {
        let args = vec![
            "uninstall".to_string(),
            release.to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
            "--ignore-not-found".to_string(),
        ];
        self.run(args).await?.require_success("helm uninstall")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::CommandOutput;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingInvoker {
        calls: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl CommandInvoker for RecordingInvoker {
        async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
            assert_eq!(program, "helm");
            self.calls.lock().unwrap().push(args.to_vec());
            Ok(CommandOutput {
                success: true,
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn test_upgrade_install_args() {
        let invoker = Arc::new(RecordingInvoker {
            calls: Mutex::new(Vec::new()),
        });
        let helm = Helm::new(PathBuf::from("/tmp/kubeconfig"), Some("kind-dev".to_string()))
            .with_invoker(invoker.clone());
        helm.upgrade_install(
            "cilium",
            "cilium/cilium",
            "kube-system",
            &[("operator.replicas", "1")],
            Some(Duration::from_secs(300)),
        )
        .await
        .unwrap();

        let calls = invoker.calls.lock().unwrap();
        let args = &calls[0];
        assert!(args.contains(&"upgrade".to_string()));
        assert!(args.contains(&"--install".to_string()));
        assert!(args.contains(&"cilium/cilium".to_string()));
        assert!(args.contains(&"--set".to_string()));
        assert!(args.contains(&"operator.replicas=1".to_string()));
        assert!(args.contains(&"--timeout".to_string()));
        assert!(args.contains(&"300s".to_string()));
        assert!(args.contains(&"--kube-context".to_string()));
        assert!(args.contains(&"kind-dev".to_string()));
    }

    #[tokio::test]
    async fn test_uninstall_args() {
        let invoker = Arc::new(RecordingInvoker {
            calls: Mutex::new(Vec::new()),
        });
        let helm = Helm::new(PathBuf::from("/tmp/kubeconfig"), None).with_invoker(invoker.clone());
        helm.uninstall("kyverno", "kyverno").await.unwrap();
        let calls = invoker.calls.lock().unwrap();
        assert!(calls[0].contains(&"uninstall".to_string()));
        assert!(calls[0].contains(&"--ignore-not-found".to_string()));
    }
}
