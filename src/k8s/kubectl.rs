// kubectl wrapper used by backup, restore and the component installers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;

use crate::exec::{default_invoker, CommandInvoker, CommandOutput};

/// stderr markers that mean "nothing there", not "something broke".
const BENIGN_GET_MARKERS: &[&str] = &[
    "No resources found",
    "doesn't have a resource type",
    "the server could not find the requested resource",
];

/// A kubectl invocation target: kubeconfig plus optional context.
#[derive(Clone)]
pub struct Kubectl {
    kubeconfig: PathBuf,
    context: Option<String>,
    invoker: Arc<dyn CommandInvoker>,
}

impl Kubectl {
    pub fn new(kubeconfig: PathBuf, context: Option<String>) -> Self {
        Kubectl {
            kubeconfig,
            context,
            invoker: default_invoker(),
        }
    }

    pub fn with_invoker(mut self, invoker: Arc<dyn CommandInvoker>) -> Self {
        self.invoker = invoker;
        self
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = vec![
            "--kubeconfig".to_string(),
            self.kubeconfig.display().to_string(),
        ];
        if let Some(context) = &self.context {
            args.push("--context".to_string());
            args.push(context.clone());
        }
        args
    }

    async fn run(&self, extra: &[String]) -> Result<CommandOutput> {
        let mut args = self.base_args();
        args.extend_from_slice(extra);
        self.invoker.run("kubectl", &args).await
    }

    /// `kubectl get <kind> -o yaml`, per namespace or across all of them.
    /// Absent resource types and empty listings yield an empty string.
    pub async fn get_yaml(&self, kind: &str, namespace: Option<&str>) -> Result<String> {
        let mut args = vec!["get".to_string(), kind.to_string(), "-o".to_string(), "yaml".to_string()];
        match namespace {
            Some(ns) => {
                args.push("-n".to_string());
                args.push(ns.to_string());
            }
            None => args.push("--all-namespaces".to_string()),
        }
        let output = self.run(&args).await?;
        if !output.success {
            if BENIGN_GET_MARKERS
                .iter()
                .any(|marker| output.stderr.contains(marker))
            {
                return Ok(String::new());
            }
            return Err(anyhow::anyhow!(
                "kubectl get {kind} failed: {}",
                output.stderr.trim()
            ));
        }
        // An empty List still serializes; callers treat it as zero documents.
        if output.stdout.trim().is_empty()
            || BENIGN_GET_MARKERS
                .iter()
                .any(|marker| output.stderr.contains(marker))
        {
            return Ok(String::new());
        }
        Ok(output.stdout)
    }

    /// `kubectl create -f <file>`; the caller inspects the raw output so it
    /// can classify "already exists" stderr.
    pub async fn create_file(&self, file: &Path, dry_run: bool) -> Result<CommandOutput> {
        let mut args = vec![
            "create".to_string(),
            "-f".to_string(),
            file.display().to_string(),
        ];
        if dry_run {
            args.push("--dry-run=client".to_string());
        }
        self.run(&args).await
    }

    /// `kubectl apply -f <file>`.
    pub async fn apply_file(&self, file: &Path, dry_run: bool) -> Result<CommandOutput> {
        let mut args = vec![
            "apply".to_string(),
            "-f".to_string(),
            file.display().to_string(),
        ];
        if dry_run {
            args.push("--dry-run=client".to_string());
        }
        self.run(&args).await
    }

    /// `kubectl apply -f <url>` for upstream install manifests.
    pub async fn apply_url(&self, url: &str, namespace: Option<&str>) -> Result<()> {
        let mut args = vec!["apply".to_string(), "-f".to_string(), url.to_string()];
        if let Some(ns) = namespace {
            args.push("-n".to_string());
            args.push(ns.to_string());
        }
        self.run(&args).await?.require_success("kubectl apply")?;
        Ok(())
    }

    /// `kubectl delete -f <url> --ignore-not-found`.
    pub async fn delete_url(&self, url: &str, namespace: Option<&str>) -> Result<()> {
        let mut args = vec![
            "delete".to_string(),
            "-f".to_string(),
            url.to_string(),
            "--ignore-not-found".to_string(),
        ];
        if let Some(ns) = namespace {
            args.push("-n".to_string());
            args.push(ns.to_string());
        }
        self.run(&args).await?.require_success("kubectl delete")?;
        Ok(())
    }

    /// Create a namespace, tolerating its prior existence.
    pub async fn ensure_namespace(&self, name: &str) -> Result<()> {
        let args = vec![
            "create".to_string(),
            "namespace".to_string(),
            name.to_string(),
        ];
        let output = self.run(&args).await?;
        if output.success || all_lines_contain(&output.stderr, "already exists") {
            Ok(())
        } else {
            Err(anyhow::anyhow!(
                "kubectl create namespace {name} failed: {}",
                output.stderr.trim()
            ))
        }
    }
}

/// True iff `output` has at least one non-empty line and every non-empty
/// trimmed line contains `needle`.
pub fn all_lines_contain(output: &str, needle: &str) -> bool {
    let mut saw_line = false;
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        saw_line = true;
        if !line.contains(needle) {
            return false;
        }
    }
    saw_line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_lines_contain() {
        assert!(all_lines_contain(
            "error: namespaces \"default\" already exists",
            "already exists"
        ));
        assert!(all_lines_contain(
            "a already exists\n\n  b already exists  \n",
            "already exists"
        ));
        assert!(!all_lines_contain("", "already exists"));
        assert!(!all_lines_contain("\n\n", "already exists"));
        assert!(!all_lines_contain(
            "x already exists\nsomething else broke",
            "already exists"
        ));
    }

    #[tokio::test]
    async fn test_get_yaml_benign_stderr_is_empty() {
        use crate::exec::CommandInvoker;
        use async_trait::async_trait;

        struct Fake;

        #[async_trait]
        impl CommandInvoker for Fake {
            async fn run(&self, _program: &str, args: &[String]) -> Result<CommandOutput> {
                assert!(args.contains(&"get".to_string()));
                Ok(CommandOutput {
                    success: false,
                    code: Some(1),
                    stdout: String::new(),
                    stderr: "error: the server doesn't have a resource type \"widgets\"".to_string(),
                })
            }
        }

        let kubectl =
            Kubectl::new(PathBuf::from("/tmp/kubeconfig"), None).with_invoker(Arc::new(Fake));
        let yaml = kubectl.get_yaml("widgets", None).await.unwrap();
        assert!(yaml.is_empty());
    }

    #[tokio::test]
    async fn test_get_yaml_real_failure_propagates() {
        use crate::exec::CommandInvoker;
        use async_trait::async_trait;

        struct Fake;

        #[async_trait]
        impl CommandInvoker for Fake {
            async fn run(&self, _program: &str, _args: &[String]) -> Result<CommandOutput> {
                Ok(CommandOutput {
                    success: false,
                    code: Some(1),
                    stdout: String::new(),
                    stderr: "Unable to connect to the server".to_string(),
                })
            }
        }

        let kubectl =
            Kubectl::new(PathBuf::from("/tmp/kubeconfig"), Some("kind-dev".to_string()))
                .with_invoker(Arc::new(Fake));
        assert!(kubectl.get_yaml("pods", Some("default")).await.is_err());
    }
}
