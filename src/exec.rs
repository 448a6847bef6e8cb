// Subprocess invoker for the external CLIs KSail drives (kind, k3d,
// talosctl, kubectl, helm).
//
// Commands run through a trait object so tests can substitute a fake
// invoker; the process-wide override slot exists solely for that.

use std::process::Stdio;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use lazy_static::lazy_static;
use tokio::process::Command;
use tracing::debug;

/// Ceiling for any single external CLI invocation.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// Captured result of one invocation.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Turn a failed invocation into an error carrying its stderr.
    pub fn require_success(self, what: &str) -> Result<CommandOutput> {
        if self.success {
            Ok(self)
        } else {
            bail!("{what} failed: {}", self.stderr.trim());
        }
    }
}

#[async_trait]
pub trait CommandInvoker: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;
}

/// Real invoker: spawns the program and captures its output, bounded by
/// [`COMMAND_TIMEOUT`].
pub struct ProcessInvoker;

#[async_trait]
impl CommandInvoker for ProcessInvoker {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        debug!(program, ?args, "executing command");
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to execute '{program}' (is it installed?)"))?;
        let output = tokio::time::timeout(COMMAND_TIMEOUT, child.wait_with_output())
            .await
            .with_context(|| format!("'{program}' timed out after {}s", COMMAND_TIMEOUT.as_secs()))?
            .with_context(|| format!("failed to wait for '{program}'"))?;
        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

lazy_static! {
    static ref INVOKER_OVERRIDE: RwLock<Option<Arc<dyn CommandInvoker>>> = RwLock::new(None);
}

/// The invoker commands should use: the test override when set, else the
/// real process invoker.
pub fn default_invoker() -> Arc<dyn CommandInvoker> {
    let slot = INVOKER_OVERRIDE.read().expect("invoker override lock poisoned");
    slot.clone().unwrap_or_else(|| Arc::new(ProcessInvoker))
}

/// Install a test invoker. The returned closure restores the previous one.
pub fn override_invoker(invoker: Arc<dyn CommandInvoker>) -> impl FnOnce() {
    let previous = {
        let mut slot = INVOKER_OVERRIDE.write().expect("invoker override lock poisoned");
        std::mem::replace(&mut *slot, Some(invoker))
    };
    move || {
        let mut slot = INVOKER_OVERRIDE.write().expect("invoker override lock poisoned");
        *slot = previous;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticInvoker(CommandOutput);

    #[async_trait]
    impl CommandInvoker for StaticInvoker {
        async fn run(&self, _program: &str, _args: &[String]) -> Result<CommandOutput> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_require_success() {
        let ok = CommandOutput {
            success: true,
            ..Default::default()
        };
        assert!(ok.require_success("anything").is_ok());

        let failed = CommandOutput {
            success: false,
            stderr: "boom\n".to_string(),
            ..Default::default()
        };
        let err = failed.require_success("kind create").unwrap_err();
        assert!(err.to_string().contains("kind create"));
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_override_invoker_restores_previous() {
        let fake = Arc::new(StaticInvoker(CommandOutput {
            success: true,
            stdout: "fake".to_string(),
            ..Default::default()
        }));
        let restore = override_invoker(fake);
        let output = default_invoker().run("anything", &[]).await.unwrap();
        assert_eq!(output.stdout, "fake");
        restore();
    }
}
