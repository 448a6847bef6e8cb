// Staged output and interactive confirmation.
//
// User-facing progress goes through the stage reporter so every command
// renders the same way: a title line with an emoji, indented activity lines,
// and a success line annotated with elapsed time. Diagnostics still go
// through `tracing`.

use std::io::{self, BufRead, IsTerminal, Write};
use std::time::{Duration, Instant};

use anyhow::Result;

/// Descriptor for one pipeline stage.
#[derive(Debug, Clone, Copy)]
pub struct StageInfo {
    pub title: &'static str,
    pub emoji: &'static str,
    pub activity: &'static str,
    pub success: &'static str,
    pub failure_prefix: &'static str,
}

#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("deletion cancelled")]
    Cancelled,
    #[error("failed to read confirmation input: {0}")]
    Io(#[from] io::Error),
}

/// Stage-separating writer. One reporter per command; stages compose by
/// sequence.
pub struct StageReporter<W: Write> {
    out: W,
    started: Option<Instant>,
}

impl StageReporter<io::Stdout> {
    pub fn stdout() -> Self {
        StageReporter {
            out: io::stdout(),
            started: None,
        }
    }
}

impl<W: Write> StageReporter<W> {
    pub fn new(out: W) -> Self {
        StageReporter { out, started: None }
    }

    /// Emit the title line and start the stage timer.
    pub fn begin(&mut self, info: &StageInfo) {
        self.started = Some(Instant::now());
        let _ = writeln!(self.out, "{} {}", info.emoji, info.title);
        if !info.activity.is_empty() {
            let _ = writeln!(self.out, "  {}...", info.activity);
        }
    }

    /// Emit an indented activity line within the current stage.
    pub fn activity(&mut self, message: &str) {
        let _ = writeln!(self.out, "  {message}");
    }

    /// Emit an indented warning line; warnings never abort the command.
    pub fn warning(&mut self, message: &str) {
        let _ = writeln!(self.out, "  ⚠ {message}");
    }

    /// Emit the success line, annotated with elapsed time when the stage
    /// timer is active.
    pub fn success(&mut self, info: &StageInfo) {
        match self.started.take() {
            Some(started) => {
                let _ = writeln!(
                    self.out,
                    "✔ {} ({})",
                    info.success,
                    format_elapsed(started.elapsed())
                );
            }
            None => {
                let _ = writeln!(self.out, "✔ {}", info.success);
            }
        }
    }

    /// Wrap a stage failure with the stage's failure prefix.
    pub fn fail(&mut self, info: &StageInfo, err: anyhow::Error) -> anyhow::Error {
        self.started = None;
        let _ = writeln!(self.out, "✗ {}", info.failure_prefix);
        err.context(info.failure_prefix)
    }

    /// Run one async stage: title, body, success or prefixed failure.
    pub async fn run_stage<F, T>(&mut self, info: &StageInfo, body: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        self.begin(info);
        match body.await {
            Ok(value) => {
                self.success(info);
                Ok(value)
            }
            Err(err) => Err(self.fail(info, err)),
        }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.out
    }
}

/// Format a stage duration the way the success line expects it.
pub fn format_elapsed(elapsed: Duration) -> String {
    if elapsed < Duration::from_secs(1) {
        format!("took {}ms", elapsed.as_millis())
    } else {
        format!("took {:.2}s", elapsed.as_secs_f64())
    }
}

/// Prompts are skipped with `--force` or when stdin is not a terminal.
pub fn should_skip_prompt(force: bool) -> bool {
    force || !io::stdin().is_terminal()
}

/// What a deletion is about to remove, shown before the prompt.
#[derive(Debug, Default)]
pub struct DeletionPreview {
    pub cluster_name: String,
    pub distribution: String,
    pub node_containers: Vec<String>,
    pub registries: Vec<String>,
    pub infrastructure: Vec<String>,
}

impl DeletionPreview {
    pub fn render<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(
            out,
            "About to delete cluster '{}' ({})",
            self.cluster_name, self.distribution
        )?;
        if !self.node_containers.is_empty() {
            writeln!(out, "  Node containers:")?;
            for name in &self.node_containers {
                writeln!(out, "    - {name}")?;
            }
        }
        if !self.registries.is_empty() {
            writeln!(out, "  Attached registries:")?;
            for name in &self.registries {
                writeln!(out, "    - {name}")?;
            }
        }
        if !self.infrastructure.is_empty() {
            writeln!(out, "  Infrastructure resources:")?;
            for name in &self.infrastructure {
                writeln!(out, "    - {name}")?;
            }
        }
        Ok(())
    }
}

/// Interactive confirmation. Only a case-insensitive `yes` confirms; any
/// other input cancels.
pub fn confirm_deletion<R: BufRead, W: Write>(
    input: &mut R,
    out: &mut W,
    preview: &DeletionPreview,
) -> Result<(), PromptError> {
    preview.render(out)?;
    write!(out, "Type 'yes' to confirm deletion: ")?;
    out.flush()?;
    let mut answer = String::new();
    input.read_line(&mut answer)?;
    if answer.trim().eq_ignore_ascii_case("yes") {
        Ok(())
    } else {
        Err(PromptError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preview() -> DeletionPreview {
        DeletionPreview {
            cluster_name: "dev".to_string(),
            distribution: "Vanilla".to_string(),
            node_containers: vec!["dev-control-plane".to_string()],
            registries: vec!["ksail-registry-dev".to_string()],
            infrastructure: Vec::new(),
        }
    }

    #[test]
    fn test_confirm_accepts_yes_case_insensitive() {
        for answer in ["yes\n", "YES\n", "Yes\n", "  yes  \n"] {
            let mut input = answer.as_bytes();
            let mut out = Vec::new();
            assert!(confirm_deletion(&mut input, &mut out, &preview()).is_ok());
        }
    }

    #[test]
    fn test_confirm_rejects_everything_else() {
        for answer in ["no\n", "y\n", "\n", "yess\n"] {
            let mut input = answer.as_bytes();
            let mut out = Vec::new();
            let err = confirm_deletion(&mut input, &mut out, &preview()).unwrap_err();
            assert!(matches!(err, PromptError::Cancelled));
        }
    }

    #[test]
    fn test_preview_lists_resources() {
        let mut out = Vec::new();
        preview().render(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("dev-control-plane"));
        assert!(text.contains("ksail-registry-dev"));
        assert!(text.contains("Vanilla"));
    }

    #[test]
    fn test_should_skip_prompt_with_force() {
        assert!(should_skip_prompt(true));
    }

    #[test]
    fn test_stage_reporter_output_shape() {
        let info = StageInfo {
            title: "Provisioning cluster",
            emoji: "🚀",
            activity: "creating nodes",
            success: "Cluster ready",
            failure_prefix: "failed to provision cluster",
        };
        let mut reporter = StageReporter::new(Vec::new());
        reporter.begin(&info);
        reporter.activity("pulling node image");
        reporter.success(&info);
        let text = String::from_utf8(reporter.out).unwrap();
        assert!(text.contains("🚀 Provisioning cluster"));
        assert!(text.contains("  creating nodes..."));
        assert!(text.contains("  pulling node image"));
        assert!(text.contains("✔ Cluster ready (took "));
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_millis(250)), "took 250ms");
        assert_eq!(format_elapsed(Duration::from_millis(1500)), "took 1.50s");
    }
}
