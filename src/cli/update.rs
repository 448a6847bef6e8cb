// The update pipeline: observed vs. desired diff, provisioner-scoped and
// component-scoped application, with the recreate flow as the fallback.

use std::path::PathBuf;

use anyhow::{bail, Result};
use tracing::{info, warn};

use super::{create, delete, effective_cluster_name, install_context, ClusterIdentity};
use crate::components::reconcile_components;
use crate::diff::{self, is_component_field, DiffResult, UpdateOutcome};
use crate::provisioner::{provisioner_for, ProvisionerError};
use crate::spec::{validate_name, SpecOverrides};
use crate::ui::should_skip_prompt;

#[derive(Debug, Default)]
pub struct UpdateOptions {
    pub config: Option<PathBuf>,
    pub name: Option<String>,
    pub dry_run: bool,
    pub force: bool,
}

pub async fn run(options: UpdateOptions) -> Result<()> {
    let overrides = SpecOverrides {
        name: options.name.clone(),
        ..Default::default()
    };
    let desired = super::load_spec(options.config.as_deref(), &overrides)?;
    desired.validate()?;
    let name = effective_cluster_name(&desired);
    validate_name(&name)?;

    let provisioner = provisioner_for(&desired)?;
    if !provisioner.exists(&name).await? {
        return Err(ProvisionerError::ClusterDoesNotExist(name).into());
    }

    let Some(updater) = provisioner.as_updater() else {
        // No updater capability: fall back to the recreate flow.
        info!(
            cluster = %name,
            "provisioner does not support in-place updates; falling back to recreate"
        );
        if !options.force && should_skip_prompt(false) {
            bail!(
                "updating a {} cluster requires recreation; re-run with --force",
                desired.distribution
            );
        }
        return recreate(desired, name, options.force).await;
    };

    let observed = updater.get_current_config(&name).await?;
    let mut result = diff::diff(Some(&observed), Some(&desired));
    let provisioner_diff = updater.diff_config(&name, &observed, &desired).await?;
    result.merge(provisioner_diff);

    if options.dry_run {
        print_summary(&result);
        return Ok(());
    }

    if result.is_empty() {
        println!("Nothing to update; cluster matches the specification.");
        return Ok(());
    }

    if result.needs_user_confirmation() {
        for change in &result.recreate_required {
            eprintln!(
                "error: field '{}' requires cluster recreation ({}: {} -> {})",
                change.field, change.reason, change.old_value, change.new_value
            );
        }
        if !options.force {
            bail!(
                "{} change(s) require cluster recreation; re-run with --force to recreate",
                result.recreate_required.len()
            );
        }
        return recreate(desired, name, true).await;
    }

    // Provisioner-scoped fields go through the updater; component toggles
    // through the reconciler.
    let mut outcome = UpdateOutcome::default();
    let provisioner_scoped: Vec<_> = result
        .in_place
        .iter()
        .chain(result.reboot_required.iter())
        .filter(|c| !is_component_field(&c.field))
        .cloned()
        .collect();
    if !provisioner_scoped.is_empty() {
        let applied = updater.update(&name, &observed, &desired).await?;
        outcome.applied.extend(applied.applied);
        outcome.failed.extend(applied.failed);
    }

    let component_changes: Vec<_> = result
        .in_place
        .iter()
        .filter(|c| is_component_field(&c.field))
        .cloned()
        .collect();
    if !component_changes.is_empty() {
        let ctx = install_context(&desired, &name)?;
        let reconciled =
            reconcile_components(&component_changes, &observed, &desired, &ctx).await;
        outcome.applied.extend(reconciled.applied);
        outcome.failed.extend(reconciled.failed);
    }

    for change in &outcome.applied {
        println!("applied: {} ({} -> {})", change.field, change.old_value, change.new_value);
    }
    for change in &outcome.failed {
        eprintln!("failed: {} ({})", change.field, change.reason);
    }
    if let Some(last) = outcome.failed.last() {
        bail!(
            "update completed with {} failed change(s); last: {} ({})",
            outcome.failed.len(),
            last.field,
            last.reason
        );
    }
    info!(cluster = %name, applied = outcome.applied.len(), "update completed");
    Ok(())
}

fn print_summary(result: &DiffResult) {
    println!(
        "Update plan: {} in-place, {} reboot-required, {} recreate-required",
        result.in_place.len(),
        result.reboot_required.len(),
        result.recreate_required.len()
    );
    for change in result
        .in_place
        .iter()
        .chain(result.reboot_required.iter())
        .chain(result.recreate_required.iter())
    {
        println!(
            "  [{}] {}: {} -> {} ({})",
            change.category, change.field, change.old_value, change.new_value, change.reason
        );
    }
}

/// Delete-then-create as a single command, entered only after confirmation
/// (or `--force`).
async fn recreate(
    desired: crate::spec::ClusterSpec,
    name: String,
    force: bool,
) -> Result<()> {
    warn!(cluster = %name, "recreating cluster");
    let identity = ClusterIdentity {
        name,
        distribution: desired.distribution,
        provider: desired.provider,
    };
    delete::execute(desired.clone(), identity, false, force).await?;
    create::execute(desired).await
}
